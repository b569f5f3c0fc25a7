use calcgraph_core::{ConfigurationError, ObjectId, ValueRequirement, ValueSpecification};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    CalculationConfiguration, CalculationFunction, DependencyGraph, DependencyNode,
    FunctionRepository, MarketDataAvailabilityProvider, NodeFunction, NodeId,
};

enum Unresolved {
    /// Innermost requirement nothing could satisfy.
    Missing(String),
    Cycle(Vec<String>),
}

#[derive(Default)]
struct Resolution {
    nodes: Vec<DependencyNode>,
    /// Requirements currently being resolved, outermost first.
    stack: Vec<ValueRequirement>,
}

impl Resolution {
    fn push(
        &mut self,
        function: NodeFunction,
        output: ValueSpecification,
        inputs: Vec<ValueSpecification>,
        entities: BTreeSet<ObjectId>,
    ) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes
            .push(DependencyNode::new(id, function, output, inputs, entities));
        id
    }
}

/// Resolves a calculation configuration's requirements into a dependency
/// graph, backtracking over candidate functions.
pub struct DependencyGraphBuilder<'a> {
    configuration: &'a CalculationConfiguration,
    functions: &'a FunctionRepository,
    market_data: &'a dyn MarketDataAvailabilityProvider,
}

impl<'a> DependencyGraphBuilder<'a> {
    pub fn new(
        configuration: &'a CalculationConfiguration,
        functions: &'a FunctionRepository,
        market_data: &'a dyn MarketDataAvailabilityProvider,
    ) -> Self {
        Self {
            configuration,
            functions,
            market_data,
        }
    }

    pub fn build(&self) -> Result<DependencyGraph, ConfigurationError> {
        self.configuration.validate()?;
        let name = &self.configuration.name;
        let functions = self.functions.functions();
        let mut resolution = Resolution::default();
        let mut terminals = Vec::with_capacity(self.configuration.requirements.len());

        for requirement in &self.configuration.requirements {
            match self.resolve(requirement, &functions, &mut resolution) {
                Ok(id) => terminals.push((requirement.clone(), id)),
                Err(Unresolved::Missing(requirement)) => {
                    return Err(ConfigurationError::UnresolvedRequirement {
                        configuration: name.clone(),
                        requirement,
                    })
                }
                Err(Unresolved::Cycle(path)) => {
                    return Err(ConfigurationError::CyclicDependency {
                        configuration: name.clone(),
                        path,
                    })
                }
            }
        }

        let graph = DependencyGraph::from_nodes(name, resolution.nodes, terminals)?;
        info!(
            "Built dependency graph for {} with {} nodes",
            name,
            graph.len()
        );
        Ok(graph)
    }

    fn resolve(
        &self,
        requirement: &ValueRequirement,
        functions: &[Arc<dyn CalculationFunction>],
        resolution: &mut Resolution,
    ) -> Result<NodeId, Unresolved> {
        if let Some(existing) = resolution
            .nodes
            .iter()
            .find(|n| n.output().satisfies(requirement))
        {
            return Ok(existing.id());
        }

        if let Some(start) = resolution
            .stack
            .iter()
            .position(|r| r.value_name == requirement.value_name && r.target == requirement.target)
        {
            let mut path: Vec<String> = resolution.stack[start..]
                .iter()
                .map(ToString::to_string)
                .collect();
            path.push(requirement.to_string());
            return Err(Unresolved::Cycle(path));
        }

        if let Some(source) = self.market_data.resolve(requirement) {
            return Ok(resolution.push(
                NodeFunction::MarketData,
                source.specification,
                Vec::new(),
                source.entities,
            ));
        }

        let mut failure = Unresolved::Missing(requirement.to_string());
        resolution.stack.push(requirement.clone());

        for function in functions {
            if !function.can_apply_to(&requirement.target) {
                continue;
            }
            for output in function.results(&requirement.target) {
                if !output.satisfies(requirement) {
                    continue;
                }
                let Some(needs) = function.requirements(&output, requirement) else {
                    continue;
                };

                let checkpoint = resolution.nodes.len();
                let mut inputs = Vec::with_capacity(needs.inputs.len());
                let mut satisfied = true;
                for input in &needs.inputs {
                    match self.resolve(input, functions, resolution) {
                        Ok(id) => inputs.push(resolution.nodes[id.index()].output().clone()),
                        Err(err) => {
                            if !(matches!(failure, Unresolved::Cycle(_))
                                && matches!(err, Unresolved::Missing(_)))
                            {
                                failure = err;
                            }
                            satisfied = false;
                            break;
                        }
                    }
                }

                if satisfied {
                    resolution.stack.pop();
                    return Ok(resolution.push(
                        NodeFunction::Calculation(function.clone()),
                        output,
                        inputs,
                        needs.entities,
                    ));
                }
                debug!(
                    "{} cannot satisfy {}, backtracking",
                    function.name(),
                    requirement
                );
                resolution.nodes.truncate(checkpoint);
            }
        }

        resolution.stack.pop();
        Err(failure)
    }
}
