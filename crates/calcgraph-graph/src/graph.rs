use calcgraph_core::{
    AggregatedExecutionLog, CalcGraphError, ComputedValueResult, ConfigurationError,
    ExecutionLog, FailureDetail, FailureStatus, ObjectId, Result, Value, ValueRequirement,
    ValueSpecification,
};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

use crate::{DependencyNode, FunctionInputs, NodeId, NodeStatus};

/// Acyclic graph of calculation nodes for one calculation configuration.
///
/// Edges are implied by matching each node's input specifications against
/// other nodes' outputs. Nodes live as long as the graph; only their status,
/// value and log change from cycle to cycle.
pub struct DependencyGraph {
    configuration: String,
    nodes: Vec<DependencyNode>,
    by_spec: HashMap<ValueSpecification, NodeId>,
    /// node -> nodes it consumes
    inputs: Vec<Vec<NodeId>>,
    /// node -> nodes consuming it
    dependents: Vec<Vec<NodeId>>,
    order: Vec<NodeId>,
    terminals: Vec<(ValueRequirement, NodeId)>,
}

impl DependencyGraph {
    pub(crate) fn from_nodes(
        configuration: &str,
        nodes: Vec<DependencyNode>,
        terminals: Vec<(ValueRequirement, NodeId)>,
    ) -> std::result::Result<Self, ConfigurationError> {
        let by_spec: HashMap<_, _> = nodes.iter().map(|n| (n.output.clone(), n.id)).collect();

        let mut inputs = vec![Vec::new(); nodes.len()];
        let mut dependents = vec![Vec::new(); nodes.len()];
        for node in &nodes {
            for spec in &node.inputs {
                let input = by_spec.get(spec).copied().ok_or_else(|| {
                    ConfigurationError::UnresolvedRequirement {
                        configuration: configuration.to_string(),
                        requirement: spec.to_string(),
                    }
                })?;
                inputs[node.id.index()].push(input);
                dependents[input.index()].push(node.id);
            }
        }

        let mut graph = Self {
            configuration: configuration.to_string(),
            nodes,
            by_spec,
            inputs,
            dependents,
            order: Vec::new(),
            terminals,
        };
        graph.order = graph.kahn_order()?;
        Ok(graph)
    }

    fn kahn_order(&self) -> std::result::Result<Vec<NodeId>, ConfigurationError> {
        let mut in_degree: Vec<usize> = self.inputs.iter().map(Vec::len).collect();
        let mut queue: VecDeque<NodeId> = self
            .nodes
            .iter()
            .filter(|n| in_degree[n.id.index()] == 0)
            .map(|n| n.id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = queue.pop_front() {
            order.push(id);
            for dependent in &self.dependents[id.index()] {
                in_degree[dependent.index()] -= 1;
                if in_degree[dependent.index()] == 0 {
                    queue.push_back(*dependent);
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            Err(ConfigurationError::CyclicDependency {
                configuration: self.configuration.clone(),
                path: self.find_cycle(),
            })
        }
    }

    fn find_cycle(&self) -> Vec<String> {
        // 0 = unvisited, 1 = on stack, 2 = done
        let mut color = vec![0u8; self.nodes.len()];
        let mut stack = Vec::new();

        fn visit(
            graph: &DependencyGraph,
            id: NodeId,
            color: &mut [u8],
            stack: &mut Vec<NodeId>,
        ) -> Option<Vec<NodeId>> {
            color[id.index()] = 1;
            stack.push(id);
            for input in &graph.inputs[id.index()] {
                match color[input.index()] {
                    0 => {
                        if let Some(cycle) = visit(graph, *input, color, stack) {
                            return Some(cycle);
                        }
                    }
                    1 => {
                        let start = stack.iter().position(|n| n == input).unwrap_or(0);
                        let mut cycle = stack[start..].to_vec();
                        cycle.push(*input);
                        return Some(cycle);
                    }
                    _ => {}
                }
            }
            stack.pop();
            color[id.index()] = 2;
            None
        }

        for node in &self.nodes {
            if color[node.id.index()] == 0 {
                if let Some(cycle) = visit(self, node.id, &mut color, &mut stack) {
                    return cycle
                        .into_iter()
                        .map(|id| self.nodes[id.index()].output.to_string())
                        .collect();
                }
            }
        }
        Vec::new()
    }

    pub fn configuration(&self) -> &str {
        &self.configuration
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&DependencyNode> {
        self.nodes.get(id.index())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.iter()
    }

    pub fn node_for(&self, specification: &ValueSpecification) -> Option<NodeId> {
        self.by_spec.get(specification).copied()
    }

    /// Nodes satisfying the configuration's requested outputs.
    pub fn terminal_outputs(&self) -> &[(ValueRequirement, NodeId)] {
        &self.terminals
    }

    /// Every node appears after all of its inputs.
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn inputs_of(&self, id: NodeId) -> &[NodeId] {
        self.inputs.get(id.index()).map_or(&[], Vec::as_slice)
    }

    pub fn dependents_of(&self, id: NodeId) -> &[NodeId] {
        self.dependents.get(id.index()).map_or(&[], Vec::as_slice)
    }

    pub fn count_with_status(&self, status: NodeStatus) -> usize {
        self.nodes.iter().filter(|n| n.status == status).count()
    }

    /// Nodes still to run or running in the current cycle.
    pub fn outstanding(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.status.needs_execution() || n.status.is_in_flight())
            .count()
    }

    /// Marks every node that resolved against a matching entity, and all of
    /// their dependents, stale. Returns the nodes whose status changed.
    pub fn mark_stale_by_entities<F>(&mut self, predicate: F) -> Vec<NodeId>
    where
        F: Fn(&ObjectId) -> bool,
    {
        self.mark_stale_where(|node| node.entities.iter().any(&predicate))
    }

    pub fn mark_stale_where<F>(&mut self, predicate: F) -> Vec<NodeId>
    where
        F: Fn(&DependencyNode) -> bool,
    {
        let seeds: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| predicate(n))
            .map(|n| n.id)
            .collect();
        self.propagate_stale(seeds)
    }

    /// Full recompute: every node is re-executed next cycle.
    pub fn mark_all_stale(&mut self) -> Vec<NodeId> {
        let all = self.nodes.iter().map(|n| n.id).collect();
        self.propagate_stale(all)
    }

    fn propagate_stale(&mut self, seeds: Vec<NodeId>) -> Vec<NodeId> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<NodeId> = seeds.into_iter().collect();
        let mut changed = Vec::new();

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            let node = &mut self.nodes[id.index()];
            match node.status {
                NodeStatus::Computed | NodeStatus::Failed => {
                    node.status = NodeStatus::Stale;
                    changed.push(id);
                }
                NodeStatus::Pending | NodeStatus::Stale => {}
                NodeStatus::Ready | NodeStatus::Executing => {
                    warn!(
                        "Ignoring stale mark for in-flight node {} in {}",
                        node.output, self.configuration
                    );
                    continue;
                }
            }
            queue.extend(self.dependents[id.index()].iter().copied());
        }

        if !changed.is_empty() {
            debug!("{}: {} nodes marked stale", self.configuration, changed.len());
        }
        changed
    }

    /// Stale or pending nodes whose inputs are all computed, in topological order.
    pub fn ready_nodes(&self) -> Vec<NodeId> {
        self.order
            .iter()
            .copied()
            .filter(|id| {
                self.nodes[id.index()].status.needs_execution()
                    && self.inputs[id.index()]
                        .iter()
                        .all(|input| self.nodes[input.index()].status == NodeStatus::Computed)
            })
            .collect()
    }

    /// Fails, as missing input, every node waiting on an already failed input.
    pub fn fail_blocked(&mut self, cycle: u64) -> Vec<NodeId> {
        let mut failed = Vec::new();
        for index in 0..self.order.len() {
            let id = self.order[index];
            if !self.nodes[id.index()].status.needs_execution() {
                continue;
            }
            let failed_input = self.inputs[id.index()]
                .iter()
                .find(|input| self.nodes[input.index()].status == NodeStatus::Failed)
                .copied();
            if let Some(input) = failed_input {
                self.fail_missing_input(id, input, cycle);
                failed.push(id);
            }
        }
        failed
    }

    pub fn begin_execution(&mut self, id: NodeId) -> Result<()> {
        let ready = self.ready_nodes_contains(id);
        let node = self.node_mut(id)?;
        if !ready {
            return Err(CalcGraphError::InvalidOperation(format!(
                "node {} is not ready ({:?})",
                node.output, node.status
            )));
        }
        node.status = NodeStatus::Executing;
        Ok(())
    }

    fn ready_nodes_contains(&self, id: NodeId) -> bool {
        self.nodes.get(id.index()).is_some_and(|node| {
            node.status.needs_execution()
                && self.inputs[id.index()]
                    .iter()
                    .all(|input| self.nodes[input.index()].status == NodeStatus::Computed)
        })
    }

    pub fn input_values(&self, id: NodeId) -> FunctionInputs {
        let mut values = FunctionInputs::new();
        for input in self.inputs_of(id) {
            let node = &self.nodes[input.index()];
            if let Some(value) = &node.value {
                values.insert(node.output.clone(), value.clone());
            }
        }
        values
    }

    pub fn complete(&mut self, id: NodeId, value: Value, log: ExecutionLog, cycle: u64) -> Result<()> {
        let node = self.executing_node(id)?;
        node.status = NodeStatus::Computed;
        node.value = Some(value);
        node.failure = None;
        node.log = Some(log);
        node.last_cycle = Some(cycle);
        Ok(())
    }

    /// Marks `id` failed and every transitive dependent still waiting to run
    /// as failed due to missing input. Returns those dependents.
    pub fn fail(
        &mut self,
        id: NodeId,
        detail: FailureDetail,
        mut log: ExecutionLog,
        cycle: u64,
    ) -> Result<Vec<NodeId>> {
        let node = self.executing_node(id)?;
        log.failure = Some(detail.clone());
        node.status = NodeStatus::Failed;
        node.value = None;
        node.failure = Some(detail);
        node.log = Some(log);
        node.last_cycle = Some(cycle);

        let mut failed = Vec::new();
        let mut queue: VecDeque<(NodeId, NodeId)> = self.dependents[id.index()]
            .iter()
            .map(|dependent| (*dependent, id))
            .collect();
        while let Some((dependent, cause)) = queue.pop_front() {
            if !self.nodes[dependent.index()].status.needs_execution() {
                continue;
            }
            self.fail_missing_input(dependent, cause, cycle);
            failed.push(dependent);
            queue.extend(
                self.dependents[dependent.index()]
                    .iter()
                    .map(|next| (*next, dependent)),
            );
        }
        Ok(failed)
    }

    fn fail_missing_input(&mut self, id: NodeId, cause: NodeId, cycle: u64) {
        let detail = FailureDetail::new(
            FailureStatus::MissingInput,
            format!("input {} failed", self.nodes[cause.index()].output),
        );
        let mut log = ExecutionLog::new();
        log.failure = Some(detail.clone());
        let node = &mut self.nodes[id.index()];
        node.status = NodeStatus::Failed;
        node.value = None;
        node.failure = Some(detail);
        node.log = Some(log);
        node.last_cycle = Some(cycle);
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut DependencyNode> {
        let configuration = &self.configuration;
        self.nodes.get_mut(id.index()).ok_or_else(|| {
            CalcGraphError::NotFound(format!("node {id} in {configuration}"))
        })
    }

    fn executing_node(&mut self, id: NodeId) -> Result<&mut DependencyNode> {
        let node = self.node_mut(id)?;
        if !node.status.is_in_flight() {
            return Err(CalcGraphError::InvalidOperation(format!(
                "node {} is not executing ({:?})",
                node.output, node.status
            )));
        }
        Ok(node)
    }

    /// The node's own log plus the logs of failing or warning ancestors.
    pub fn aggregated_log(&self, id: NodeId) -> AggregatedExecutionLog {
        let own = self
            .node(id)
            .and_then(|n| n.log.clone())
            .unwrap_or_default();
        let mut aggregated = AggregatedExecutionLog::of(own);

        let mut visited = HashSet::new();
        let mut queue: VecDeque<NodeId> = self.inputs_of(id).iter().copied().collect();
        while let Some(input) = queue.pop_front() {
            if !visited.insert(input) {
                continue;
            }
            let node = &self.nodes[input.index()];
            if let Some(log) = &node.log {
                aggregated.add_input(node.output.clone(), log.clone());
            }
            queue.extend(self.inputs[input.index()].iter().copied());
        }
        aggregated
    }

    /// The node's current outcome as a result-model entry.
    pub fn result(&self, id: NodeId) -> Option<ComputedValueResult> {
        let node = self.node(id)?;
        let cycle = node.last_cycle?;
        let log = self.aggregated_log(id);
        match (node.status, &node.value, &node.failure) {
            (NodeStatus::Computed, Some(value), _) => Some(ComputedValueResult::computed(
                node.output.clone(),
                value.clone(),
                log,
                cycle,
            )),
            (NodeStatus::Failed, _, Some(failure)) => Some(ComputedValueResult::failed(
                node.output.clone(),
                failure.clone(),
                log,
                cycle,
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeFunction;
    use calcgraph_core::{ComputationTarget, ValueProperties};
    use std::collections::BTreeSet;

    fn spec(name: &str) -> ValueSpecification {
        ValueSpecification::new(
            name,
            ComputationTarget::primitive(ObjectId::of("Trade", "T")),
            ValueProperties::new(),
        )
    }

    fn node(index: usize, name: &str, inputs: &[&str], entities: &[&str]) -> DependencyNode {
        DependencyNode::new(
            NodeId::new(index),
            NodeFunction::MarketData,
            spec(name),
            inputs.iter().map(|i| spec(i)).collect(),
            entities
                .iter()
                .map(|e| ObjectId::of("Ticker", *e))
                .collect::<BTreeSet<_>>(),
        )
    }

    /// A -> B, A -> C, B -> D, C -> D
    fn diamond() -> DependencyGraph {
        let nodes = vec![
            node(0, "A", &[], &["A"]),
            node(1, "B", &["A"], &[]),
            node(2, "C", &["A"], &["C"]),
            node(3, "D", &["B", "C"], &[]),
        ];
        DependencyGraph::from_nodes("Default", nodes, Vec::new()).unwrap()
    }

    fn run(graph: &mut DependencyGraph, id: NodeId, value: f64, cycle: u64) {
        graph.begin_execution(id).unwrap();
        graph
            .complete(id, Value::Double(value), ExecutionLog::new(), cycle)
            .unwrap();
    }

    fn id(graph: &DependencyGraph, name: &str) -> NodeId {
        graph.node_for(&spec(name)).unwrap()
    }

    #[test]
    fn topological_order_respects_inputs() {
        let graph = diamond();
        let order = graph.topological_order();
        let position = |name: &str| order.iter().position(|n| *n == id(&graph, name)).unwrap();
        assert!(position("A") < position("B"));
        assert!(position("A") < position("C"));
        assert!(position("B") < position("D"));
        assert!(position("C") < position("D"));
    }

    #[test]
    fn ready_nodes_wait_for_all_inputs() {
        let mut graph = diamond();
        assert_eq!(graph.ready_nodes(), vec![id(&graph, "A")]);

        let target = id(&graph, "A");

        run(&mut graph, target, 1.0, 1);
        let ready = graph.ready_nodes();
        assert_eq!(ready.len(), 2);
        assert!(!ready.contains(&id(&graph, "D")));

        let target = id(&graph, "C");

        run(&mut graph, target, 3.0, 1);
        assert_eq!(graph.ready_nodes(), vec![id(&graph, "B")]);

        let target = id(&graph, "B");

        run(&mut graph, target, 2.0, 1);
        assert_eq!(graph.ready_nodes(), vec![id(&graph, "D")]);
        assert_eq!(graph.input_values(id(&graph, "D")).len(), 2);
    }

    #[test]
    fn begin_execution_rejects_unready_nodes() {
        let mut graph = diamond();
        let d = id(&graph, "D");
        assert!(graph.begin_execution(d).is_err());
        assert!(graph
            .complete(d, Value::Double(1.0), ExecutionLog::new(), 1)
            .is_err());
    }

    #[test]
    fn stale_marks_propagate_to_sinks_only() {
        let mut graph = diamond();
        for name in ["A", "B", "C", "D"] {
            let target = id(&graph, name);
            run(&mut graph, target, 1.0, 1);
        }

        let changed = graph.mark_stale_by_entities(|oid| oid.value() == "C");
        assert_eq!(changed.len(), 2);
        assert_eq!(graph.node(id(&graph, "C")).unwrap().status(), NodeStatus::Stale);
        assert_eq!(graph.node(id(&graph, "D")).unwrap().status(), NodeStatus::Stale);
        assert_eq!(graph.node(id(&graph, "A")).unwrap().status(), NodeStatus::Computed);
        assert_eq!(graph.node(id(&graph, "B")).unwrap().status(), NodeStatus::Computed);
        assert_eq!(graph.ready_nodes(), vec![id(&graph, "C")]);
    }

    #[test]
    fn failure_cascades_to_dependents_only() {
        let nodes = vec![
            node(0, "A", &[], &[]),
            node(1, "B", &["A"], &[]),
            node(2, "C", &["A"], &[]),
            node(3, "D", &["B"], &[]),
            node(4, "E", &["C"], &[]),
        ];
        let mut graph = DependencyGraph::from_nodes("Default", nodes, Vec::new()).unwrap();
        let target = id(&graph, "A");
        run(&mut graph, target, 1.0, 1);

        let b = id(&graph, "B");
        graph.begin_execution(b).unwrap();
        let failed = graph
            .fail(
                b,
                FailureDetail::new(FailureStatus::Error, "boom"),
                ExecutionLog::new(),
                1,
            )
            .unwrap();
        assert_eq!(failed, vec![id(&graph, "D")]);

        let d = graph.result(id(&graph, "D")).unwrap();
        assert_eq!(d.failure().unwrap().status, FailureStatus::MissingInput);
        assert_eq!(d.execution_log.root_causes().next(), Some(&spec("B")));

        assert_eq!(graph.ready_nodes(), vec![id(&graph, "C")]);
        let target = id(&graph, "C");
        run(&mut graph, target, 1.0, 1);
        let target = id(&graph, "E");
        run(&mut graph, target, 1.0, 1);
        assert_eq!(graph.outstanding(), 0);
    }

    #[test]
    fn blocked_nodes_fail_when_inputs_stay_failed() {
        let mut graph = diamond();
        let a = id(&graph, "A");
        graph.begin_execution(a).unwrap();
        graph
            .fail(a, FailureDetail::new(FailureStatus::Error, "no data"), ExecutionLog::new(), 1)
            .unwrap();
        assert_eq!(graph.count_with_status(NodeStatus::Failed), 4);

        // D alone is invalidated; its input B is still failed.
        graph.mark_stale_where(|n| n.output().value_name == "D");
        assert!(graph.ready_nodes().is_empty());
        assert_eq!(graph.fail_blocked(2), vec![id(&graph, "D")]);
        assert_eq!(graph.node(id(&graph, "D")).unwrap().last_cycle(), Some(2));
    }

    #[test]
    fn dangling_inputs_are_configuration_errors() {
        let nodes = vec![node(0, "B", &["A"], &[])];
        let err = DependencyGraph::from_nodes("Default", nodes, Vec::new()).err().unwrap();
        assert!(matches!(err, ConfigurationError::UnresolvedRequirement { .. }));
    }

    #[test]
    fn cycles_are_configuration_errors() {
        let nodes = vec![node(0, "A", &["B"], &[]), node(1, "B", &["A"], &[])];
        match DependencyGraph::from_nodes("Default", nodes, Vec::new()) {
            Err(ConfigurationError::CyclicDependency { path, .. }) => {
                assert_eq!(path.first(), path.last());
                assert!(path.len() >= 3);
            }
            other => panic!("expected cycle, got {:?}", other.err()),
        }
    }
}
