use calcgraph_core::{
    CalcGraphError, ChangeEvent, ChangeListener, ComputationTarget, ConfigurationError, Result,
};
use calcgraph_graph::CalculationConfiguration;
use tokio::sync::{mpsc, oneshot};

use crate::MarketDataTick;

/// Inputs to a view process's control loop. Signals arriving while a cycle
/// runs are queued and considered at the next AWAITING_SIGNAL.
#[derive(Debug)]
pub enum ViewProcessSignal {
    MarketData(Vec<MarketDataTick>),
    EntityChanged(ChangeEvent),
    TriggerCycle,
    UpdateConfiguration {
        configuration: CalculationConfiguration,
        reply: oneshot::Sender<std::result::Result<(), ConfigurationError>>,
    },
    RemoveConfiguration {
        name: String,
        reply: oneshot::Sender<bool>,
    },
    RemoveTarget {
        configuration: String,
        target: ComputationTarget,
    },
    Stop,
}

/// Forwards change notifications into a view process's signal queue.
pub struct SignalChangeListener {
    name: String,
    sender: mpsc::UnboundedSender<ViewProcessSignal>,
}

impl SignalChangeListener {
    pub fn new(name: impl Into<String>, sender: mpsc::UnboundedSender<ViewProcessSignal>) -> Self {
        Self {
            name: name.into(),
            sender,
        }
    }
}

impl ChangeListener for SignalChangeListener {
    fn entity_changed(&self, event: &ChangeEvent) -> Result<()> {
        self.sender
            .send(ViewProcessSignal::EntityChanged(event.clone()))
            .map_err(|_| CalcGraphError::Terminated(self.name.clone()))
    }
}
