use calcgraph_core::{
    ExecutionLog, FailureDetail, FailureStatus, LogLevel, SchedulerConfig, Value,
    ValueSpecification,
};
use calcgraph_graph::{CalculationFunction, FunctionError, FunctionInputs, NodeId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What executing one node involves.
#[derive(Clone)]
pub enum JobBody {
    /// Value read from the market-data snapshot; `None` when no tick has arrived.
    MarketData(Option<Value>),
    Calculation {
        function: Arc<dyn CalculationFunction>,
        inputs: FunctionInputs,
    },
}

#[derive(Clone)]
pub struct JobItem {
    pub node: NodeId,
    pub specification: ValueSpecification,
    pub body: JobBody,
}

/// A batch of ready nodes executed sequentially by one worker.
pub struct ExecutionJob {
    pub id: u64,
    pub configuration: String,
    pub items: Vec<JobItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Base delay, doubled after each failed attempt.
    pub backoff: Duration,
    /// Per-attempt limit; an attempt that exceeds it counts as transient.
    pub timeout: Duration,
}

impl From<&SchedulerConfig> for RetryPolicy {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: config.retry_backoff(),
            timeout: config.node_timeout(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub node: NodeId,
    pub specification: ValueSpecification,
    pub result: Result<Value, FailureDetail>,
    pub log: ExecutionLog,
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: u64,
    pub items: Vec<ItemOutcome>,
    /// Wall time of the whole job.
    pub cycle_cost: Duration,
    /// Time spent reading market data and waiting out retry backoff.
    pub io_cost: Duration,
}

impl ExecutionJob {
    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub async fn run(self, policy: RetryPolicy) -> JobOutcome {
        let started = Instant::now();
        let mut io_cost = Duration::ZERO;
        let mut items = Vec::with_capacity(self.items.len());

        for item in self.items {
            let (outcome, io) = execute_item(item, &policy).await;
            io_cost += io;
            items.push(outcome);
        }

        debug!(
            "Job {} for {} finished {} nodes in {:?}",
            self.id,
            self.configuration,
            items.len(),
            started.elapsed()
        );
        JobOutcome {
            job_id: self.id,
            items,
            cycle_cost: started.elapsed(),
            io_cost,
        }
    }
}

async fn execute_item(item: JobItem, policy: &RetryPolicy) -> (ItemOutcome, Duration) {
    let started = Instant::now();
    let mut log = ExecutionLog::new();
    let mut io = Duration::ZERO;

    let result = match item.body {
        JobBody::MarketData(value) => {
            log.attempts = 1;
            io += started.elapsed();
            value.ok_or_else(|| {
                FailureDetail::new(
                    FailureStatus::MissingInput,
                    format!("no market data for {}", item.specification),
                )
            })
        }
        JobBody::Calculation { function, inputs } => {
            execute_with_retry(
                function.as_ref(),
                &item.specification,
                &inputs,
                policy,
                &mut log,
                &mut io,
            )
            .await
        }
    };

    log.duration = started.elapsed();
    if let Err(detail) = &result {
        log.log(LogLevel::Error, detail.message.clone());
        log.failure = Some(detail.clone());
    }
    let outcome = ItemOutcome {
        node: item.node,
        specification: item.specification,
        result,
        log,
    };
    (outcome, io)
}

async fn execute_with_retry(
    function: &dyn CalculationFunction,
    specification: &ValueSpecification,
    inputs: &FunctionInputs,
    policy: &RetryPolicy,
    log: &mut ExecutionLog,
    io: &mut Duration,
) -> Result<Value, FailureDetail> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        log.attempts = attempt;

        let execution = function.execute(&specification.target, inputs, specification);
        let (message, status) = match tokio::time::timeout(policy.timeout, execution).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(FunctionError::Failed(message))) => {
                return Err(FailureDetail::new(FailureStatus::Error, message))
            }
            Ok(Err(FunctionError::MissingInput(message))) => {
                return Err(FailureDetail::new(FailureStatus::MissingInput, message))
            }
            Ok(Err(FunctionError::Transient(message))) => (message, FailureStatus::Error),
            Err(_) => (
                format!("timed out after {:?}", policy.timeout),
                FailureStatus::Timeout,
            ),
        };

        if attempt > policy.max_retries {
            return Err(FailureDetail::new(
                status,
                format!("{message} (gave up after {attempt} attempts)"),
            ));
        }

        let backoff = policy
            .backoff
            .saturating_mul(2u32.saturating_pow(attempt - 1));
        warn!(
            "{} attempt {} for {} failed: {}; retrying in {:?}",
            function.name(),
            attempt,
            specification,
            message,
            backoff
        );
        log.log(
            LogLevel::Warn,
            format!("attempt {attempt} failed: {message}"),
        );
        let waited = Instant::now();
        tokio::time::sleep(backoff).await;
        *io += waited.elapsed();
    }
}
