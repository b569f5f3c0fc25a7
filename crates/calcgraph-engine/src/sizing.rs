use calcgraph_core::{JobStatistics, SchedulerConfig};
use std::time::Duration;

/// Proportional controller steering job size towards a target job cost.
///
/// Each call moves the current size a fixed fraction (`gain`) of the way
/// towards the size that would have cost `target_cost` given the last
/// cycle's per-node cost. With a gain in (0, 1] the size approaches the
/// ideal monotonically, so it never oscillates around it.
#[derive(Debug, Clone)]
pub struct JobSizer {
    current: f64,
    default_size: usize,
    min_size: usize,
    max_size: usize,
    target_cost: Duration,
    gain: f64,
}

impl JobSizer {
    pub fn new(config: &SchedulerConfig) -> Self {
        let min_size = config.min_job_size.max(1);
        let max_size = config.max_job_size.max(min_size);
        let default_size = config.default_job_size.clamp(min_size, max_size);
        Self {
            current: default_size as f64,
            default_size,
            min_size,
            max_size,
            target_cost: config.target_job_cost(),
            gain: config.controller_gain.clamp(f64::EPSILON, 1.0),
        }
    }

    pub fn current(&self) -> usize {
        (self.current.round() as usize).max(self.min_size)
    }

    /// Size to use for the coming cycle.
    pub fn next_size(&mut self, statistics: Option<&JobStatistics>) -> usize {
        match statistics.and_then(|s| self.ideal_size(s)) {
            Some(ideal) => {
                self.current += self.gain * (ideal - self.current);
                self.current = self
                    .current
                    .clamp(self.min_size as f64, self.max_size as f64);
            }
            None => self.current = self.default_size as f64,
        }
        self.current()
    }

    fn ideal_size(&self, statistics: &JobStatistics) -> Option<f64> {
        if statistics.total_jobs == 0 || statistics.mean_job_size <= 0.0 {
            return None;
        }
        let per_node = statistics.mean_job_cycle_cost.as_secs_f64() / statistics.mean_job_size;
        let ideal = if per_node > 0.0 {
            self.target_cost.as_secs_f64() / per_node
        } else {
            self.max_size as f64
        };
        Some(ideal.clamp(self.min_size as f64, self.max_size as f64))
    }
}

/// Splits `items` into consecutive chunks of at most `size`.
pub fn partition<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);
    for item in items {
        current.push(item);
        if current.len() == size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
