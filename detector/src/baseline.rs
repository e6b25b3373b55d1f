
use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 10_000;

/// Bounded FIFO of recent samples with running sums.
#[derive(Debug, Clone)]
pub struct Population {
    samples: VecDeque<f64>,
    capacity: usize,
    sum: f64,
    sum_sq: f64,
}

impl Population {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    pub fn observe(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= old;
                self.sum_sq -= old * old;
            }
        }
        self.samples.push_back(value);
        self.sum += value;
        self.sum_sq += value * value;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.sum / self.samples.len() as f64
    }

    /// Population standard deviation.
    pub fn stddev(&self) -> f64 {
        let n = self.samples.len();
        if n == 0 {
            return 0.0;
        }
        let mean = self.mean();
        // running sums drift, never let that go negative
        let var = (self.sum_sq / n as f64 - mean * mean).max(0.0);
        var.sqrt()
    }

    /// Scores `value` against the samples held so far. The caller observes the
    /// candidate only after scoring it, so it never dilutes its own score.
    pub fn zscore(&self, value: f64) -> f64 {
        let stddev = self.stddev();
        if self.samples.is_empty() || stddev <= f64::EPSILON {
            return 0.0;
        }
        (value - self.mean()) / stddev
    }
}

/// Cross-process reference distribution, fed by every WRITE.
#[derive(Debug, Clone)]
pub struct Baseline {
    write_counts: Population,
    byte_counts: Population,
}

impl Baseline {
    pub fn new(capacity: usize) -> Self {
        Self {
            write_counts: Population::new(capacity),
            byte_counts: Population::new(capacity),
        }
    }

    pub fn write_zscore(&self, write_count: usize) -> f64 {
        self.write_counts.zscore(write_count as f64)
    }

    /// Scores the write count, then folds both metrics into the population.
    pub fn score_and_observe(&mut self, write_count: usize, bytes: u64) -> f64 {
        let z = self.write_zscore(write_count);
        self.write_counts.observe(write_count as f64);
        self.byte_counts.observe(bytes as f64);
        z
    }

    pub fn write_counts(&self) -> &Population {
        &self.write_counts
    }

    pub fn byte_counts(&self) -> &Population {
        &self.byte_counts
    }
}

impl Default for Baseline {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
