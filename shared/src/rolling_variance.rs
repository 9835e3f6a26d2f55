//! Streaming windowed mean/variance

use std::collections::VecDeque;

/// Online mean and sample variance over the last `sample_size` observations.
///
/// While filling, Welford's incremental update is used. Once full, the oldest
/// observation is evicted and the running mean and sum of squared deviations
/// are adjusted in place, never recomputed from the window.
#[derive(Debug, Clone)]
pub struct RollingVariance {
    sample_size: usize,
    window: VecDeque<f64>,
    n: usize,
    mean: f64,
    acc_var: f64,
}

impl RollingVariance {
    /// Windows smaller than two samples have no sample variance, so
    /// `sample_size` is raised to 2 if needed.
    pub fn new(sample_size: usize) -> Self {
        let sample_size = sample_size.max(2);
        Self {
            sample_size,
            window: VecDeque::with_capacity(sample_size + 1),
            n: 0,
            mean: 0.0,
            acc_var: 0.0,
        }
    }

    pub fn push(&mut self, observation: f64) {
        self.window.push_back(observation);

        if self.n < self.sample_size {
            self.n += 1;
            let delta = observation - self.mean;
            self.mean += delta / self.n as f64;
            self.acc_var += delta * (observation - self.mean);
        } else if let Some(evicted) = self.window.pop_front() {
            let prev_mean = self.mean;
            self.mean += (observation - evicted) / self.sample_size as f64;
            self.acc_var += (observation - prev_mean) * (observation - self.mean)
                - (evicted - prev_mean) * (evicted - self.mean);
        }
    }

    /// Sample variance (n - 1 denominator), `None` until the window is full
    pub fn variance(&self) -> Option<f64> {
        if self.is_full() {
            Some(self.acc_var / (self.sample_size - 1) as f64)
        } else {
            None
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn is_full(&self) -> bool {
        self.n == self.sample_size
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }
}
