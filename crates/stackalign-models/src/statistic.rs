use std::collections::VecDeque;

/// Running record of the optimizer error used for plateau detection.
///
/// Keeps the last `capacity` values together with global mean, min and max.
#[derive(Debug, Clone)]
pub struct ErrorStatistic {
    values: VecDeque<f64>,
    capacity: usize,
    count: usize,
    sum: f64,
    min: f64,
    max: f64,
}

impl ErrorStatistic {
    /// Create a statistic retaining at most `capacity` recent values.
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            count: 0,
            sum: 0.0,
            min: f64::MAX,
            max: f64::MIN,
        }
    }

    /// Record a new error value.
    pub fn add(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Number of values recorded so far.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether no value was recorded.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The most recent value.
    pub fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }

    /// Mean of all recorded values.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Smallest recorded value.
    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    /// Largest recorded value.
    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    /// Average change per step over the last `width` steps.
    ///
    /// `None` if fewer than `width + 1` values are retained.
    pub fn wide_slope(&self, width: usize) -> Option<f64> {
        let n = self.values.len();
        if width == 0 || n <= width {
            return None;
        }
        Some((self.values[n - 1] - self.values[n - 1 - width]) / width as f64)
    }

    /// Whether the error stalled over every window `width, width / 2, ..., 1`.
    pub fn is_plateau(&self, width: usize, tolerance: f64) -> bool {
        let mut w = width;
        while w >= 1 {
            match self.wide_slope(w) {
                Some(slope) if slope.abs() <= tolerance => {}
                _ => return false,
            }
            w /= 2;
        }
        true
    }
}
