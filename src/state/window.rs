use crate::event::Sample;
use std::collections::VecDeque;

/// Default number of samples kept per metric (one chart screen)
pub const DEFAULT_WINDOW_CAPACITY: usize = 20;

/// Fixed-capacity FIFO buffer of samples, oldest first.
///
/// Insertion order is chronological order; samples are never re-sorted.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleWindow {
    capacity: usize,
    samples: VecDeque<Sample>,
}

impl SampleWindow {
    /// Create an empty window. A zero capacity is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a sample, evicting the oldest once at capacity
    pub fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Replace the contents wholesale, keeping only the last `capacity` samples
    pub fn replace_all(&mut self, samples: Vec<Sample>) {
        let skip = samples.len().saturating_sub(self.capacity);
        self.samples.clear();
        self.samples.extend(samples.into_iter().skip(skip));
    }

    /// Ordered copy of the window, oldest first
    pub fn as_sequence(&self) -> Vec<Sample> {
        self.samples.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}
