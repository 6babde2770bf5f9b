//! Fixed-capacity histories of smoothed samples and raw scores.

use std::collections::VecDeque;

/// Smoothed sample triplet returned by the inference service.
pub type Sample = [f64; 3];

/// Score history holds this many entries per sample slot.
pub const MULTIPLIER: f64 = 4.0;

pub const NEUTRAL_SAMPLE: Sample = [0.0, 0.0, 0.0];
pub const NEUTRAL_SCORE: f64 = 0.0;

/// Index of the sample component compared against the notification
/// threshold when re-arming the retrigger latch.
pub const LATCH_COMPONENT: usize = 1;

/// Sample and score histories, oldest first.
///
/// Both deques are always exactly at capacity: `samples.len() == capacity`
/// and `scores.len() == capacity * MULTIPLIER`.
#[derive(Debug, Clone, PartialEq)]
pub struct SlidingBuffer {
    samples: VecDeque<Sample>,
    scores: VecDeque<f64>,
    capacity: usize,
}

pub fn score_capacity(buffer_length: usize) -> usize {
    (buffer_length as f64 * MULTIPLIER) as usize
}

impl SlidingBuffer {
    pub fn new(buffer_length: usize) -> Self {
        let score_len = score_capacity(buffer_length);
        Self {
            samples: VecDeque::from(vec![NEUTRAL_SAMPLE; buffer_length]),
            scores: VecDeque::from(vec![NEUTRAL_SCORE; score_len]),
            capacity: buffer_length,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push the newest sample and score, evicting the oldest entries.
    pub fn append(&mut self, sample: Sample, score: f64) {
        self.samples.push_back(sample);
        self.scores.push_back(score);

        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        let score_len = score_capacity(self.capacity);
        while self.scores.len() > score_len {
            self.scores.pop_front();
        }
    }

    /// Change capacity, keeping the most recent entries. Shrinking evicts
    /// from the front; growing pads the front with neutral values.
    pub fn resize(&mut self, buffer_length: usize) {
        fit_front(&mut self.samples, buffer_length, NEUTRAL_SAMPLE);
        fit_front(&mut self.scores, score_capacity(buffer_length), NEUTRAL_SCORE);
        self.capacity = buffer_length;
    }

    /// Overwrite every entry with its neutral value.
    pub fn reset(&mut self) {
        self.samples.iter_mut().for_each(|s| *s = NEUTRAL_SAMPLE);
        self.scores.iter_mut().for_each(|s| *s = NEUTRAL_SCORE);
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    pub fn scores(&self) -> Vec<f64> {
        self.scores.iter().copied().collect()
    }

    /// Samples whose latch component is strictly below `threshold`.
    pub fn count_below(&self, threshold: f64) -> usize {
        self.samples
            .iter()
            .filter(|s| s[LATCH_COMPONENT] < threshold)
            .count()
    }

    pub fn is_neutral(&self) -> bool {
        self.samples.iter().all(|s| *s == NEUTRAL_SAMPLE)
            && self.scores.iter().all(|s| *s == NEUTRAL_SCORE)
    }
}

fn fit_front<T: Copy>(items: &mut VecDeque<T>, len: usize, neutral: T) {
    while items.len() > len {
        items.pop_front();
    }
    while items.len() < len {
        items.push_front(neutral);
    }
}
