//! Base-2 exponential bucket histogram.
//!
//! Bucket `index` at `scale` covers `(base^index, base^(index + 1)]` with
//! `base = 2^(2^-scale)`. Each sign keeps at most `max_size` contiguous
//! buckets; when a value would widen a range past that, both ranges are
//! downscaled (adjacent buckets merged) until it fits.

use crate::core::{PipelineError, Result};
use crate::metrics::types::MetricValue;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Largest scale a histogram may start at
pub const MAX_EXPONENTIAL_SCALE: i32 = 20;
/// Smallest scale; two buckets then cover every finite double
pub const MIN_EXPONENTIAL_SCALE: i32 = -11;
/// Default bucket budget per sign
pub const DEFAULT_EXPONENTIAL_MAX_SIZE: usize = 160;

const FRACTION_MASK: u64 = 0x000F_FFFF_FFFF_FFFF;
const EXPONENT_MASK: u64 = 0x7FF0_0000_0000_0000;
const FRACTION_WIDTH: u32 = 52;
const EXPONENT_BIAS: i32 = 1023;

/// Size and resolution limits of an exponential histogram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExponentialBuckets {
    /// Buckets kept per sign, not counting the zero bucket
    pub max_size: usize,
    /// Starting (and post-reset) scale
    pub max_scale: i32,
}

impl Default for ExponentialBuckets {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_EXPONENTIAL_MAX_SIZE,
            max_scale: MAX_EXPONENTIAL_SCALE,
        }
    }
}

impl ExponentialBuckets {
    pub fn validate(&self) -> Result<()> {
        if self.max_size < 2 {
            return Err(PipelineError::config(
                "exponential histogram max_size must be at least 2",
            ));
        }
        if !(MIN_EXPONENTIAL_SCALE..=MAX_EXPONENTIAL_SCALE).contains(&self.max_scale) {
            return Err(PipelineError::config(format!(
                "exponential histogram max_scale must be within [{}, {}]",
                MIN_EXPONENTIAL_SCALE, MAX_EXPONENTIAL_SCALE
            )));
        }
        Ok(())
    }
}

/// Index of the bucket holding a finite, positive `value` at `scale`
pub(crate) fn map_to_index(value: f64, scale: i32) -> i32 {
    debug_assert!(value.is_finite() && value > 0.0);

    let bits = value.to_bits();
    let fraction = bits & FRACTION_MASK;
    let mut exponent = ((bits & EXPONENT_MASK) >> FRACTION_WIDTH) as i32;

    if scale > 0 {
        // Exact powers of two sit on a bucket's upper boundary
        if fraction == 0 && exponent != 0 {
            return ((exponent - EXPONENT_BIAS) << scale) - 1;
        }
        let scaling_factor = std::f64::consts::LOG2_E * 2f64.powi(scale);
        return (value.ln() * scaling_factor).ceil() as i32 - 1;
    }

    if exponent == 0 {
        // Subnormal: normalise the exponent from the fraction
        exponent -= (fraction - 1).leading_zeros() as i32 - (64 - FRACTION_WIDTH as i32);
    } else if fraction == 0 {
        exponent -= 1;
    }
    (exponent - EXPONENT_BIAS) >> -scale
}

/// Contiguous bucket counts starting at `offset`
#[derive(Debug, Clone, Default)]
struct BucketRange {
    offset: i32,
    counts: VecDeque<u64>,
}

impl BucketRange {
    fn end(&self) -> i32 {
        self.offset + self.counts.len() as i32
    }

    /// Downscale steps needed before `index` fits within `max_size` buckets
    fn reduction_for(&self, index: i32, max_size: usize) -> i32 {
        if self.counts.is_empty() {
            return 0;
        }
        let mut low = self.offset.min(index);
        let mut high = (self.end() - 1).max(index);
        let mut steps = 0;
        while (i64::from(high) - i64::from(low) + 1) as usize > max_size {
            low >>= 1;
            high >>= 1;
            steps += 1;
        }
        steps
    }

    /// Caller guarantees the range stays within its size budget
    fn increment(&mut self, index: i32) {
        if self.counts.is_empty() {
            self.offset = index;
            self.counts.push_back(1);
            return;
        }
        while index < self.offset {
            self.counts.push_front(0);
            self.offset -= 1;
        }
        while index >= self.end() {
            self.counts.push_back(0);
        }
        self.counts[(index - self.offset) as usize] += 1;
    }

    /// Merge buckets pairwise `steps` times
    fn downscale(&mut self, steps: i32) {
        if steps == 0 || self.counts.is_empty() {
            return;
        }
        let mut merged: VecDeque<u64> = VecDeque::new();
        let new_offset = self.offset >> steps;
        for (i, count) in self.counts.iter().enumerate() {
            let slot = ((self.offset + i as i32) >> steps) - new_offset;
            let slot = slot as usize;
            if slot == merged.len() {
                merged.push_back(0);
            }
            merged[slot] += count;
        }
        self.offset = new_offset;
        self.counts = merged;
    }

    fn reset(&mut self) {
        self.offset = 0;
        self.counts.clear();
    }
}

/// Running state of one exponential histogram series
#[derive(Debug, Clone)]
pub(crate) struct ExponentialHistogramState {
    limits: ExponentialBuckets,
    scale: i32,
    zero_count: u64,
    positive: BucketRange,
    negative: BucketRange,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl ExponentialHistogramState {
    pub(crate) fn new(limits: ExponentialBuckets) -> Self {
        Self {
            limits,
            scale: limits.max_scale,
            zero_count: 0,
            positive: BucketRange::default(),
            negative: BucketRange::default(),
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub(crate) fn update(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        if value == 0.0 {
            self.zero_count += 1;
            return;
        }

        let index = map_to_index(value.abs(), self.scale);
        let range = if value > 0.0 {
            &self.positive
        } else {
            &self.negative
        };
        let steps = range.reduction_for(index, self.limits.max_size);
        if steps > 0 {
            self.positive.downscale(steps);
            self.negative.downscale(steps);
            self.scale -= steps;
        }

        let index = index >> steps;
        if value > 0.0 {
            self.positive.increment(index);
        } else {
            self.negative.increment(index);
        }
    }

    pub(crate) fn snapshot(&self) -> MetricValue {
        let has_values = self.count > 0;
        MetricValue::ExponentialHistogram {
            scale: self.scale,
            zero_count: self.zero_count,
            positive_offset: self.positive.offset,
            positive_bucket_counts: self.positive.counts.iter().copied().collect(),
            negative_offset: self.negative.offset,
            negative_bucket_counts: self.negative.counts.iter().copied().collect(),
            count: self.count,
            sum: self.sum,
            min: has_values.then_some(self.min),
            max: has_values.then_some(self.max),
        }
    }

    /// Clear counts and return to the configured maximum scale
    pub(crate) fn reset(&mut self) {
        self.scale = self.limits.max_scale;
        self.zero_count = 0;
        self.positive.reset();
        self.negative.reset();
        self.count = 0;
        self.sum = 0.0;
        self.min = f64::INFINITY;
        self.max = f64::NEG_INFINITY;
    }
}
