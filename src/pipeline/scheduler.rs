//! Test-time augmentation scheduling under a wall-clock budget.
//!
//! Variants are admitted strictly in pool order. Identity always runs; every
//! later variant runs only if `elapsed + estimated cost <= budget`. The first
//! refusal ends the schedule: later, possibly cheaper, variants are never
//! considered.

use crate::domain::{AugmentationVariant, VariantPool};
use std::time::Duration;

/// Wall-clock budget shared by all passes of one run.
///
/// Consumption only ever grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBudget {
    total: Duration,
    consumed: Duration,
}

impl TimeBudget {
    pub fn new(total: Duration) -> Self {
        Self {
            total,
            consumed: Duration::ZERO,
        }
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn consumed(&self) -> Duration {
        self.consumed
    }

    pub fn remaining(&self) -> Duration {
        self.total.saturating_sub(self.consumed)
    }

    pub fn is_exhausted(&self) -> bool {
        self.consumed >= self.total
    }

    /// Records time spent.
    pub fn consume(&mut self, spent: Duration) {
        self.consumed = self.consumed.saturating_add(spent);
    }

    /// Equal share of the remaining budget for one of `parts` remaining consumers.
    pub fn share(&self, parts: usize) -> Duration {
        if parts == 0 {
            return self.remaining();
        }
        self.remaining() / parts.min(u32::MAX as usize) as u32
    }
}

/// Estimates the cost of the next pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CostEstimator {
    /// A constant estimate. `None` means unknown until the first measurement,
    /// which then becomes the constant.
    Fixed(Option<Duration>),
    /// Exponential moving average of measured latencies.
    ///
    /// `estimate' = alpha * measured + (1 - alpha) * estimate`; the first
    /// measurement seeds the average when no initial estimate is given.
    Smoothed {
        estimate: Option<Duration>,
        alpha: f64,
    },
}

impl CostEstimator {
    /// Default smoothing factor.
    pub const DEFAULT_ALPHA: f64 = 0.5;

    pub fn fixed(estimate: Duration) -> Self {
        Self::Fixed(Some(estimate))
    }

    /// A moving average; `alpha` is clamped to `(0, 1]`.
    pub fn smoothed(initial: Option<Duration>, alpha: f64) -> Self {
        let alpha = if alpha.is_finite() {
            alpha.clamp(f64::EPSILON, 1.0)
        } else {
            Self::DEFAULT_ALPHA
        };
        Self::Smoothed {
            estimate: initial,
            alpha,
        }
    }

    /// Current estimate, `None` while unknown.
    pub fn estimate(&self) -> Option<Duration> {
        match *self {
            Self::Fixed(estimate) => estimate,
            Self::Smoothed { estimate, .. } => estimate,
        }
    }

    /// Feeds one measured latency.
    pub fn update(&mut self, measured: Duration) {
        match self {
            Self::Fixed(estimate) => {
                estimate.get_or_insert(measured);
            }
            Self::Smoothed { estimate, alpha } => {
                *estimate = Some(match *estimate {
                    None => measured,
                    Some(previous) => Duration::from_secs_f64(
                        *alpha * measured.as_secs_f64() + (1.0 - *alpha) * previous.as_secs_f64(),
                    ),
                });
            }
        }
    }
}

impl Default for CostEstimator {
    fn default() -> Self {
        Self::smoothed(None, Self::DEFAULT_ALPHA)
    }
}

/// Incremental schedule: ask for the next variant, run it, report the latency.
///
/// ```text
/// while let Some(variant) = schedule.next_variant() {
///     let spent = run(variant);
///     schedule.record(spent);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DynamicSchedule {
    variants: Vec<AugmentationVariant>,
    budget: Duration,
    elapsed: Duration,
    estimator: CostEstimator,
    next: usize,
    stopped: bool,
}

impl DynamicSchedule {
    pub fn new(pool: &VariantPool, budget: Duration, estimator: CostEstimator) -> Self {
        Self {
            variants: pool.variants().to_vec(),
            budget,
            elapsed: Duration::ZERO,
            estimator,
            next: 0,
            stopped: false,
        }
    }

    /// The next admitted variant, or `None` once the pool is exhausted or a
    /// variant did not fit the budget.
    pub fn next_variant(&mut self) -> Option<AugmentationVariant> {
        if self.stopped {
            return None;
        }
        let variant = *self.variants.get(self.next)?;
        if !variant.is_identity()
            && let Some(estimate) = self.estimator.estimate()
            && self.elapsed.saturating_add(estimate) > self.budget
        {
            tracing::debug!(
                "Skipping {} and later variants: elapsed {:?} + estimate {:?} exceeds {:?}",
                variant,
                self.elapsed,
                estimate,
                self.budget
            );
            self.stopped = true;
            return None;
        }
        self.next += 1;
        Some(variant)
    }

    /// Records the latency of the last admitted variant.
    pub fn record(&mut self, spent: Duration) {
        self.elapsed = self.elapsed.saturating_add(spent);
        self.estimator.update(spent);
    }

    /// Ends the schedule early; remaining variants count as skipped.
    pub fn abandon(&mut self) {
        self.stopped = true;
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn estimator(&self) -> &CostEstimator {
        &self.estimator
    }

    /// Number of variants handed out so far.
    pub fn admitted(&self) -> usize {
        self.next
    }

    /// Number of variants that will not run.
    pub fn skipped(&self) -> usize {
        if self.stopped {
            self.variants.len() - self.next
        } else {
            0
        }
    }
}

/// Plans the variants to run with a fixed per-variant cost estimate.
///
/// Never fails and always contains identity.
pub fn schedule(pool: &VariantPool, budget: Duration, cost: Duration) -> Vec<AugmentationVariant> {
    let mut planner = DynamicSchedule::new(pool, budget, CostEstimator::fixed(cost));
    let mut plan = Vec::with_capacity(pool.len());
    while let Some(variant) = planner.next_variant() {
        plan.push(variant);
        planner.record(cost);
    }
    plan
}
