//! Exponential learning-rate decay.
//!
//! The rate is a pure function of the absolute epoch position at which the
//! current optimizer was created and the step counter since then. The
//! epoch position is held fixed for one optimizer's lifetime, so resuming
//! mid-stage continues the same decay curve instead of restarting it.

/// Per-epoch geometric decay factor.
pub const LR_DECAY: f64 = 0.99;

/// Linear scaling rule: base rate grows with total throughput so changing
/// the worker count or batch size does not silently change the effective
/// step size.
#[must_use]
pub fn base_rate_for(world_size: usize, batch_size: usize) -> f64 {
    1e-6 * world_size as f64 * batch_size as f64 / 16.0
}

/// Decayed rate at a given step offset from the optimizer's creation.
#[must_use]
pub fn rate_at(base_rate: f64, epoch_position: u64, step: u64, steps_per_epoch: u64) -> f64 {
    let exponent = epoch_position as f64 + step as f64 / steps_per_epoch as f64;
    base_rate * LR_DECAY.powf(exponent)
}

/// Stateful wrapper with one optimizer's lifetime: `epoch_position` is
/// fixed at construction and the step counter runs across every epoch of
/// the stage without resetting.
#[derive(Debug, Clone)]
pub struct LrSchedule {
    base_rate: f64,
    epoch_position: u64,
    steps_per_epoch: u64,
    step: u64,
}

impl LrSchedule {
    /// `epoch_position` is the absolute epoch at the moment the optimizer
    /// was (re)created: the later of the stage's start epoch and the
    /// resume epoch.
    #[must_use]
    pub fn new(base_rate: f64, epoch_position: u64, steps_per_epoch: u64) -> Self {
        Self { base_rate, epoch_position, steps_per_epoch, step: 0 }
    }

    /// Rate to use for the current step.
    #[must_use]
    pub fn current(&self) -> f64 {
        rate_at(self.base_rate, self.epoch_position, self.step, self.steps_per_epoch)
    }

    /// Advance past a completed step.
    pub fn advance(&mut self) {
        self.step += 1;
    }

    #[must_use]
    pub fn step(&self) -> u64 {
        self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_scaling_rule() {
        let rate = base_rate_for(4, 256);
        assert!((rate - 1e-6 * 4.0 * 256.0 / 16.0).abs() < 1e-12);
    }

    #[test]
    fn test_rate_is_monotone_non_increasing_over_steps() {
        let mut schedule = LrSchedule::new(1e-4, 5, 10);
        let mut previous = schedule.current();
        for _ in 0..50 {
            schedule.advance();
            let rate = schedule.current();
            assert!(rate <= previous);
            previous = rate;
        }
    }

    #[test]
    fn test_rate_is_monotone_non_increasing_over_epoch_position() {
        let mut previous = f64::INFINITY;
        for epoch in 0..20 {
            let rate = rate_at(1e-4, epoch, 3, 10);
            assert!(rate < previous);
            previous = rate;
        }
    }

    #[test]
    fn test_resumed_schedule_continues_the_curve() {
        // A fresh schedule advanced through 2 epochs of 10 steps matches a
        // schedule created at epoch position 2.
        let mut fresh = LrSchedule::new(1e-4, 0, 10);
        for _ in 0..20 {
            fresh.advance();
        }
        let resumed = LrSchedule::new(1e-4, 2, 10);
        assert!((fresh.current() - resumed.current()).abs() < 1e-15);
    }

    #[test]
    fn test_full_epoch_of_steps_equals_one_epoch_of_decay() {
        let start = rate_at(1e-3, 0, 0, 8);
        let after_epoch = rate_at(1e-3, 0, 8, 8);
        assert!((after_epoch - start * LR_DECAY).abs() < 1e-15);
    }
}
