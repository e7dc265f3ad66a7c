use serde::{Deserialize, Serialize};

/// Loss scaler for reduced-precision arithmetic.
///
/// Scales losses up before backpropagation and gradients back down before
/// the optimizer update; shrinks the scale when non-finite gradients
/// appear and grows it again after a long run of clean steps. Scaler
/// state is not checkpointed: a resumed run restarts scaling from these
/// defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradScaler {
    scale: f32,
    growth_factor: f32,
    backoff_factor: f32,
    growth_interval: u32,
    growth_tracker: u32,
}

impl Default for GradScaler {
    fn default() -> Self {
        Self {
            scale: 65_536.0,
            growth_factor: 2.0,
            backoff_factor: 0.5,
            growth_interval: 2_000,
            growth_tracker: 0,
        }
    }
}

impl GradScaler {
    /// Current loss scale factor.
    #[must_use]
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Divide scaled gradients back to true magnitude, reporting whether
    /// any were non-finite. Callers must skip the optimizer update when
    /// this returns true.
    pub fn unscale(&self, grads: &mut [f32]) -> bool {
        let inv = 1.0 / self.scale;
        let mut found_inf = false;
        for grad in grads {
            if !grad.is_finite() {
                found_inf = true;
            }
            *grad *= inv;
        }
        found_inf
    }

    /// Advance growth/backoff state after a step. On overflow the scale
    /// halves immediately; otherwise it doubles once per clean
    /// `growth_interval` steps.
    pub fn update(&mut self, found_inf: bool) {
        if found_inf {
            self.scale *= self.backoff_factor;
            self.growth_tracker = 0;
        } else {
            self.growth_tracker += 1;
            if self.growth_tracker >= self.growth_interval {
                self.scale *= self.growth_factor;
                self.growth_tracker = 0;
            }
        }
    }
}
