pub mod lbfgs;
pub mod momentum_sgd;
pub mod sgd;

/// Schedule of the learning rate of stochastic optimizers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LearningRateDecay {
    /// Keeps the initial learning rate.
    Constant,

    /// Divides the initial learning rate by `1 + t`, where `t` is the number of passes done so
    /// far including the fraction of the current one.
    Inverse,

    /// Multiplies the initial learning rate by `alpha^t`.
    Exponential(f64),
}

impl LearningRateDecay {
    #[inline(always)]
    pub(crate) fn factor(self, progress: f64) -> f64 {
        match self {
            Self::Constant => 1.0,
            Self::Inverse => 1.0 / (1.0 + progress),
            Self::Exponential(alpha) => alpha.powf(progress),
        }
    }
}

/// Returns `lambda / 2 * |w|^2`.
#[inline(always)]
pub fn l2_penalty(weights: &[f64], lambda: f64) -> f64 {
    let norm2: f64 = weights.iter().map(|w| w * w).sum();
    lambda * norm2 * 0.5
}

/// Result of an optimizer run.
pub struct Solution {
    pub weights: Vec<f64>,
    pub iterations: u64,
    pub loss: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decay_factor() {
        assert_eq!(1.0, LearningRateDecay::Constant.factor(3.5));
        assert!((LearningRateDecay::Inverse.factor(1.0) - 0.5).abs() < 1e-12);
        assert!((LearningRateDecay::Exponential(0.5).factor(2.0) - 0.25).abs() < 1e-12);
        assert_eq!(1.0, LearningRateDecay::Inverse.factor(0.0));
    }

    #[test]
    fn test_l2_penalty() {
        assert!((l2_penalty(&[3.0, -4.0], 0.1) - 1.25).abs() < 1e-12);
        assert_eq!(0.0, l2_penalty(&[3.0, -4.0], 0.0));
    }
}
