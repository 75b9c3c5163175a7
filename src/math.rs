//! Log-space arithmetic.

/// Returns `log(exp(a) + exp(b))` without overflow.
#[inline(always)]
pub fn logsumexp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY && b == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if a > b {
        a + (b - a).exp().ln_1p()
    } else {
        b + (a - b).exp().ln_1p()
    }
}

/// Returns `log(Σ exp(x))` for all items.
///
/// The maximum is factored out before summation, so a slice of large values does not overflow.
/// Returns `-inf` for an empty slice.
pub fn logsumexp_slice(xs: &[f64]) -> f64 {
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY || max.is_nan() {
        return max;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    let sum: f64 = xs.iter().map(|&x| (x - max).exp()).sum();
    max + sum.ln()
}

/// Add-k smoothed relative frequency in log space.
///
/// Computes `log((count + k) / (total + k * domain))`.
/// Returns `-inf` only when both `count` and `k` are zero.
#[inline(always)]
pub fn smoothed_log_prob(count: f64, total: f64, k: f64, domain: usize) -> f64 {
    let denominator = total + k * domain as f64;
    if denominator <= 0.0 {
        return f64::NEG_INFINITY;
    }
    ((count + k) / denominator).ln()
}
