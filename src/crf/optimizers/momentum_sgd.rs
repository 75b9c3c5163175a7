//! Stochastic gradient descent with momentum.

use argmin_math::{ArgminAdd, ArgminMul, ArgminSub};
use log::info;
use rand::rngs::StdRng;

use crate::crf::optimizers::{l2_penalty, LearningRateDecay, Solution};
use crate::crf::trainer::CrfLoss;

#[allow(clippy::too_many_arguments)]
pub fn optimize(
    mut loss_function: CrfLoss,
    weights_init: Vec<f64>,
    lambda: f64,
    max_iter: u64,

    // Momentum SGD parameters
    batch_size: usize,
    momentum: f64,
    eta: f64,
    learning_rate_decay: LearningRateDecay,
    rng: &mut StdRng,
) -> Solution {
    let n = loss_function.len();
    let mut weights = weights_init;
    let mut velocity = vec![0.0; weights.len()];
    let mut epoch_loss = 0.0;

    for epoch in 0..max_iter {
        loss_function.shuffle(rng);
        epoch_loss = 0.0;
        let mut start = 0;
        while start < n {
            let range = start..n.min(start + batch_size);
            let learning_rate =
                eta * learning_rate_decay.factor(epoch as f64 + start as f64 / n as f64);
            let (batch_loss, grad) = loss_function.gradient_partial(&weights, range.clone());
            epoch_loss += batch_loss;

            let reg_factor = learning_rate * lambda * range.len() as f64 / n as f64;
            velocity = velocity.mul(&momentum).sub(&grad.mul(&learning_rate));
            weights = weights.add(&velocity).sub(&weights.mul(&reg_factor));
            start += batch_size;
        }
        epoch_loss += l2_penalty(&weights, lambda);
        info!("epoch={}, loss={epoch_loss}", epoch + 1);
    }

    Solution {
        weights,
        iterations: max_iter,
        loss: Some(epoch_loss),
    }
}
