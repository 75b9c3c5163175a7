use crate::crf;
use crate::math;

/// A training sequence whose features and labels are converted to IDs.
#[derive(Debug)]
pub struct Instance {
    pub feature_ids: Vec<Vec<u32>>,
    pub labels: Vec<u32>,
}

/// Buffers reused between sequences.
#[derive(Default)]
pub struct Workspace {
    state: Vec<f64>,
    alphas: Vec<f64>,
    betas: Vec<f64>,
}

/// Splits a parameter vector into feature weights and transition weights.
#[inline(always)]
pub fn split_params(param: &[f64], n_labels: usize) -> (&[f64], &[f64]) {
    let m = n_labels + 1;
    param.split_at(param.len() - m * m)
}

/// Runs the forward-backward algorithm and returns the log partition function.
pub fn calculate_alphas_betas(
    instance: &Instance,
    param: &[f64],
    n_labels: usize,
    ws: &mut Workspace,
) -> f64 {
    let (feature_weights, transition_weights) = split_params(param, n_labels);
    let m = n_labels + 1;
    let n = instance.labels.len();
    crf::state_scores(&instance.feature_ids, feature_weights, n_labels, &mut ws.state);
    ws.alphas.clear();
    ws.alphas.resize(n * n_labels, f64::NEG_INFINITY);
    ws.betas.clear();
    ws.betas.resize(n * n_labels, f64::NEG_INFINITY);
    if n == 0 {
        return transition_weights[0];
    }

    // alphas
    for l in 0..n_labels {
        ws.alphas[l] = transition_weights[l + 1] + ws.state[l];
    }
    for i in 1..n {
        for l in 0..n_labels {
            let mut score_total = f64::NEG_INFINITY;
            for p in 0..n_labels {
                let score = ws.alphas[(i - 1) * n_labels + p]
                    + transition_weights[(p + 1) * m + l + 1];
                score_total = math::logsumexp(score_total, score);
            }
            ws.alphas[i * n_labels + l] = score_total + ws.state[i * n_labels + l];
        }
    }

    // betas
    for l in 0..n_labels {
        ws.betas[(n - 1) * n_labels + l] = transition_weights[(l + 1) * m];
    }
    for i in (0..n - 1).rev() {
        for l in 0..n_labels {
            let mut score_total = f64::NEG_INFINITY;
            for q in 0..n_labels {
                let score = transition_weights[(l + 1) * m + q + 1]
                    + ws.state[(i + 1) * n_labels + q]
                    + ws.betas[(i + 1) * n_labels + q];
                score_total = math::logsumexp(score_total, score);
            }
            ws.betas[i * n_labels + l] = score_total;
        }
    }

    // alpha_0 holds the start transition and the first state score, beta_0 the rest
    let totals: Vec<f64> = ws.alphas[..n_labels]
        .iter()
        .zip(&ws.betas[..n_labels])
        .map(|(alpha, beta)| alpha + beta)
        .collect();
    math::logsumexp_slice(&totals)
}

/// Returns the negative log-likelihood of the gold labels.
///
/// Must be called after [`calculate_alphas_betas()`] with the same workspace.
pub fn calculate_loss(
    instance: &Instance,
    param: &[f64],
    n_labels: usize,
    ws: &Workspace,
    z: f64,
) -> f64 {
    let (_, transition_weights) = split_params(param, n_labels);
    z - crf::path_score(&ws.state, transition_weights, n_labels, &instance.labels)
}

/// Adds the gradient of the negative log-likelihood, i.e. the expected counts minus the observed
/// counts.
///
/// Must be called after [`calculate_alphas_betas()`] with the same workspace.
pub fn update_gradient(
    instance: &Instance,
    param: &[f64],
    n_labels: usize,
    ws: &Workspace,
    z: f64,
    gradients: &mut [f64],
) {
    let (feature_weights, transition_weights) = split_params(param, n_labels);
    let (feature_grads, transition_grads) = gradients.split_at_mut(feature_weights.len());
    let m = n_labels + 1;
    let n = instance.labels.len();

    for (i, fids) in instance.feature_ids.iter().enumerate() {
        for l in 0..n_labels {
            let prob = (ws.alphas[i * n_labels + l] + ws.betas[i * n_labels + l] - z).exp();
            for &fid in fids {
                feature_grads[fid as usize * n_labels + l] += prob;
            }
            if i == 0 {
                transition_grads[l + 1] += prob;
            }
            if i == n - 1 {
                transition_grads[(l + 1) * m] += prob;
            }
        }
    }
    for i in 1..n {
        for p in 0..n_labels {
            let alpha = ws.alphas[(i - 1) * n_labels + p];
            for l in 0..n_labels {
                let log_prob = alpha
                    + transition_weights[(p + 1) * m + l + 1]
                    + ws.state[i * n_labels + l]
                    + ws.betas[i * n_labels + l]
                    - z;
                transition_grads[(p + 1) * m + l + 1] += log_prob.exp();
            }
        }
    }

    let mut prev = 0;
    for (fids, &label) in instance.feature_ids.iter().zip(&instance.labels) {
        let label = label as usize;
        for &fid in fids {
            feature_grads[fid as usize * n_labels + label] -= 1.0;
        }
        transition_grads[prev * m + label + 1] -= 1.0;
        prev = label + 1;
    }
    transition_grads[prev * m] -= 1.0;
}
