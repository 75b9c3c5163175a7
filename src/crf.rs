//! Linear-chain conditional random field labeler.

mod feature;
mod forward_backward;
mod optimizers;
mod trainer;

use bincode::{Decode, Encode};

use crate::errors::{Result, RuseqError};
use crate::model::{Model, ModelKind};
use crate::symbols::SymbolTable;

pub use feature::FeatureTemplate;
pub use optimizers::LearningRateDecay;
pub use trainer::CrfTrainer;

/// Optimization method.
#[derive(Clone, Copy, Debug, Decode, Encode, PartialEq)]
pub enum Method {
    /// Plain stochastic gradient descent on the negative log-likelihood.
    Sgd,

    /// Stochastic gradient descent with the given momentum coefficient.
    Momentum(f64),

    /// Full-batch L-BFGS.
    Lbfgs,
}

/// Information recorded at training time.
#[derive(Clone, Debug, Default, Decode, Encode, PartialEq)]
pub struct CrfMetadata {
    /// Number of training examples.
    pub training_size: usize,

    /// Optimization method, or `None` for an untrained model.
    pub method: Option<Method>,

    /// Number of iterations.
    pub iterations: u64,

    /// L2 regularization coefficient.
    pub regularization: f64,

    /// Initial learning rate.
    pub learning_rate: f64,

    /// Negative log-likelihood of the training set plus the L2 penalty, observed in the last
    /// iteration.
    pub final_loss: Option<f64>,
}

/// Linear-chain CRF.
///
/// The score of a labeling is the sum of the weights of all (feature, label) pairs at each
/// position plus the weights of all label transitions, including the transitions from the start
/// and to the end of the sequence. Pairs without a weight score 0.
#[derive(Clone, Debug, Decode, Encode)]
pub struct CrfModel {
    labels: SymbolTable,
    features: SymbolTable,

    // features.len() x labels.len()
    feature_weights: Vec<f64>,

    // (labels.len() + 1) x (labels.len() + 1), where index 0 is the sequence boundary and
    // label `l` takes index `l + 1`.
    transition_weights: Vec<f64>,

    template: FeatureTemplate,
    metadata: CrfMetadata,
}

impl CrfModel {
    /// Creates a model with zero weights over the given labels.
    ///
    /// # Errors
    ///
    /// `labels` must not be empty.
    pub fn new<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels = SymbolTable::new(labels);
        if labels.is_empty() {
            return Err(RuseqError::invalid_hyperparameter(
                "labels",
                "must not be empty",
            ));
        }
        let m = labels.len() + 1;
        Ok(Self {
            labels,
            features: SymbolTable::default(),
            feature_weights: vec![],
            transition_weights: vec![0.0; m * m],
            template: FeatureTemplate::new(),
            metadata: CrfMetadata::default(),
        })
    }

    /// Replaces the feature template.
    ///
    /// Templates are only meaningful before training, because learned weights refer to the
    /// names of extracted features.
    pub fn with_template(mut self, template: FeatureTemplate) -> Self {
        self.template = template;
        self
    }

    /// Returns the label set.
    pub fn labels(&self) -> &SymbolTable {
        &self.labels
    }

    /// Returns the features that have weights.
    pub fn features(&self) -> &SymbolTable {
        &self.features
    }

    /// Returns the feature template.
    pub fn template(&self) -> &FeatureTemplate {
        &self.template
    }

    /// Returns the training metadata.
    pub fn metadata(&self) -> &CrfMetadata {
        &self.metadata
    }

    /// Returns the weight of a (feature, label) pair.
    ///
    /// Unknown features have weight 0. Returns `None` if the label is unknown.
    pub fn feature_weight(&self, feature: &str, label: &str) -> Option<f64> {
        let label = self.labels.get(label)? as usize;
        Some(self.features.get(feature).map_or(0.0, |f| {
            self.feature_weights[f as usize * self.labels.len() + label]
        }))
    }

    /// Returns the weight of a label transition.
    ///
    /// `None` stands for the sequence boundary. Returns `None` if a label is unknown.
    pub fn transition_weight(&self, prev: Option<&str>, next: Option<&str>) -> Option<f64> {
        let prev = self.boundary_index(prev)?;
        let next = self.boundary_index(next)?;
        Some(self.transition_weights[prev * (self.labels.len() + 1) + next])
    }

    fn boundary_index(&self, label: Option<&str>) -> Option<usize> {
        match label {
            Some(label) => self.labels.get(label).map(|l| l as usize + 1),
            None => Some(0),
        }
    }

    /// Labels a sequence of externally extracted feature lists.
    ///
    /// The template of the model is bypassed. Returns an empty sequence for empty input.
    pub fn predict_features<S>(&self, features: &[Vec<S>]) -> Vec<String>
    where
        S: AsRef<str>,
    {
        let feature_ids = self.lookup_features(features);
        let mut state = vec![];
        state_scores(
            &feature_ids,
            &self.feature_weights,
            self.labels.len(),
            &mut state,
        );
        viterbi(&state, &self.transition_weights, self.labels.len())
            .into_iter()
            .map(|l| self.labels.name(l).to_string())
            .collect()
    }

    /// Returns the score of the given labeling.
    ///
    /// # Errors
    ///
    /// - [`RuseqError::DimensionMismatch`] if the lengths differ.
    /// - [`RuseqError::UnknownLabel`] if a label is outside the label set.
    pub fn score<S, T>(&self, tokens: &[S], labels: &[T]) -> Result<f64>
    where
        S: AsRef<str>,
        T: AsRef<str>,
    {
        if tokens.len() != labels.len() {
            return Err(RuseqError::dimension_mismatch(0, tokens.len(), labels.len()));
        }
        let labels = labels
            .iter()
            .map(|label| {
                self.labels
                    .get(label.as_ref())
                    .ok_or_else(|| RuseqError::unknown_label(label.as_ref()))
            })
            .collect::<Result<Vec<u32>>>()?;
        let feature_ids = self.lookup_features(&self.template.extract(tokens));
        let mut state = vec![];
        state_scores(
            &feature_ids,
            &self.feature_weights,
            self.labels.len(),
            &mut state,
        );
        Ok(path_score(
            &state,
            &self.transition_weights,
            self.labels.len(),
            &labels,
        ))
    }

    fn lookup_features<S>(&self, features: &[Vec<S>]) -> Vec<Vec<u32>>
    where
        S: AsRef<str>,
    {
        features
            .iter()
            .map(|fs| {
                fs.iter()
                    .filter_map(|f| self.features.get(f.as_ref()))
                    .collect()
            })
            .collect()
    }
}

impl Model for CrfModel {
    type Output = Vec<String>;

    const KIND: ModelKind = ModelKind::Crf;

    /// Labels the tokens with the Viterbi algorithm.
    ///
    /// Returns an empty sequence for empty input.
    fn predict<S>(&self, tokens: &[S]) -> Result<Vec<String>>
    where
        S: AsRef<str>,
    {
        Ok(self.predict_features(&self.template.extract(tokens)))
    }

    fn validate(&self) -> Result<()> {
        let n_labels = self.labels.len();
        if n_labels == 0 {
            return Err(RuseqError::serialization("empty label set"));
        }
        if self.feature_weights.len() != self.features.len() * n_labels {
            return Err(RuseqError::serialization("invalid feature weight size"));
        }
        if self.transition_weights.len() != (n_labels + 1) * (n_labels + 1) {
            return Err(RuseqError::serialization("invalid transition weight size"));
        }
        if !self
            .feature_weights
            .iter()
            .chain(&self.transition_weights)
            .all(|w| w.is_finite())
        {
            return Err(RuseqError::serialization("non-finite weight"));
        }
        Ok(())
    }
}

/// Fills `state` with the score of each (position, label) pair.
pub(crate) fn state_scores(
    feature_ids: &[Vec<u32>],
    feature_weights: &[f64],
    n_labels: usize,
    state: &mut Vec<f64>,
) {
    state.clear();
    state.resize(feature_ids.len() * n_labels, 0.0);
    for (fids, scores) in feature_ids.iter().zip(state.chunks_mut(n_labels)) {
        for &fid in fids {
            let weights = &feature_weights[fid as usize * n_labels..(fid as usize + 1) * n_labels];
            for (s, w) in scores.iter_mut().zip(weights) {
                *s += w;
            }
        }
    }
}

/// Returns the score of a labeling.
pub(crate) fn path_score(
    state: &[f64],
    transition_weights: &[f64],
    n_labels: usize,
    labels: &[u32],
) -> f64 {
    if labels.is_empty() {
        return transition_weights[0];
    }
    let m = n_labels + 1;
    let mut score = 0.0;
    let mut prev = 0;
    for (i, &label) in labels.iter().enumerate() {
        let curr = label as usize + 1;
        score += transition_weights[prev * m + curr] + state[i * n_labels + label as usize];
        prev = curr;
    }
    score + transition_weights[prev * m]
}

/// Finds the best labeling.
///
/// Ties are resolved in favour of the smaller label ID.
pub(crate) fn viterbi(state: &[f64], transition_weights: &[f64], n_labels: usize) -> Vec<u32> {
    let n = state.len() / n_labels;
    if n == 0 {
        return vec![];
    }
    let m = n_labels + 1;
    let mut best_scores = vec![f64::NEG_INFINITY; n * n_labels];
    let mut backs = vec![0u32; n * n_labels];

    for l in 0..n_labels {
        best_scores[l] = transition_weights[l + 1] + state[l];
    }
    for i in 1..n {
        for l in 0..n_labels {
            let mut best_score = f64::NEG_INFINITY;
            let mut best_prev = 0;
            for p in 0..n_labels {
                let score = best_scores[(i - 1) * n_labels + p]
                    + transition_weights[(p + 1) * m + l + 1];
                if score > best_score {
                    best_score = score;
                    best_prev = p;
                }
            }
            best_scores[i * n_labels + l] = best_score + state[i * n_labels + l];
            backs[i * n_labels + l] = best_prev as u32;
        }
    }

    let mut best_score = f64::NEG_INFINITY;
    let mut best_last = 0;
    for l in 0..n_labels {
        let score = best_scores[(n - 1) * n_labels + l] + transition_weights[(l + 1) * m];
        if score > best_score {
            best_score = score;
            best_last = l;
        }
    }

    let mut path = vec![0; n];
    let mut label = best_last as u32;
    for i in (0..n).rev() {
        path[i] = label;
        label = backs[i * n_labels + label as usize];
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    use crate::model::Train;
    use crate::test_utils;

    fn enumerate_paths(n: usize, n_labels: usize) -> Vec<Vec<u32>> {
        let mut paths = vec![vec![]];
        for _ in 0..n {
            let mut next = vec![];
            for path in paths {
                for l in 0..n_labels as u32 {
                    let mut p: Vec<u32> = path.clone();
                    p.push(l);
                    next.push(p);
                }
            }
            paths = next;
        }
        paths
    }

    #[test]
    fn test_viterbi_matches_brute_force() {
        let n_labels = 3;
        let state = vec![
            1.0, 0.5, -0.3, //
            0.2, 2.0, 0.1, //
            -1.0, 0.3, 0.9, //
            0.0, 0.4, 0.4,
        ];
        let transition_weights = vec![
            0.0, 0.1, -0.5, 0.3, //
            0.2, -1.0, 1.5, 0.0, //
            -0.4, 0.6, -0.2, 0.8, //
            0.1, 0.0, 0.3, -0.7,
        ];
        let path = viterbi(&state, &transition_weights, n_labels);

        let mut best = f64::NEG_INFINITY;
        let mut best_path = vec![];
        for p in enumerate_paths(4, n_labels) {
            let score = path_score(&state, &transition_weights, n_labels, &p);
            if score > best {
                best = score;
                best_path = p;
            }
        }
        assert_eq!(best_path, path);
    }

    #[test]
    fn test_viterbi_ties_prefer_smaller_ids() {
        let state = vec![0.0; 6];
        let transition_weights = vec![0.0; 9];
        assert_eq!(vec![0, 0, 0], viterbi(&state, &transition_weights, 2));
    }

    #[test]
    fn test_new() {
        assert!(matches!(
            CrfModel::new(Vec::<String>::new()),
            Err(RuseqError::InvalidHyperparameter(_))
        ));
        let model = CrfModel::new(["person", "O", "org"]).unwrap();
        assert_eq!(3, model.labels().len());
        assert_eq!(Some(0.0), model.feature_weight("w=John", "person"));
        assert_eq!(None, model.feature_weight("w=John", "location"));
        assert_eq!(Some(0.0), model.transition_weight(None, Some("O")));
        assert_eq!(None, model.metadata().method);
    }

    #[test]
    fn test_untrained_model_predicts_known_labels() {
        let model = CrfModel::new(["O", "person"]).unwrap();
        let labels = model.predict(&["John", "Smith", "said"]).unwrap();
        assert_eq!(vec!["O", "O", "O"], labels);
    }

    #[test]
    fn test_output_length() {
        let model = CrfTrainer::new()
            .max_iter(10)
            .unwrap()
            .train(&test_utils::entity_examples())
            .unwrap();
        let tokens: [&str; 0] = [];
        assert!(model.predict(&tokens).unwrap().is_empty());
        for tokens in test_utils::held_out_sentences() {
            let labels = model.predict(&tokens).unwrap();
            assert_eq!(tokens.len(), labels.len());
            for label in &labels {
                assert!(model.labels().contains(label));
            }
        }
    }

    #[test]
    fn test_score_of_predicted_path_is_maximal() {
        let model = CrfTrainer::new()
            .max_iter(10)
            .unwrap()
            .train(&test_utils::entity_examples())
            .unwrap();
        let tokens = ["Mary", "visited", "Acme"];
        let best = model.predict(&tokens).unwrap();
        let best_score = model.score(&tokens, &best).unwrap();
        let labels: Vec<&str> = model.labels().iter().collect();
        for path in enumerate_paths(tokens.len(), labels.len()) {
            let path: Vec<&str> = path.iter().map(|&l| labels[l as usize]).collect();
            assert!(model.score(&tokens, &path).unwrap() <= best_score + 1e-12);
        }
    }

    #[test]
    fn test_score_errors() {
        let model = CrfModel::new(["O", "person"]).unwrap();
        assert!(matches!(
            model.score(&["a", "b"], &["O"]),
            Err(RuseqError::DimensionMismatch(_))
        ));
        assert!(matches!(
            model.score(&["a"], &["org"]),
            Err(RuseqError::UnknownLabel(_))
        ));
    }

    #[test]
    fn test_predict_features() {
        let model = CrfTrainer::new()
            .max_iter(10)
            .unwrap()
            .train(&test_utils::entity_examples())
            .unwrap();
        let tokens = ["Mary", "Jones", "joined"];
        let features = model.template().extract(&tokens);
        assert_eq!(
            model.predict(&tokens).unwrap(),
            model.predict_features(&features)
        );
    }

    #[test]
    fn test_round_trip() {
        let model = CrfTrainer::new()
            .max_iter(10)
            .unwrap()
            .train(&test_utils::entity_examples())
            .unwrap();
        let mut buf = vec![];
        model.write(&mut buf).unwrap();
        let restored = CrfModel::read(Cursor::new(&buf)).unwrap();

        assert_eq!(model.metadata(), restored.metadata());
        assert_eq!(model.template(), restored.template());
        for tokens in test_utils::held_out_sentences() {
            assert_eq!(
                model.predict(&tokens).unwrap(),
                restored.predict(&tokens).unwrap()
            );
        }
    }

    #[test]
    fn test_corrupt_data() {
        let model = CrfModel::new(["O", "person"]).unwrap();
        let mut buf = vec![];
        model.write(&mut buf).unwrap();
        assert!(matches!(
            CrfModel::read(&buf[..buf.len() - 1]),
            Err(RuseqError::Serialization(_))
        ));
        let mut bad_version = buf.clone();
        bad_version[6] = 99;
        assert!(matches!(
            CrfModel::read(&bad_version[..]),
            Err(RuseqError::Serialization(_))
        ));
    }
}
