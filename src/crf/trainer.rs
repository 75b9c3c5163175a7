use core::ops::Range;

use argmin::core::{CostFunction, Gradient};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::crf::forward_backward::{self, Instance, Workspace};
use crate::crf::optimizers::{self, lbfgs, momentum_sgd, sgd, LearningRateDecay, Solution};
use crate::crf::{CrfMetadata, CrfModel, FeatureTemplate, Method};
use crate::errors::{Result, RuseqError};
use crate::model::{TaggedSequence, Train};
use crate::symbols::SymbolTable;
use crate::utils::{self, Merge};

/// Loss and gradient accumulated over a part of the training set.
struct Partial {
    loss: f64,

    // empty when only the loss is needed
    gradients: Vec<f64>,

    ws: Workspace,
}

impl Partial {
    fn new(dim: usize) -> Self {
        Self {
            loss: 0.0,
            gradients: vec![0.0; dim],
            ws: Workspace::default(),
        }
    }

    fn add(&mut self, instance: &Instance, param: &[f64], n_labels: usize) {
        let z = forward_backward::calculate_alphas_betas(instance, param, n_labels, &mut self.ws);
        self.loss += forward_backward::calculate_loss(instance, param, n_labels, &self.ws, z);
        if !self.gradients.is_empty() {
            forward_backward::update_gradient(
                instance,
                param,
                n_labels,
                &self.ws,
                z,
                &mut self.gradients,
            );
        }
    }
}

impl Merge for Partial {
    fn merge(&mut self, other: Self) {
        self.loss += other.loss;
        self.gradients.merge(other.gradients);
    }
}

/// Negative log-likelihood of the training set.
pub struct CrfLoss<'a> {
    instances: &'a [Instance],
    order: Vec<usize>,
    n_labels: usize,
    n_threads: usize,
    l2_lambda: Option<f64>,
}

impl<'a> CrfLoss<'a> {
    pub fn new(
        instances: &'a [Instance],
        n_labels: usize,
        n_threads: usize,
        l2_lambda: Option<f64>,
    ) -> Self {
        Self {
            instances,
            order: (0..instances.len()).collect(),
            n_labels,
            n_threads,
            l2_lambda,
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Shuffles the order in which mini-batches visit the instances.
    pub fn shuffle(&mut self, rng: &mut StdRng) {
        self.order.shuffle(rng);
    }

    fn accumulate(&self, param: &[f64], order: &[usize], dim: usize) -> Partial {
        utils::map_reduce(
            order,
            self.n_threads,
            || Partial::new(dim),
            |partial, &i| partial.add(&self.instances[i], param, self.n_labels),
        )
    }

    /// Returns the loss without the penalty term.
    pub fn loss(&self, param: &[f64]) -> f64 {
        self.accumulate(param, &self.order, 0).loss
    }

    /// Returns the loss and the gradient of the instances in `range` of the current order.
    ///
    /// The penalty term is not included.
    pub fn gradient_partial(&self, param: &[f64], range: Range<usize>) -> (f64, Vec<f64>) {
        let partial = self.accumulate(param, &self.order[range], param.len());
        (partial.loss, partial.gradients)
    }

    fn penalty(&self, param: &[f64]) -> f64 {
        self.l2_lambda
            .map_or(0.0, |lambda| optimizers::l2_penalty(param, lambda))
    }
}

impl CostFunction for CrfLoss<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let loss = self.loss(param) + self.penalty(param);
        debug!("loss = {loss}");
        Ok(loss)
    }
}

impl Gradient for CrfLoss<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let mut gradients = self.accumulate(param, &self.order, param.len()).gradients;
        if let Some(lambda) = self.l2_lambda {
            for (g, p) in gradients.iter_mut().zip(param) {
                *g += lambda * *p;
            }
        }
        Ok(gradients)
    }
}

/// Trainer for [`CrfModel`].
pub struct CrfTrainer {
    max_iter: u64,
    method: Method,
    lambda: f64,
    learning_rate: f64,
    learning_rate_decay: LearningRateDecay,
    batch_size: usize,
    n_threads: usize,
    seed: u64,
    template: FeatureTemplate,
}

impl CrfTrainer {
    /// Creates a new trainer.
    ///
    /// The defaults are 100 passes of plain SGD with a constant learning rate of 0.1, an L2
    /// coefficient of 0.01, and a batch size of 1.
    pub fn new() -> Self {
        Self {
            max_iter: 100,
            method: Method::Sgd,
            lambda: 0.01,
            learning_rate: 0.1,
            learning_rate_decay: LearningRateDecay::Constant,
            batch_size: 1,
            n_threads: 1,
            seed: 0,
            template: FeatureTemplate::new(),
        }
    }

    /// Sets the number of passes over the training set.
    ///
    /// # Errors
    ///
    /// `max_iter` must not be 0.
    pub fn max_iter(mut self, max_iter: u64) -> Result<Self> {
        if max_iter == 0 {
            return Err(RuseqError::invalid_hyperparameter(
                "max_iter",
                "must not be 0",
            ));
        }
        self.max_iter = max_iter;
        Ok(self)
    }

    /// Sets the optimization method.
    ///
    /// # Errors
    ///
    /// The momentum coefficient must be in `[0, 1)`.
    pub fn method(mut self, method: Method) -> Result<Self> {
        if let Method::Momentum(momentum) = method {
            if !(0.0..1.0).contains(&momentum) {
                return Err(RuseqError::invalid_hyperparameter(
                    "momentum",
                    "must be in [0, 1)",
                ));
            }
        }
        self.method = method;
        Ok(self)
    }

    /// Sets the L2 regularization coefficient.
    ///
    /// # Errors
    ///
    /// `lambda` must be a non-negative finite number.
    pub fn regularization(mut self, lambda: f64) -> Result<Self> {
        if !(lambda >= 0.0 && lambda.is_finite()) {
            return Err(RuseqError::invalid_hyperparameter(
                "regularization",
                "must be a non-negative finite number",
            ));
        }
        self.lambda = lambda;
        Ok(self)
    }

    /// Sets the initial learning rate of stochastic methods.
    ///
    /// # Errors
    ///
    /// `learning_rate` must be a positive finite number.
    pub fn learning_rate(mut self, learning_rate: f64) -> Result<Self> {
        if !(learning_rate > 0.0 && learning_rate.is_finite()) {
            return Err(RuseqError::invalid_hyperparameter(
                "learning_rate",
                "must be a positive finite number",
            ));
        }
        self.learning_rate = learning_rate;
        Ok(self)
    }

    /// Sets the learning rate schedule of stochastic methods.
    ///
    /// # Errors
    ///
    /// The base of [`LearningRateDecay::Exponential`] must be in `(0, 1]`.
    pub fn learning_rate_decay(mut self, decay: LearningRateDecay) -> Result<Self> {
        if let LearningRateDecay::Exponential(alpha) = decay {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(RuseqError::invalid_hyperparameter(
                    "learning_rate_decay",
                    "the base must be in (0, 1]",
                ));
            }
        }
        self.learning_rate_decay = decay;
        Ok(self)
    }

    /// Sets the number of examples in a mini-batch.
    ///
    /// # Errors
    ///
    /// `batch_size` must not be 0.
    pub fn batch_size(mut self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(RuseqError::invalid_hyperparameter(
                "batch_size",
                "must not be 0",
            ));
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    /// Sets the number of threads used for computing gradients.
    ///
    /// # Errors
    ///
    /// `n_threads` must not be 0.
    pub fn n_threads(mut self, n_threads: usize) -> Result<Self> {
        if n_threads == 0 {
            return Err(RuseqError::invalid_hyperparameter(
                "n_threads",
                "must not be 0",
            ));
        }
        self.n_threads = n_threads;
        Ok(self)
    }

    /// Sets the seed of the example shuffling.
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the feature template of models created by [`Train::train()`].
    pub fn template(mut self, template: FeatureTemplate) -> Self {
        self.template = template;
        self
    }

    /// Continues training of the given model.
    ///
    /// Features that appear in the examples but not in the model are added with zero weights.
    /// Existing weights are used as the starting point. After training, features whose weights
    /// are all zero are removed.
    ///
    /// # Errors
    ///
    /// - [`RuseqError::EmptyTrainingSet`] if `examples` holds no token.
    /// - [`RuseqError::DimensionMismatch`] if tokens and labels of an example differ in length.
    /// - [`RuseqError::UnknownLabel`] if a label is outside the label set of the model.
    /// - [`RuseqError::Optimization`] if L-BFGS fails.
    pub fn train_model(&self, model: CrfModel, examples: &[TaggedSequence]) -> Result<CrfModel> {
        TaggedSequence::check_dimensions(examples)?;
        let mut label_ids = Vec::with_capacity(examples.len());
        for example in examples {
            let ids = example
                .tags
                .iter()
                .map(|tag| {
                    model
                        .labels
                        .get(tag)
                        .ok_or_else(|| RuseqError::unknown_label(tag.as_str()))
                })
                .collect::<Result<Vec<u32>>>()?;
            label_ids.push(ids);
        }

        let extracted: Vec<Vec<Vec<String>>> = examples
            .iter()
            .filter(|example| !example.tokens.is_empty())
            .map(|example| model.template.extract(&example.tokens))
            .collect();
        if extracted.is_empty() {
            return Err(RuseqError::EmptyTrainingSet);
        }
        let features = model.features.union(&SymbolTable::new(
            extracted.iter().flatten().flatten().map(String::as_str),
        ));
        let instances: Vec<Instance> = extracted
            .iter()
            .zip(label_ids.into_iter().filter(|ids| !ids.is_empty()))
            .map(|(fs, labels)| Instance {
                feature_ids: fs
                    .iter()
                    .map(|fs| fs.iter().filter_map(|f| features.get(f)).collect())
                    .collect(),
                labels,
            })
            .collect();

        let n_labels = model.labels.len();
        let mut weights_init = vec![0.0; features.len() * n_labels];
        for (fid, name) in model.features.iter().enumerate() {
            if let Some(new_fid) = features.get(name) {
                let new_fid = new_fid as usize;
                weights_init[new_fid * n_labels..(new_fid + 1) * n_labels].copy_from_slice(
                    &model.feature_weights[fid * n_labels..(fid + 1) * n_labels],
                );
            }
        }
        weights_init.extend_from_slice(&model.transition_weights);
        debug!(
            "training CRF: instances={}, labels={}, features={}, weights={}",
            instances.len(),
            n_labels,
            features.len(),
            weights_init.len()
        );

        let mut rng = StdRng::seed_from_u64(self.seed);
        let solution = match self.method {
            Method::Sgd => sgd::optimize(
                CrfLoss::new(&instances, n_labels, self.n_threads, None),
                weights_init,
                self.lambda,
                self.max_iter,
                self.batch_size,
                self.learning_rate,
                self.learning_rate_decay,
                &mut rng,
            ),
            Method::Momentum(momentum) => momentum_sgd::optimize(
                CrfLoss::new(&instances, n_labels, self.n_threads, None),
                weights_init,
                self.lambda,
                self.max_iter,
                self.batch_size,
                momentum,
                self.learning_rate,
                self.learning_rate_decay,
                &mut rng,
            ),
            Method::Lbfgs => lbfgs::optimize(
                CrfLoss::new(&instances, n_labels, self.n_threads, Some(self.lambda)),
                weights_init,
                self.max_iter,
            )?,
        };

        let model = Self::build_model(model, features, solution, examples.len(), self);
        info!(
            "trained CRF: method={:?}, iterations={}, features={}, loss={:?}",
            self.method,
            model.metadata.iterations,
            model.features.len(),
            model.metadata.final_loss
        );
        Ok(model)
    }

    fn build_model(
        model: CrfModel,
        features: SymbolTable,
        solution: Solution,
        training_size: usize,
        settings: &Self,
    ) -> CrfModel {
        let n_labels = model.labels.len();
        let (feature_weights, transition_weights) =
            forward_backward::split_params(&solution.weights, n_labels);

        let mut kept_names = vec![];
        let mut kept_weights = vec![];
        for (name, row) in features.iter().zip(feature_weights.chunks(n_labels)) {
            if row.iter().any(|w| w.abs() > f64::EPSILON) {
                kept_names.push(name);
                kept_weights.extend_from_slice(row);
            }
        }

        CrfModel {
            labels: model.labels,
            features: SymbolTable::new(kept_names),
            feature_weights: kept_weights,
            transition_weights: transition_weights.to_vec(),
            template: model.template,
            metadata: CrfMetadata {
                training_size,
                method: Some(settings.method),
                iterations: solution.iterations,
                regularization: settings.lambda,
                learning_rate: settings.learning_rate,
                final_loss: solution.loss,
            },
        }
    }
}

impl Default for CrfTrainer {
    fn default() -> Self {
        Self::new()
    }
}

impl Train for CrfTrainer {
    type Example = TaggedSequence;
    type Model = CrfModel;

    /// Trains a new model over the labels appearing in the examples.
    ///
    /// # Errors
    ///
    /// See [`CrfTrainer::train_model()`].
    fn train(&self, examples: &[TaggedSequence]) -> Result<CrfModel> {
        TaggedSequence::check_dimensions(examples)?;
        let labels: Vec<&str> = examples
            .iter()
            .flat_map(|e| e.tags.iter().map(String::as_str))
            .collect();
        if labels.is_empty() {
            return Err(RuseqError::EmptyTrainingSet);
        }
        let model = CrfModel::new(labels)?.with_template(self.template.clone());
        self.train_model(model, examples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::Model;
    use crate::test_utils;

    #[test]
    fn test_invalid_hyperparameters() {
        assert!(CrfTrainer::new().max_iter(0).is_err());
        assert!(CrfTrainer::new().method(Method::Momentum(1.0)).is_err());
        assert!(CrfTrainer::new().method(Method::Momentum(-0.1)).is_err());
        assert!(CrfTrainer::new().regularization(-0.1).is_err());
        assert!(CrfTrainer::new().regularization(f64::INFINITY).is_err());
        assert!(CrfTrainer::new().learning_rate(0.0).is_err());
        assert!(CrfTrainer::new()
            .learning_rate_decay(LearningRateDecay::Exponential(1.5))
            .is_err());
        assert!(CrfTrainer::new().batch_size(0).is_err());
        assert!(CrfTrainer::new().n_threads(0).is_err());
        assert!(CrfTrainer::new().method(Method::Momentum(0.9)).is_ok());
        assert!(CrfTrainer::new().regularization(0.0).is_ok());
    }

    #[test]
    fn test_empty_training_set() {
        assert!(matches!(
            CrfTrainer::new().train(&[]),
            Err(RuseqError::EmptyTrainingSet)
        ));
        let examples = vec![TaggedSequence::new(Vec::<String>::new(), Vec::<String>::new())];
        assert!(matches!(
            CrfTrainer::new().train(&examples),
            Err(RuseqError::EmptyTrainingSet)
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut examples = test_utils::entity_examples();
        examples[1].tags.pop();
        match CrfTrainer::new().train(&examples) {
            Err(RuseqError::DimensionMismatch(e)) => {
                assert_eq!(1, e.index);
                assert_eq!(7, e.tokens);
                assert_eq!(6, e.labels);
            }
            r => panic!("unexpected result: {r:?}"),
        }
    }

    #[test]
    fn test_unknown_label() {
        let model = CrfModel::new(["O", "person"]).unwrap();
        match CrfTrainer::new().train_model(model, &test_utils::entity_examples()) {
            Err(RuseqError::UnknownLabel(e)) => assert_eq!("org", e.label),
            r => panic!("unexpected result: {r:?}"),
        }
    }

    #[test]
    fn test_capitalized_span_gets_known_labels() {
        let model = CrfTrainer::new()
            .max_iter(10)
            .unwrap()
            .train(&test_utils::entity_examples())
            .unwrap();
        let labels = model.predict(&["Jane", "Doe"]).unwrap();
        assert_eq!(2, labels.len());
        for label in &labels {
            assert!(["O", "org", "person"].contains(&label.as_str()));
        }
        assert_eq!(Some(Method::Sgd), model.metadata().method);
        assert_eq!(10, model.metadata().iterations);
        assert_eq!(2, model.metadata().training_size);
    }

    #[test]
    fn test_sgd_fits_training_data() {
        let examples = test_utils::entity_examples();
        let model = CrfTrainer::new()
            .max_iter(50)
            .unwrap()
            .train(&examples)
            .unwrap();
        for example in &examples {
            assert_eq!(example.tags, model.predict(&example.tokens).unwrap());
        }
        // every labeling scores 0 before training, so the initial loss is 14 ln 3
        let loss = model.metadata().final_loss.unwrap();
        assert!(loss < 14.0 * 3f64.ln());
    }

    #[test]
    fn test_momentum() {
        let examples = test_utils::entity_examples();
        let model = CrfTrainer::new()
            .max_iter(30)
            .unwrap()
            .method(Method::Momentum(0.9))
            .unwrap()
            .learning_rate(0.01)
            .unwrap()
            .learning_rate_decay(LearningRateDecay::Inverse)
            .unwrap()
            .train(&examples)
            .unwrap();
        assert_eq!(Some(Method::Momentum(0.9)), model.metadata().method);
        let loss = model.metadata().final_loss.unwrap();
        assert!(loss.is_finite());
        assert!(loss < 14.0 * 3f64.ln());
    }

    #[test]
    fn test_lbfgs() {
        let examples = test_utils::entity_examples();
        let model = CrfTrainer::new()
            .max_iter(30)
            .unwrap()
            .method(Method::Lbfgs)
            .unwrap()
            .train(&examples)
            .unwrap();
        assert_eq!(Some(Method::Lbfgs), model.metadata().method);
        assert!(model.metadata().iterations <= 30);
        let loss = model.metadata().final_loss.unwrap();
        assert!(loss < 14.0 * 3f64.ln());
        for example in &examples {
            assert_eq!(example.tokens.len(), model.predict(&example.tokens).unwrap().len());
        }
    }

    #[test]
    fn test_warm_start_keeps_labels_and_features() {
        let trainer = CrfTrainer::new().max_iter(5).unwrap();
        let model = trainer.train(&test_utils::entity_examples()).unwrap();
        let n_features = model.features().len();
        let extra = vec![TaggedSequence::new(
            ["Initech", "hired", "Peter", "Gibbons"],
            ["org", "O", "person", "person"],
        )];
        let updated = trainer.train_model(model.clone(), &extra).unwrap();
        assert_eq!(model.labels(), updated.labels());
        assert!(updated.features().contains("w=Initech"));
        assert!(updated.features().len() > n_features);
        assert!(updated.features().contains("w=Acme"));
    }

    #[test]
    fn test_thread_count_does_not_change_weights() {
        let examples: Vec<TaggedSequence> = (0..20)
            .flat_map(|_| test_utils::entity_examples())
            .collect();
        let train = |n_threads| {
            CrfTrainer::new()
                .max_iter(3)
                .unwrap()
                .batch_size(40)
                .unwrap()
                .n_threads(n_threads)
                .unwrap()
                .seed(42)
                .train(&examples)
                .unwrap()
        };
        let single = train(1);
        let multi = train(4);
        assert_eq!(single.features(), multi.features());
        assert_eq!(single.feature_weights, multi.feature_weights);
        assert_eq!(single.transition_weights, multi.transition_weights);
    }

    #[test]
    fn test_gradient_partial_matches_full_gradient() {
        let instances = vec![
            Instance {
                feature_ids: vec![vec![0], vec![1]],
                labels: vec![0, 1],
            },
            Instance {
                feature_ids: vec![vec![1, 0]],
                labels: vec![1],
            },
        ];
        let param = vec![0.1, -0.2, 0.3, 0.05, 0.0, 0.1, -0.1, 0.2, 0.0, 0.3, -0.3, 0.1, 0.0];
        let loss = CrfLoss::new(&instances, 2, 1, None);
        let (partial_loss, partial_grad) = loss.gradient_partial(&param, 0..2);
        let full_grad = loss.gradient(&param).unwrap();
        assert!((partial_loss - loss.cost(&param).unwrap()).abs() < 1e-12);
        for (a, b) in partial_grad.iter().zip(&full_grad) {
            assert!((a - b).abs() < 1e-12);
        }
    }
}
