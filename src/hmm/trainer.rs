use hashbrown::HashMap;
use log::{debug, info};

use crate::errors::{Result, RuseqError};
use crate::hmm::{HmmMetadata, HmmModel};
use crate::math;
use crate::model::{TaggedSequence, Train};
use crate::symbols::SymbolTable;
use crate::utils::{self, Merge};

/// Raw counts of one chunk of examples.
struct HmmCounts {
    // (t0, t1, t2) with the same layout as `HmmModel::transitions`
    trigrams: Vec<f64>,

    // (word, tag)
    emissions: HashMap<(u32, u32), f64>,

    n_tokens: usize,
}

impl HmmCounts {
    fn new(n_tags: usize) -> Self {
        let m = n_tags + 1;
        Self {
            trigrams: vec![0.0; m * m * m],
            emissions: HashMap::new(),
            n_tokens: 0,
        }
    }

    fn add(&mut self, example: &TaggedSequence, tags: &SymbolTable, vocabulary: &SymbolTable) {
        let m = tags.len() + 1;
        let boundary = tags.len();
        let mut t0 = boundary;
        let mut t1 = boundary;
        for (token, tag) in example.tokens.iter().zip(&example.tags) {
            // Both are registered before counting.
            let (Some(t2), Some(word)) = (tags.get(tag), vocabulary.get(token)) else {
                continue;
            };
            let t2 = t2 as usize;
            self.trigrams[(t0 * m + t1) * m + t2] += 1.0;
            *self.emissions.entry((word, t2 as u32)).or_default() += 1.0;
            t0 = t1;
            t1 = t2;
        }
        self.trigrams[(t0 * m + t1) * m + boundary] += 1.0;
        self.n_tokens += example.tokens.len();
    }
}

impl Merge for HmmCounts {
    fn merge(&mut self, other: Self) {
        self.trigrams.merge(other.trigrams);
        self.emissions.merge(other.emissions);
        self.n_tokens += other.n_tokens;
    }
}

/// Trainer for [`HmmModel`].
pub struct HmmTrainer {
    smoothing_k: f64,
    n_threads: usize,
    tags: Option<SymbolTable>,
}

impl HmmTrainer {
    /// Creates a new trainer with add-one smoothing.
    pub fn new() -> Self {
        Self {
            smoothing_k: 1.0,
            n_threads: 1,
            tags: None,
        }
    }

    /// Sets the add-k smoothing constant.
    ///
    /// # Errors
    ///
    /// `k` must be a positive finite number, otherwise unseen events would get zero probability.
    pub fn smoothing(mut self, k: f64) -> Result<Self> {
        if !(k > 0.0 && k.is_finite()) {
            return Err(RuseqError::invalid_hyperparameter(
                "smoothing_k",
                "must be a positive finite number",
            ));
        }
        self.smoothing_k = k;
        Ok(self)
    }

    /// Sets the number of threads used for counting.
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

    /// Fixes the tag set.
    ///
    /// By default, the tag set consists of the tags appearing in the training examples.
    ///
    /// # Errors
    ///
    /// The tag set must not be empty.
    pub fn tags<I, S>(mut self, tags: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = SymbolTable::new(tags);
        if tags.is_empty() {
            return Err(RuseqError::invalid_hyperparameter("tags", "must not be empty"));
        }
        self.tags = Some(tags);
        Ok(self)
    }

    fn estimate(&self, counts: HmmCounts, tags: SymbolTable, vocabulary: SymbolTable) -> HmmModel {
        let k = self.smoothing_k;
        let n_tags = tags.len();
        let m = n_tags + 1;

        let mut transitions = Vec::with_capacity(m * m * m);
        for history in counts.trigrams.chunks(m) {
            let total: f64 = history.iter().sum();
            transitions.extend(
                history
                    .iter()
                    .map(|&count| math::smoothed_log_prob(count, total, k, m)),
            );
        }

        let mut tag_totals = vec![0.0; n_tags];
        for (&(_, tag), &count) in &counts.emissions {
            tag_totals[tag as usize] += count;
        }
        let domain = vocabulary.len() + 1;
        let mut emissions = vec![vec![]; vocabulary.len()];
        for ((word, tag), count) in counts.emissions {
            let lp = math::smoothed_log_prob(count, tag_totals[tag as usize], k, domain);
            emissions[word as usize].push((tag, lp));
        }
        for pairs in &mut emissions {
            pairs.sort_unstable_by_key(|&(tag, _)| tag);
        }
        let emission_floor = tag_totals
            .iter()
            .map(|&total| math::smoothed_log_prob(0.0, total, k, domain))
            .collect();

        HmmModel {
            tags,
            vocabulary,
            transitions,
            emissions,
            emission_floor,
            smoothing_k: k,
            metadata: HmmMetadata {
                training_size: 0,
                n_tokens: counts.n_tokens,
            },
        }
    }
}

impl Default for HmmTrainer {
    fn default() -> Self {
        Self::new()
    }
}

impl Train for HmmTrainer {
    type Example = TaggedSequence;
    type Model = HmmModel;

    /// Counts tag trigrams and emissions, and converts them into smoothed log-probabilities.
    ///
    /// # Errors
    ///
    /// - [`RuseqError::EmptyTrainingSet`] if `examples` holds no tagged token.
    /// - [`RuseqError::DimensionMismatch`] if tokens and tags of an example differ in length.
    /// - [`RuseqError::UnknownLabel`] if a tag is outside the tag set given by
    ///   [`HmmTrainer::tags()`].
    fn train(&self, examples: &[TaggedSequence]) -> Result<HmmModel> {
        TaggedSequence::check_dimensions(examples)?;
        let tags = match &self.tags {
            Some(tags) => {
                for example in examples {
                    if let Some(tag) = example.tags.iter().find(|tag| !tags.contains(tag)) {
                        return Err(RuseqError::unknown_label(tag.as_str()));
                    }
                }
                tags.clone()
            }
            None => SymbolTable::new(examples.iter().flat_map(|e| e.tags.iter().map(String::as_str))),
        };
        if tags.is_empty() {
            return Err(RuseqError::EmptyTrainingSet);
        }
        let vocabulary =
            SymbolTable::new(examples.iter().flat_map(|e| e.tokens.iter().map(String::as_str)));
        debug!(
            "counting {} examples: {} tags, {} words",
            examples.len(),
            tags.len(),
            vocabulary.len()
        );

        let counts = utils::map_reduce(
            examples,
            self.n_threads,
            || HmmCounts::new(tags.len()),
            |counts, example| counts.add(example, &tags, &vocabulary),
        );

        let mut model = self.estimate(counts, tags, vocabulary);
        model.metadata.training_size = examples.len();
        info!(
            "trained HMM: examples={}, tokens={}, tags={}, vocabulary={}",
            model.metadata.training_size,
            model.metadata.n_tokens,
            model.tags.len(),
            model.vocabulary.len()
        );
        Ok(model)
    }
}
