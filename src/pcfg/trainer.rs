use std::collections::BTreeMap;

use hashbrown::HashMap;
use log::{debug, info};

use crate::errors::{Result, RuseqError};
use crate::model::Train;
use crate::pcfg::{cnf, PcfgMetadata, PcfgModel, Rule, Symbol, Tree};
use crate::symbols::SymbolTable;
use crate::utils;

/// A token sequence with its phrase-structure tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseExample {
    /// Tokens.
    pub tokens: Vec<String>,

    /// Tree whose leaves are the tokens.
    pub tree: Tree,
}

impl ParseExample {
    /// Creates a new example.
    pub fn new<I, S>(tokens: I, tree: Tree) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            tree,
        }
    }

    /// Creates an example whose tokens are the leaves of the tree.
    pub fn from_tree(tree: Tree) -> Self {
        Self {
            tokens: tree.leaves().into_iter().map(String::from).collect(),
            tree,
        }
    }
}

type RuleCounts = HashMap<(String, Vec<Symbol>), f64>;

/// Trainer for [`PcfgModel`].
pub struct PcfgTrainer {
    smoothing_k: f64,
    convert_to_cnf: bool,
    start_symbol: String,
    n_threads: usize,
}

impl PcfgTrainer {
    /// Creates a new trainer with relative frequency estimation, no CNF conversion, and the
    /// start symbol `S`.
    pub fn new() -> Self {
        Self {
            smoothing_k: 0.0,
            convert_to_cnf: false,
            start_symbol: "S".to_string(),
            n_threads: 1,
        }
    }

    /// Sets the add-k smoothing constant of models created by [`Train::train()`].
    ///
    /// # Errors
    ///
    /// `k` must be a non-negative finite number.
    pub fn smoothing(mut self, k: f64) -> Result<Self> {
        if !(k >= 0.0 && k.is_finite()) {
            return Err(RuseqError::invalid_hyperparameter(
                "smoothing_k",
                "must be a non-negative finite number",
            ));
        }
        self.smoothing_k = k;
        Ok(self)
    }

    /// Enables the conversion into Chomsky normal form.
    pub const fn convert_to_cnf(mut self, convert_to_cnf: bool) -> Self {
        self.convert_to_cnf = convert_to_cnf;
        self
    }

    /// Sets the start symbol of models created by [`Train::train()`].
    ///
    /// # Errors
    ///
    /// `start_symbol` must not be empty.
    pub fn start_symbol<S>(mut self, start_symbol: S) -> Result<Self>
    where
        S: Into<String>,
    {
        let start_symbol = start_symbol.into();
        if start_symbol.is_empty() {
            return Err(RuseqError::invalid_hyperparameter(
                "start_symbol",
                "must not be empty",
            ));
        }
        self.start_symbol = start_symbol;
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

    /// Replaces the rules of the model by rules estimated from the examples.
    ///
    /// Rule probabilities are `(count(rule) + k) / (count(lhs) + k * n)`, where `k` is the
    /// smoothing constant of the model and `n` is the number of distinct rules of the left-hand
    /// side. The start symbol and the smoothing constant of the model are kept.
    ///
    /// # Errors
    ///
    /// - [`RuseqError::EmptyTrainingSet`] if `examples` is empty.
    /// - [`RuseqError::MalformedTree`] if a tree has an inner node without children.
    /// - [`RuseqError::DimensionMismatch`] if the leaves of a tree differ from its tokens.
    pub fn train_model(&self, model: PcfgModel, examples: &[ParseExample]) -> Result<PcfgModel> {
        if examples.is_empty() {
            return Err(RuseqError::EmptyTrainingSet);
        }
        for (i, example) in examples.iter().enumerate() {
            example.tree.check()?;
            let leaves = example.tree.leaves();
            if leaves.len() != example.tokens.len()
                || leaves.iter().zip(&example.tokens).any(|(a, b)| a != b)
            {
                return Err(RuseqError::dimension_mismatch(
                    i,
                    example.tokens.len(),
                    leaves.len(),
                ));
            }
        }

        let counts: RuleCounts = utils::map_reduce(
            examples,
            self.n_threads,
            HashMap::new,
            |counts: &mut RuleCounts, example| {
                example.tree.for_each_production(&mut |lhs, rhs| {
                    *counts.entry((lhs.to_string(), rhs)).or_default() += 1.0;
                });
            },
        );
        debug!("counted {} distinct rules", counts.len());

        let mut rules = estimate(counts, model.smoothing_k);
        let mut intermediate = SymbolTable::default();
        if self.convert_to_cnf {
            let binarized = cnf::binarize(&rules);
            rules = cnf::eliminate_units(&binarized.rules);
            intermediate = binarized.intermediate;
        }
        let model = PcfgModel::from_parts(
            model.start_symbol,
            model.smoothing_k,
            rules,
            &intermediate,
            PcfgMetadata {
                training_size: examples.len(),
                cnf: self.convert_to_cnf,
            },
        );
        info!(
            "trained PCFG: examples={}, rules={}, non_terminals={}, cnf={}",
            model.metadata.training_size,
            model.rules.len(),
            model.non_terminals.len(),
            model.metadata.cnf
        );
        Ok(model)
    }
}

fn estimate(counts: RuleCounts, k: f64) -> Vec<Rule> {
    let counts: BTreeMap<(String, Vec<Symbol>), f64> = counts.into_iter().collect();
    let mut totals: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for ((lhs, _), &count) in &counts {
        let (total, n_rules) = totals.entry(lhs.as_str()).or_default();
        *total += count;
        *n_rules += 1;
    }
    let mut rules = Vec::with_capacity(counts.len());
    for ((lhs, rhs), &count) in &counts {
        let (total, n_rules) = totals[lhs.as_str()];
        rules.push(Rule {
            lhs: lhs.clone(),
            rhs: rhs.clone(),
            probability: (count + k) / (total + k * n_rules as f64),
        });
    }
    rules
}

impl Default for PcfgTrainer {
    fn default() -> Self {
        Self::new()
    }
}

impl Train for PcfgTrainer {
    type Example = ParseExample;
    type Model = PcfgModel;

    /// Estimates a new grammar.
    ///
    /// # Errors
    ///
    /// See [`PcfgTrainer::train_model()`].
    fn train(&self, examples: &[ParseExample]) -> Result<PcfgModel> {
        let model = PcfgModel::new(self.start_symbol.clone(), self.smoothing_k)?;
        self.train_model(model, examples)
    }
}
