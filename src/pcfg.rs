//! Probabilistic context-free grammar parser.

mod cnf;
mod cyk;
mod trainer;
mod tree;

use core::fmt;

use bincode::{Decode, Encode};

use crate::errors::{Result, RuseqError};
use crate::model::{Model, ModelKind};
use crate::symbols::SymbolTable;

pub use trainer::{ParseExample, PcfgTrainer};
pub use tree::Tree;

/// Right-hand side symbol of a rule.
#[derive(Clone, Debug, Decode, Encode, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Symbol {
    /// Non-terminal label.
    NonTerminal(String),

    /// Word.
    Terminal(String),
}

impl Symbol {
    /// Creates a non-terminal.
    pub fn non_terminal<S>(label: S) -> Self
    where
        S: Into<String>,
    {
        Self::NonTerminal(label.into())
    }

    /// Creates a terminal.
    pub fn terminal<S>(word: S) -> Self
    where
        S: Into<String>,
    {
        Self::Terminal(word.into())
    }

    /// Returns the label or the word.
    pub fn name(&self) -> &str {
        match self {
            Self::NonTerminal(name) | Self::Terminal(name) => name,
        }
    }

    /// Returns the label of a non-terminal.
    pub fn as_non_terminal(&self) -> Option<&str> {
        match self {
            Self::NonTerminal(label) => Some(label),
            Self::Terminal(_) => None,
        }
    }

    /// Returns the word of a terminal.
    pub fn as_terminal(&self) -> Option<&str> {
        match self {
            Self::Terminal(word) => Some(word),
            Self::NonTerminal(_) => None,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NonTerminal(label) => write!(f, "{label}"),
            Self::Terminal(word) => write!(f, "{word:?}"),
        }
    }
}

/// Production with its probability.
#[derive(Clone, Debug, Decode, Encode, PartialEq)]
pub struct Rule {
    /// Left-hand side.
    pub lhs: String,

    /// Right-hand side.
    pub rhs: Vec<Symbol>,

    /// Conditional probability given the left-hand side.
    pub probability: f64,
}

impl Rule {
    /// Creates a new rule.
    pub fn new<S, I>(lhs: S, rhs: I, probability: f64) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = Symbol>,
    {
        Self {
            lhs: lhs.into(),
            rhs: rhs.into_iter().collect(),
            probability,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ->", self.lhs)?;
        for symbol in &self.rhs {
            write!(f, " {symbol}")?;
        }
        write!(f, " [{}]", self.probability)
    }
}

/// Information recorded at training time.
#[derive(Clone, Debug, Default, Decode, Encode, PartialEq, Eq)]
pub struct PcfgMetadata {
    /// Number of training trees.
    pub training_size: usize,

    /// Whether the grammar was converted into Chomsky normal form.
    pub cnf: bool,
}

/// Best parse of a token sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct Parse {
    /// Tree rooted at the start symbol.
    pub tree: Tree,

    /// Natural logarithm of the probability of the tree.
    pub log_probability: f64,
}

impl Parse {
    /// Returns the probability of the tree.
    pub fn probability(&self) -> f64 {
        self.log_probability.exp()
    }
}

/// Probabilistic context-free grammar.
#[derive(Clone, Debug, Decode, Encode)]
pub struct PcfgModel {
    start_symbol: String,
    smoothing_k: f64,

    // sorted by (lhs, rhs)
    rules: Vec<Rule>,

    non_terminals: SymbolTable,
    grammar: cyk::Grammar,
    metadata: PcfgMetadata,
}

impl PcfgModel {
    /// Creates a grammar without rules.
    ///
    /// # Errors
    ///
    /// `start_symbol` must not be empty, and `smoothing_k` must be a non-negative finite number.
    pub fn new<S>(start_symbol: S, smoothing_k: f64) -> Result<Self>
    where
        S: Into<String>,
    {
        let start_symbol = start_symbol.into();
        check_start_symbol(&start_symbol)?;
        check_smoothing(smoothing_k)?;
        Ok(Self::from_parts(
            start_symbol,
            smoothing_k,
            vec![],
            &SymbolTable::default(),
            PcfgMetadata::default(),
        ))
    }

    /// Creates a grammar from explicit rules.
    ///
    /// Rules with more than two children are allowed. They are binarized internally for parsing,
    /// while [`PcfgModel::rules()`] returns them as given.
    ///
    /// # Errors
    ///
    /// [`RuseqError::InvalidHyperparameter`] is returned when a probability is outside
    /// `(0, 1]`, a rule has no children, or a terminal appears in a rule with several children.
    pub fn from_rules<S, I>(start_symbol: S, rules: I) -> Result<Self>
    where
        S: Into<String>,
        I: IntoIterator<Item = Rule>,
    {
        let start_symbol = start_symbol.into();
        check_start_symbol(&start_symbol)?;
        let rules: Vec<Rule> = rules.into_iter().collect();
        for rule in &rules {
            check_rule(rule).map_err(|msg| {
                RuseqError::invalid_hyperparameter("rules", format!("{rule}: {msg}"))
            })?;
        }
        Ok(Self::from_parts(
            start_symbol,
            0.0,
            rules,
            &SymbolTable::default(),
            PcfgMetadata::default(),
        ))
    }

    pub(crate) fn from_parts(
        start_symbol: String,
        smoothing_k: f64,
        mut rules: Vec<Rule>,
        intermediate: &SymbolTable,
        metadata: PcfgMetadata,
    ) -> Self {
        rules.sort_by(|a, b| (&a.lhs, &a.rhs).cmp(&(&b.lhs, &b.rhs)));
        let non_terminals = SymbolTable::new(rules.iter().flat_map(|rule| {
            core::iter::once(rule.lhs.as_str())
                .chain(rule.rhs.iter().filter_map(Symbol::as_non_terminal))
        }));
        let grammar = cyk::Grammar::new(&rules, intermediate);
        Self {
            start_symbol,
            smoothing_k,
            rules,
            non_terminals,
            grammar,
            metadata,
        }
    }

    /// Returns the default start symbol.
    pub fn start_symbol(&self) -> &str {
        &self.start_symbol
    }

    /// Returns the smoothing constant used by [`PcfgTrainer::train_model()`].
    pub fn smoothing_k(&self) -> f64 {
        self.smoothing_k
    }

    /// Returns the training metadata.
    pub fn metadata(&self) -> &PcfgMetadata {
        &self.metadata
    }

    /// Returns all rules sorted by left-hand side.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Returns the rules of a left-hand side.
    pub fn rules_for(&self, lhs: &str) -> &[Rule] {
        let start = self.rules.partition_point(|rule| rule.lhs.as_str() < lhs);
        let len = self.rules[start..].partition_point(|rule| rule.lhs == lhs);
        &self.rules[start..start + len]
    }

    /// Returns the non-terminals appearing in the rules.
    pub fn non_terminals(&self) -> &SymbolTable {
        &self.non_terminals
    }

    /// Checks if every rule derives one terminal or two non-terminals.
    pub fn is_cnf(&self) -> bool {
        cnf::is_cnf(&self.rules)
    }

    /// Parses the tokens with Viterbi CYK.
    ///
    /// `start_symbol` overrides the default start symbol. Intermediate symbols introduced by
    /// binarization do not appear in the returned tree.
    ///
    /// # Errors
    ///
    /// - [`RuseqError::NoParse`] if `tokens` is empty or the start symbol cannot derive them.
    /// - [`RuseqError::UnknownLabel`] if the given `start_symbol` is not a non-terminal of the
    ///   grammar.
    pub fn parse<S>(&self, tokens: &[S], start_symbol: Option<&str>) -> Result<Parse>
    where
        S: AsRef<str>,
    {
        if tokens.is_empty() {
            return Err(RuseqError::no_parse(0));
        }
        let start = match start_symbol {
            Some(label) => self
                .grammar
                .non_terminals
                .get(label)
                .ok_or_else(|| RuseqError::unknown_label(label))?,
            None => self
                .grammar
                .non_terminals
                .get(&self.start_symbol)
                .ok_or_else(|| RuseqError::no_parse(tokens.len()))?,
        };
        let (tree, log_probability) = cyk::parse(&self.grammar, tokens, start)?;
        Ok(Parse {
            tree,
            log_probability,
        })
    }
}

impl Model for PcfgModel {
    type Output = Parse;

    const KIND: ModelKind = ModelKind::Pcfg;

    /// Parses the tokens from the default start symbol.
    ///
    /// See [`PcfgModel::parse()`].
    fn predict<S>(&self, tokens: &[S]) -> Result<Parse>
    where
        S: AsRef<str>,
    {
        self.parse(tokens, None)
    }

    fn validate(&self) -> Result<()> {
        check_start_symbol(&self.start_symbol)
            .and_then(|()| check_smoothing(self.smoothing_k))
            .map_err(|_| RuseqError::serialization("invalid hyperparameter"))?;
        if let Some(rule) = self.rules.iter().find(|rule| check_rule(rule).is_err()) {
            return Err(RuseqError::serialization(format!("invalid rule {rule}")));
        }
        self.grammar.validate()
    }
}

fn check_start_symbol(start_symbol: &str) -> Result<()> {
    if start_symbol.is_empty() {
        return Err(RuseqError::invalid_hyperparameter(
            "start_symbol",
            "must not be empty",
        ));
    }
    Ok(())
}

fn check_smoothing(k: f64) -> Result<()> {
    if !(k >= 0.0 && k.is_finite()) {
        return Err(RuseqError::invalid_hyperparameter(
            "smoothing_k",
            "must be a non-negative finite number",
        ));
    }
    Ok(())
}

fn check_rule(rule: &Rule) -> core::result::Result<(), &'static str> {
    if !(rule.probability > 0.0 && rule.probability <= 1.0) {
        return Err("probability must be in (0, 1]");
    }
    if rule.rhs.is_empty() {
        return Err("right-hand side must not be empty");
    }
    if rule.rhs.len() > 1 && rule.rhs.iter().any(|s| s.as_terminal().is_some()) {
        return Err("terminals must be the only child");
    }
    Ok(())
}
