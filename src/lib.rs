//! # ruseq
//!
//! Statistical sequence models implemented in pure Rust: an order-3 hidden Markov model tagger,
//! a linear-chain conditional random field labeler, and a probabilistic context-free grammar
//! parser.
//!
//! ## Examples
//!
//! ```rust
//! use ruseq::{HmmTrainer, Model, PcfgTrainer, ParseExample, TaggedSequence, Train};
//!
//! // Part-of-speech tagging
//! let examples = vec![
//!     TaggedSequence::new(["The", "cat", "sat"], ["det", "noun", "verb"]),
//!     TaggedSequence::new(["A", "dog", "ran"], ["det", "noun", "verb"]),
//! ];
//! let model = HmmTrainer::new().smoothing(0.001)?.train(&examples)?;
//! assert_eq!(vec!["det", "noun", "verb"], model.predict(&["The", "dog", "runs"])?);
//!
//! // Parsing
//! let examples = vec![
//!     ParseExample::from_tree("(S (NP (Det the) (Noun cat)) (VP (Verb sat)))".parse()?),
//!     ParseExample::from_tree("(S (NP (Det a) (Noun dog)) (VP (Verb ran)))".parse()?),
//! ];
//! let model = PcfgTrainer::new().convert_to_cnf(true).train(&examples)?;
//! let parse = model.predict(&["the", "dog", "sat"])?;
//! assert_eq!(vec!["the", "dog", "sat"], parse.tree.leaves());
//! assert!(parse.probability() > 0.0);
//!
//! // Persistence
//! let mut buf = vec![];
//! model.write(&mut buf)?;
//! let model = ruseq::PcfgModel::read(&buf[..])?;
//! assert_eq!(parse, model.predict(&["the", "dog", "sat"])?);
//! # Ok::<(), ruseq::RuseqError>(())
//! ```
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod crf;
pub mod errors;
mod hmm;
mod math;
mod model;
mod pcfg;
mod symbols;
mod utils;

#[cfg(test)]
mod test_utils;

pub use crf::{CrfMetadata, CrfModel, CrfTrainer, FeatureTemplate, LearningRateDecay, Method};
pub use errors::{Result, RuseqError};
pub use hmm::{HmmMetadata, HmmModel, HmmTrainer};
pub use model::{Model, ModelKind, TaggedSequence, Train};
pub use pcfg::{Parse, ParseExample, PcfgMetadata, PcfgModel, PcfgTrainer, Rule, Symbol, Tree};
pub use symbols::SymbolTable;
