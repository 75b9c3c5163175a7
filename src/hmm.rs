//! Order-3 hidden Markov model tagger.

mod trainer;

use bincode::{Decode, Encode};

use crate::errors::{Result, RuseqError};
use crate::model::{Model, ModelKind};
use crate::symbols::SymbolTable;

pub use trainer::HmmTrainer;

/// Information recorded at training time.
#[derive(Clone, Debug, Default, Decode, Encode, PartialEq)]
pub struct HmmMetadata {
    /// Number of training examples.
    pub training_size: usize,

    /// Number of training tokens.
    pub n_tokens: usize,
}

/// Trigram HMM tagger.
///
/// Transitions are conditioned on the two preceding tags. The first two positions of a
/// sequence see a reserved start-of-sequence pseudo-tag in their history, and every sequence
/// ends with a reserved end-of-sequence outcome.
#[derive(Clone, Debug, Decode, Encode)]
pub struct HmmModel {
    tags: SymbolTable,
    vocabulary: SymbolTable,

    // Indexed by (t0, t1, t2): t0 and t1 range over tags and BOS, t2 ranges over tags and EOS.
    // Both pseudo-tags take the ID `tags.len()`.
    transitions: Vec<f64>,

    // Observed (tag, log-probability) pairs of each word, sorted by tag.
    emissions: Vec<Vec<(u32, f64)>>,

    // Log-probability of any word without an observed pair, per tag.
    emission_floor: Vec<f64>,

    smoothing_k: f64,
    metadata: HmmMetadata,
}

impl HmmModel {
    /// Returns the tag set.
    pub fn tags(&self) -> &SymbolTable {
        &self.tags
    }

    /// Returns the words observed in training.
    pub fn vocabulary(&self) -> &SymbolTable {
        &self.vocabulary
    }

    /// Returns the add-k smoothing constant.
    pub fn smoothing_k(&self) -> f64 {
        self.smoothing_k
    }

    /// Returns the training metadata.
    pub fn metadata(&self) -> &HmmMetadata {
        &self.metadata
    }

    /// Returns `log P(t2 | t0, t1)`.
    ///
    /// `None` in the history stands for the start of the sequence, and `None` as `t2` stands
    /// for its end. Returns `None` if a tag is unknown.
    pub fn transition_log_prob(
        &self,
        t0: Option<&str>,
        t1: Option<&str>,
        t2: Option<&str>,
    ) -> Option<f64> {
        let t0 = self.tag_or_boundary(t0)?;
        let t1 = self.tag_or_boundary(t1)?;
        let t2 = self.tag_or_boundary(t2)?;
        Some(self.transition(t0, t1, t2))
    }

    /// Returns the log-probability of `tag` at the first position.
    pub fn initial_log_prob(&self, tag: &str) -> Option<f64> {
        self.transition_log_prob(None, None, Some(tag))
    }

    /// Returns `log P(word | tag)`.
    ///
    /// Words outside the vocabulary get the smoothed floor of the tag.
    pub fn emission_log_prob(&self, tag: &str, word: &str) -> Option<f64> {
        let tag = self.tags.get(tag)?;
        Some(self.emission(tag, self.vocabulary.get(word)))
    }

    #[inline(always)]
    fn tag_or_boundary(&self, tag: Option<&str>) -> Option<u32> {
        match tag {
            Some(tag) => self.tags.get(tag),
            None => Some(self.tags.len() as u32),
        }
    }

    #[inline(always)]
    fn transition(&self, t0: u32, t1: u32, t2: u32) -> f64 {
        let m = self.tags.len() + 1;
        self.transitions[(t0 as usize * m + t1 as usize) * m + t2 as usize]
    }

    #[inline(always)]
    fn emission(&self, tag: u32, word: Option<u32>) -> f64 {
        word.and_then(|word| {
            let pairs = &self.emissions[word as usize];
            pairs
                .binary_search_by_key(&tag, |&(t, _)| t)
                .ok()
                .map(|i| pairs[i].1)
        })
        .unwrap_or(self.emission_floor[tag as usize])
    }

    /// Finds the best tag IDs with the order-3 Viterbi algorithm.
    fn viterbi(&self, words: &[Option<u32>]) -> Vec<u32> {
        let n = words.len();
        if n == 0 {
            return vec![];
        }
        let n_tags = self.tags.len();
        let m = n_tags + 1;
        let boundary = n_tags as u32;
        let n_states = m * m;
        let state = |t1: u32, t2: u32| t1 as usize * m + t2 as usize;

        let mut emissions = Vec::with_capacity(n * n_tags);
        for &word in words {
            for tag in 0..n_tags as u32 {
                emissions.push(self.emission(tag, word));
            }
        }

        // trellis over (position, (t1, t2)) with the previous t0 as a back pointer
        let mut scores = vec![f64::NEG_INFINITY; n * n_states];
        let mut backs = vec![boundary; n * n_states];

        for t2 in 0..n_tags as u32 {
            scores[state(boundary, t2)] =
                self.transition(boundary, boundary, t2) + emissions[t2 as usize];
        }
        for i in 1..n {
            let (prev, curr) = scores.split_at_mut(i * n_states);
            let prev = &prev[(i - 1) * n_states..];
            let curr = &mut curr[..n_states];
            let curr_backs = &mut backs[i * n_states..(i + 1) * n_states];
            let histories = if i == 1 {
                boundary..boundary + 1
            } else {
                0..boundary
            };
            for t1 in 0..n_tags as u32 {
                for t2 in 0..n_tags as u32 {
                    let mut best_score = f64::NEG_INFINITY;
                    let mut best_t0 = boundary;
                    for t0 in histories.clone() {
                        let score = prev[state(t0, t1)];
                        if score == f64::NEG_INFINITY {
                            continue;
                        }
                        let score = score + self.transition(t0, t1, t2);
                        if score > best_score {
                            best_score = score;
                            best_t0 = t0;
                        }
                    }
                    if best_score > f64::NEG_INFINITY {
                        curr[state(t1, t2)] = best_score + emissions[i * n_tags + t2 as usize];
                        curr_backs[state(t1, t2)] = best_t0;
                    }
                }
            }
        }

        let last = &scores[(n - 1) * n_states..];
        let histories = if n == 1 {
            boundary..boundary + 1
        } else {
            0..boundary
        };
        let mut best_score = f64::NEG_INFINITY;
        let mut best_state = (boundary, 0);
        for t1 in histories {
            for t2 in 0..n_tags as u32 {
                let score = last[state(t1, t2)];
                if score == f64::NEG_INFINITY {
                    continue;
                }
                let score = score + self.transition(t1, t2, boundary);
                if score > best_score {
                    best_score = score;
                    best_state = (t1, t2);
                }
            }
        }

        let mut result = vec![0; n];
        let (mut t1, mut t2) = best_state;
        result[n - 1] = t2;
        if n >= 2 {
            result[n - 2] = t1;
        }
        for i in (2..n).rev() {
            let t0 = backs[i * n_states + state(t1, t2)];
            result[i - 2] = t0;
            t2 = t1;
            t1 = t0;
        }
        result
    }
}

impl Model for HmmModel {
    type Output = Vec<String>;

    const KIND: ModelKind = ModelKind::Hmm;

    /// Tags the tokens.
    ///
    /// Returns an empty sequence for empty input. Unknown words are scored with the smoothed
    /// emission floor.
    fn predict<S>(&self, tokens: &[S]) -> Result<Vec<String>>
    where
        S: AsRef<str>,
    {
        let words: Vec<Option<u32>> = tokens
            .iter()
            .map(|token| self.vocabulary.get(token.as_ref()))
            .collect();
        Ok(self
            .viterbi(&words)
            .into_iter()
            .map(|tag| self.tags.name(tag).to_string())
            .collect())
    }

    fn validate(&self) -> Result<()> {
        let n_tags = self.tags.len();
        if n_tags == 0 {
            return Err(RuseqError::serialization("empty tag set"));
        }
        let m = n_tags + 1;
        if self.transitions.len() != m * m * m {
            return Err(RuseqError::serialization("invalid transition table size"));
        }
        if self.emissions.len() != self.vocabulary.len() || self.emission_floor.len() != n_tags {
            return Err(RuseqError::serialization("invalid emission table size"));
        }
        if !(self.smoothing_k > 0.0 && self.smoothing_k.is_finite()) {
            return Err(RuseqError::serialization("invalid smoothing constant"));
        }
        if !self
            .transitions
            .iter()
            .chain(&self.emission_floor)
            .all(|x| x.is_finite())
        {
            return Err(RuseqError::serialization("non-finite probability"));
        }
        for pairs in &self.emissions {
            if !pairs.windows(2).all(|w| w[0].0 < w[1].0) {
                return Err(RuseqError::serialization("unsorted emission table"));
            }
            if !pairs
                .iter()
                .all(|&(tag, lp)| (tag as usize) < n_tags && lp.is_finite())
            {
                return Err(RuseqError::serialization("invalid emission entry"));
            }
        }
        Ok(())
    }
}
