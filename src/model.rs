//! Interface shared by all model families.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bincode::{Decode, Encode};

use crate::errors::{Result, RuseqError};

const MAGIC: &[u8; 6] = b"RUSEQ\0";
const FORMAT_VERSION: u32 = 1;

/// Upper bound of the encoded size of a model body.
///
/// Corrupt length prefixes beyond this bound are rejected instead of allocated.
const MAX_MODEL_BYTES: usize = 1 << 31;

/// Kind of a persisted model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ModelKind {
    /// Order-3 hidden Markov model tagger.
    Hmm = 1,

    /// Linear-chain conditional random field labeler.
    Crf = 2,

    /// Probabilistic context-free grammar parser.
    Pcfg = 3,
}

/// A trained model that maps a token sequence to a structure.
///
/// Models are immutable after training, so a single model can be shared between threads that
/// decode independent inputs.
pub trait Model: Encode + Decode<()> + Sized {
    /// Decoded structure.
    type Output;

    /// Kind written into the model header.
    const KIND: ModelKind;

    /// Decodes the best structure of the given tokens.
    ///
    /// # Errors
    ///
    /// See the documentation of each model.
    fn predict<S>(&self, tokens: &[S]) -> Result<Self::Output>
    where
        S: AsRef<str>;

    /// Checks the consistency of the internal tables.
    ///
    /// # Errors
    ///
    /// [`RuseqError::Serialization`] is returned when the tables are inconsistent.
    fn validate(&self) -> Result<()>;

    /// Exports the model.
    ///
    /// # Errors
    ///
    /// When bincode or the writer generates an error, it will be returned as is.
    fn write<W>(&self, mut wtr: W) -> Result<()>
    where
        W: Write,
    {
        wtr.write_all(MAGIC)?;
        wtr.write_all(&FORMAT_VERSION.to_le_bytes())?;
        wtr.write_all(&[Self::KIND as u8])?;
        bincode::encode_into_std_write(self, &mut wtr, config())?;
        wtr.flush()?;
        Ok(())
    }

    /// Reads a model exported by [`Model::write()`].
    ///
    /// # Errors
    ///
    /// [`RuseqError::Serialization`] is returned when the data is corrupt, was written by an
    /// incompatible version, or holds another kind of model.
    fn read<R>(mut rdr: R) -> Result<Self>
    where
        R: Read,
    {
        let mut header = [0; 11];
        rdr.read_exact(&mut header)
            .map_err(|e| RuseqError::serialization(format!("cannot read header: {e}")))?;
        if &header[..6] != MAGIC {
            return Err(RuseqError::serialization("invalid magic number"));
        }
        let mut version = [0; 4];
        version.copy_from_slice(&header[6..10]);
        let version = u32::from_le_bytes(version);
        if version != FORMAT_VERSION {
            return Err(RuseqError::serialization(format!(
                "unsupported format version {version}"
            )));
        }
        if header[10] != Self::KIND as u8 {
            return Err(RuseqError::serialization(format!(
                "expected a {:?} model but found kind {}",
                Self::KIND,
                header[10]
            )));
        }
        let model: Self = bincode::decode_from_std_read(&mut rdr, config())?;
        model.validate()?;
        Ok(model)
    }

    /// Saves the model to a file.
    ///
    /// # Errors
    ///
    /// See [`Model::write()`].
    fn save<P>(&self, path: P) -> Result<()>
    where
        P: AsRef<Path>,
    {
        self.write(BufWriter::new(File::create(path)?))
    }

    /// Loads a model from a file.
    ///
    /// # Errors
    ///
    /// See [`Model::read()`].
    fn load<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        Self::read(BufReader::new(File::open(path)?))
    }
}

/// A trainer that estimates a model from annotated examples.
pub trait Train {
    /// A training example.
    type Example;

    /// The trained model.
    type Model: Model;

    /// Estimates a new model.
    ///
    /// # Errors
    ///
    /// Invalid inputs are reported before any computation begins.
    fn train(&self, examples: &[Self::Example]) -> Result<Self::Model>;
}

/// A token sequence annotated with one label per token.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaggedSequence {
    /// Tokens.
    pub tokens: Vec<String>,

    /// Labels.
    pub tags: Vec<String>,
}

impl TaggedSequence {
    /// Creates a new example.
    pub fn new<I, J, S, T>(tokens: I, tags: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub(crate) fn check_dimensions(examples: &[Self]) -> Result<()> {
        if examples.is_empty() {
            return Err(RuseqError::EmptyTrainingSet);
        }
        for (i, example) in examples.iter().enumerate() {
            if example.tokens.len() != example.tags.len() {
                return Err(RuseqError::dimension_mismatch(
                    i,
                    example.tokens.len(),
                    example.tags.len(),
                ));
            }
        }
        Ok(())
    }
}

#[inline(always)]
fn config() -> impl bincode::config::Config {
    bincode::config::standard().with_limit::<MAX_MODEL_BYTES>()
}
