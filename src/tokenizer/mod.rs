//! Text to term/phrase id collaborator used by the indexer.

mod fnv;

pub use fnv::{fnv1a, fnvfold, FnvTokenizer};

use crate::models::{PhraseId, TermId};

/// One normalized token and its stable id
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Token {
    pub id: TermId,
    pub text: String,
}

impl Token {
    pub fn new(id: TermId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }
}

/// Deterministic mapping from text to ids, stable across processes.
pub trait Tokenizer: Send + Sync {
    /// Normalized terms of one phrase, in order
    fn tokenize(&self, text: &str) -> Vec<Token>;

    /// Canonical id of a term sequence
    fn phrase_id(&self, terms: &[Token]) -> PhraseId;

    /// Degenerate (prefix) variants of a term as `(variant_id, relation)`.
    /// The full term is always its own first variant.
    fn degenerate_variants(&self, term: &Token) -> Vec<(TermId, u64)>;

    /// Text of a phrase as stored in the completion dictionary
    fn phrase_text(&self, terms: &[Token]) -> String {
        terms
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
