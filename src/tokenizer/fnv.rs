use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use super::{Token, Tokenizer};
use crate::config::TokenizerConfig;
use crate::error::{GeodexError, Result};
use crate::models::{PhraseId, TermId};

const FNV_OFFSET: u32 = 0x811C_9DC5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Bits of a term id
const TERM_BITS: u32 = 30;
/// Bits of the phrase text hash; the low 12 bits of a phrase id cluster it
/// by first term.
const PHRASE_BITS: u32 = 20;
const PHRASE_CLUSTER: u64 = 4096;
/// Shortest prefix kept as a degenerate variant
const MIN_DEGEN_CHARS: usize = 3;

/// 32-bit FNV-1a
pub fn fnv1a(text: &str) -> u32 {
    text.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// FNV-1a xor-folded to `bits` bits
pub fn fnvfold(text: &str, bits: u32) -> u32 {
    let mask = (1u32 << bits) - 1;
    let hash = fnv1a(text);
    (hash >> bits) ^ (hash & mask)
}

/// Default tokenizer: lowercased unicode words hashed with folded FNV-1a.
pub struct FnvTokenizer {
    config: TokenizerConfig,
    strip: Regex,
    separators: Regex,
}

impl FnvTokenizer {
    pub fn new(config: &TokenizerConfig) -> Result<Self> {
        let strip = Regex::new(r"[\^'’.]+")
            .map_err(|e| GeodexError::Internal(format!("invalid tokenizer pattern: {}", e)))?;
        let separators = Regex::new(r"[-,/]+")
            .map_err(|e| GeodexError::Internal(format!("invalid tokenizer pattern: {}", e)))?;
        Ok(Self {
            config: config.clone(),
            strip,
            separators,
        })
    }

    fn normalize(&self, text: &str) -> String {
        let text = if self.config.lowercase {
            text.to_lowercase()
        } else {
            text.to_string()
        };
        let text = self.strip.replace_all(&text, "");
        self.separators.replace_all(&text, " ").into_owned()
    }

    /// Term id of normalized text. 0 is the frequency sentinel and never issued.
    pub fn term_id(text: &str) -> TermId {
        match fnvfold(text, TERM_BITS) {
            0 => 1,
            id => u64::from(id),
        }
    }
}

impl Tokenizer for FnvTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        self.normalize(text)
            .unicode_words()
            .filter(|word| {
                let len = word.chars().count();
                len >= self.config.min_token_length && len <= self.config.max_token_length
            })
            .map(|word| Token::new(Self::term_id(word), word))
            .collect()
    }

    fn phrase_id(&self, terms: &[Token]) -> PhraseId {
        let text = self.phrase_text(terms);
        let first = terms.first().map(|t| t.text.as_str()).unwrap_or("");
        let a = u64::from(fnvfold(&text, PHRASE_BITS));
        let b = u64::from(fnvfold(first, TERM_BITS)) % PHRASE_CLUSTER;
        a * PHRASE_CLUSTER + b
    }

    fn degenerate_variants(&self, term: &Token) -> Vec<(TermId, u64)> {
        let chars: Vec<char> = term.text.chars().collect();
        let len = chars.len();
        let mut out = Vec::new();
        let mut removed = 0;
        loop {
            let prefix: String = chars[..len - removed].iter().collect();
            let relation = term.id * 4 + removed.min(3) as u64;
            out.push((Self::term_id(&prefix), relation));
            removed += 1;
            if removed >= len || len - removed < MIN_DEGEN_CHARS {
                break;
            }
        }
        out
    }
}
