//! Text normalization, tokenization and the persisted vocabulary
//!
//! Raw input such as `"Ăn trưa, 50k!!"` becomes the normalized string
//! `"ăn trưa 50k"`, then the tokens `["ăn", "trưa", "50k"]`, then a
//! fixed-length id sequence. Id 0 is padding and id 1 is out-of-vocabulary.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::persist::{read_json, write_json_atomic};

/// Padding id (right-pads short sequences)
pub const PAD_ID: u32 = 0;
/// Out-of-vocabulary id
pub const OOV_ID: u32 = 1;
/// First id handed out to a real token
pub const FIRST_TOKEN_ID: u32 = 2;

/// Lower-case, strip anything that is not a letter, digit or whitespace, and
/// collapse whitespace runs to single spaces
pub fn normalize(text: &str) -> String {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split normalized text into tokens (empty input yields no tokens)
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Encode text as exactly `max_len` ids, truncating or zero-padding on the right
pub fn text_to_sequence(text: &str, vocab: &Vocabulary, max_len: usize) -> Vec<u32> {
    let mut sequence: Vec<u32> = tokenize(text)
        .iter()
        .take(max_len)
        .map(|t| vocab.id(t))
        .collect();
    sequence.resize(max_len, PAD_ID);
    sequence
}

/// Token to id mapping
///
/// Built once from a corpus and only replaced by retraining. Persisted as a
/// flat JSON object (`{"ăn": 2, "trưa": 3, ...}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vocabulary {
    index: BTreeMap<String, u32>,
}

impl Vocabulary {
    /// Build from a corpus: most frequent tokens first, ties alphabetical
    pub fn build<'a>(texts: impl IntoIterator<Item = &'a str>, max_size: Option<usize>) -> Self {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for text in texts {
            for token in tokenize(text) {
                *counts.entry(token).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        if let Some(limit) = max_size {
            ranked.truncate(limit);
        }

        let index = ranked
            .into_iter()
            .enumerate()
            .map(|(i, (token, _))| (token, FIRST_TOKEN_ID + i as u32))
            .collect();
        Self { index }
    }

    /// Wrap an existing mapping, rejecting reserved or duplicate ids
    pub fn from_map(index: BTreeMap<String, u32>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for (token, &id) in &index {
            if id < FIRST_TOKEN_ID {
                return Err(Error::InvalidData(format!(
                    "Token '{}' uses reserved id {}",
                    token, id
                )));
            }
            if !seen.insert(id) {
                return Err(Error::InvalidData(format!("Duplicate vocabulary id {}", id)));
            }
        }
        Ok(Self { index })
    }

    /// Id for a token, or [`OOV_ID`]
    pub fn id(&self, token: &str) -> u32 {
        self.index.get(token).copied().unwrap_or(OOV_ID)
    }

    /// Number of real tokens (excludes pad and OOV)
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Rows needed in an embedding matrix indexed by these ids
    pub fn embedding_rows(&self) -> usize {
        self.index
            .values()
            .max()
            .map(|&max| max as usize + 1)
            .unwrap_or(FIRST_TOKEN_ID as usize)
    }

    /// SHA-256 over the sorted mapping; stored with the model to detect mismatch
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (token, id) in &self.index {
            hasher.update(token.as_bytes());
            hasher.update(b"\t");
            hasher.update(id.to_string().as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    /// Load from disk; `Ok(None)` if no vocabulary has been saved
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match read_json::<BTreeMap<String, u32>>(path)? {
            Some(index) => Ok(Some(Self::from_map(index)?)),
            None => Ok(None),
        }
    }
}

/// Vocabulary bound to a sequence length
#[derive(Debug, Clone, PartialEq)]
pub struct Tokenizer {
    vocab: Vocabulary,
    max_len: usize,
}

impl Tokenizer {
    pub fn new(vocab: Vocabulary, max_len: usize) -> Self {
        Self { vocab, max_len }
    }

    pub fn encode(&self, text: &str) -> Vec<u32> {
        text_to_sequence(text, &self.vocab, self.max_len)
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }
}
