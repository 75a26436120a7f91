//! Common type definitions.

use serde::{Deserialize, Serialize};

/// Label value excluded from the training loss.
pub const IGNORE_INDEX: i64 = -100;

/// Default pad token registered for Llama-family tokenizers.
pub const LLAMA_DEFAULT_PAD_TOKEN: &str = "[PAD]";
/// Default Llama end-of-sequence token.
pub const LLAMA_DEFAULT_EOS_TOKEN: &str = "</s>";
/// Default Llama beginning-of-sequence token.
pub const LLAMA_DEFAULT_BOS_TOKEN: &str = "<s>";
/// Default Llama unknown token.
pub const LLAMA_DEFAULT_UNK_TOKEN: &str = "<unk>";

/// Raw example layout, which also selects the tokenizing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptFormat {
    /// `{"instruction", "input", "output"}`
    Alpaca,
    /// `{"instruction", "input", "response"}`
    GpTeacher,
    /// `{"conversations": [{"from", "value"}, ...]}`
    ShareGpt,
}

impl PromptFormat {
    /// Name used in configuration files and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alpaca => "alpaca",
            Self::GpTeacher => "gpteacher",
            Self::ShareGpt => "sharegpt",
        }
    }
}

impl std::fmt::Display for PromptFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PromptFormat {
    type Err = crate::SftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "alpaca" => Ok(Self::Alpaca),
            "gpteacher" => Ok(Self::GpTeacher),
            "sharegpt" => Ok(Self::ShareGpt),
            other => Err(crate::SftError::InvalidArgument(format!(
                "unknown prompt format '{}'",
                other
            ))),
        }
    }
}

/// Token-level training record.
///
/// The three sequences always have the same length. Labels hold either the
/// token id (scored by the loss) or [`IGNORE_INDEX`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Input token IDs.
    pub input_ids: Vec<u32>,
    /// Attention mask (1 = real token, 0 = padding).
    pub attention_mask: Vec<u32>,
    /// Labels, [`IGNORE_INDEX`] for positions excluded from the loss.
    pub labels: Vec<i64>,
}

impl TokenRecord {
    /// Create a record whose labels equal its ids and whose mask is all ones.
    pub fn unmasked(input_ids: Vec<u32>) -> Self {
        let len = input_ids.len();
        Self {
            labels: input_ids.iter().map(|&id| i64::from(id)).collect(),
            attention_mask: vec![1; len],
            input_ids,
        }
    }

    /// Sequence length.
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    /// Whether the record holds no tokens.
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Number of positions that contribute to the loss.
    pub fn num_trainable(&self) -> usize {
        self.labels.iter().filter(|&&l| l != IGNORE_INDEX).count()
    }

    /// Check the length invariant and that every label is either ignored or
    /// equal to the token at the same position.
    pub fn is_consistent(&self) -> bool {
        self.input_ids.len() == self.attention_mask.len()
            && self.input_ids.len() == self.labels.len()
            && self
                .labels
                .iter()
                .zip(&self.input_ids)
                .all(|(&l, &id)| l == IGNORE_INDEX || l == i64::from(id))
    }
}
