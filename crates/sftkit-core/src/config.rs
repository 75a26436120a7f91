//! Configuration types for sftkit.

use crate::{PromptFormat, SftError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How multi-turn labels are aligned with the transcript tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ConversationMasking {
    /// Encode the transcript once with offsets and keep only tokens that
    /// overlap an assistant span.
    TokenSpans,
    /// Split the transcript into rounds and re-encode each fragment to
    /// estimate boundaries.
    RoundReencode {
        /// Tokens subtracted from the encoded length of each instruction
        /// fragment. 2 matches the Llama SentencePiece tokenizer (leading BOS
        /// plus the dangling space piece after the role header).
        #[serde(default = "default_instruction_offset")]
        instruction_offset: usize,
    },
}

impl Default for ConversationMasking {
    fn default() -> Self {
        Self::TokenSpans
    }
}

impl ConversationMasking {
    /// Round re-encoding with the Llama offset.
    pub fn round_reencode() -> Self {
        Self::RoundReencode {
            instruction_offset: default_instruction_offset(),
        }
    }
}

/// Tokenization and label masking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizationConfig {
    /// Maximum sequence length. Longer encodings are truncated.
    #[serde(default = "default_sequence_len")]
    pub sequence_len: usize,

    /// Train on the prompt as well as the response.
    #[serde(default)]
    pub train_on_inputs: bool,

    /// Append EOS to single-turn encodings that do not already end with it.
    #[serde(default = "default_true")]
    pub add_eos_token: bool,

    /// Label alignment for multi-turn conversations.
    #[serde(default)]
    pub conversation_masking: ConversationMasking,
}

impl Default for TokenizationConfig {
    fn default() -> Self {
        Self {
            sequence_len: default_sequence_len(),
            train_on_inputs: false,
            add_eos_token: true,
            conversation_masking: ConversationMasking::default(),
        }
    }
}

impl TokenizationConfig {
    /// Reject configurations that cannot produce records.
    pub fn validate(&self) -> crate::Result<()> {
        if self.sequence_len == 0 {
            return Err(SftError::Config("sequence_len must be positive".into()));
        }
        Ok(())
    }
}

/// Special tokens to register on the tokenizer at load time.
///
/// Any token set here also overrides the id lookup for its role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpecialTokensConfig {
    /// Beginning-of-sequence token.
    #[serde(default)]
    pub bos_token: Option<String>,

    /// End-of-sequence token.
    #[serde(default)]
    pub eos_token: Option<String>,

    /// Padding token.
    #[serde(default)]
    pub pad_token: Option<String>,

    /// Unknown token.
    #[serde(default)]
    pub unk_token: Option<String>,

    /// Extra special tokens without a dedicated role.
    #[serde(default)]
    pub additional_tokens: Vec<String>,
}

impl SpecialTokensConfig {
    /// All configured token strings, role tokens first.
    pub fn all_tokens(&self) -> Vec<String> {
        [
            &self.bos_token,
            &self.eos_token,
            &self.pad_token,
            &self.unk_token,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .chain(self.additional_tokens.iter().cloned())
        .collect()
    }

    /// Whether nothing is configured.
    pub fn is_empty(&self) -> bool {
        self.all_tokens().is_empty()
    }
}

/// Tokenizer loading configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenizerConfig {
    /// Path to a `tokenizer.json` file.
    #[serde(default)]
    pub path: PathBuf,

    /// Special tokens to register.
    #[serde(default)]
    pub special_tokens: SpecialTokensConfig,
}

/// Dataset configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Path to a JSONL file of raw examples.
    #[serde(default)]
    pub path: PathBuf,

    /// Example layout; `None` detects it from the first example.
    #[serde(default)]
    pub format: Option<PromptFormat>,

    /// Maximum examples to use (None for all).
    #[serde(default)]
    pub max_samples: Option<usize>,

    /// Shuffle the tokenized records.
    #[serde(default)]
    pub shuffle: bool,

    /// Random seed for shuffling.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            format: None,
            max_samples: None,
            shuffle: false,
            seed: default_seed(),
        }
    }
}

// Default value functions
fn default_sequence_len() -> usize {
    2048
}
fn default_true() -> bool {
    true
}
fn default_instruction_offset() -> usize {
    2
}
fn default_seed() -> u64 {
    42
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenization_defaults() {
        let config: TokenizationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.sequence_len, 2048);
        assert!(!config.train_on_inputs);
        assert!(config.add_eos_token);
        assert_eq!(config.conversation_masking, ConversationMasking::TokenSpans);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_round_reencode_offset_default() {
        let config: TokenizationConfig =
            serde_json::from_str(r#"{"conversation_masking": {"mode": "round_reencode"}}"#)
                .unwrap();
        assert_eq!(
            config.conversation_masking,
            ConversationMasking::RoundReencode {
                instruction_offset: 2
            }
        );
    }

    #[test]
    fn test_zero_sequence_len_rejected() {
        let config = TokenizationConfig {
            sequence_len: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_special_tokens_order() {
        let tokens = SpecialTokensConfig {
            pad_token: Some("[PAD]".into()),
            bos_token: Some("<s>".into()),
            additional_tokens: vec!["<tool>".into()],
            ..Default::default()
        };
        assert_eq!(tokens.all_tokens(), vec!["<s>", "[PAD]", "<tool>"]);
        assert!(SpecialTokensConfig::default().is_empty());
    }

    #[test]
    fn test_dataset_format_optional() {
        let config: DatasetConfig =
            serde_json::from_str(r#"{"path": "data.jsonl", "format": "sharegpt"}"#).unwrap();
        assert_eq!(config.format, Some(PromptFormat::ShareGpt));
        assert_eq!(config.seed, 42);
    }
}
