//! Tokenizer integration.
//!
//! Prompt tokenization only needs a small contract from the tokenizer:
//! encoding with byte offsets, the ids of a few special tokens, and a way to
//! register extra special tokens. [`PromptTokenizer`] captures that contract;
//! [`Tokenizer`] implements it on top of the `tokenizers` library.

use sftkit_core::{
    Result, SftError, SpecialTokensConfig, LLAMA_DEFAULT_BOS_TOKEN, LLAMA_DEFAULT_EOS_TOKEN,
    LLAMA_DEFAULT_PAD_TOKEN, LLAMA_DEFAULT_UNK_TOKEN,
};
use std::path::Path;
use tokenizers::AddedToken;

const EOS_CANDIDATES: &[&str] = &[
    LLAMA_DEFAULT_EOS_TOKEN,
    "<|endoftext|>",
    "<|end_of_text|>",
    "<eos>",
];
const BOS_CANDIDATES: &[&str] = &[LLAMA_DEFAULT_BOS_TOKEN, "<|begin_of_text|>", "<bos>"];
const PAD_CANDIDATES: &[&str] = &[
    LLAMA_DEFAULT_PAD_TOKEN,
    "<pad>",
    "<|pad|>",
    "<|finetune_right_pad_id|>",
];
const UNK_CANDIDATES: &[&str] = &[LLAMA_DEFAULT_UNK_TOKEN, "[UNK]", "<|unk|>"];

/// Truncation and padding applied to an encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncodeOptions {
    /// Target length for truncation and padding.
    pub max_length: Option<usize>,
    /// Drop tokens past `max_length`.
    pub truncation: bool,
    /// Right-pad with the pad token up to `max_length`.
    pub padding: bool,
}

impl EncodeOptions {
    /// Truncate at `max_length`, no padding.
    pub fn truncated(max_length: usize) -> Self {
        Self {
            max_length: Some(max_length),
            truncation: true,
            padding: false,
        }
    }
}

/// Token ids and their byte spans in the encoded text.
///
/// Tokens inserted by the tokenizer (BOS, padding) have a zero-width span.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Encoding {
    /// Token IDs.
    pub ids: Vec<u32>,
    /// `(start, end)` byte offsets, one per id.
    pub offsets: Vec<(usize, usize)>,
}

impl Encoding {
    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the encoding is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Apply truncation and padding in place.
    ///
    /// Padding without a pad id is an error since there is nothing to pad with.
    pub fn apply_options(&mut self, options: EncodeOptions, pad_id: Option<u32>) -> Result<()> {
        let Some(max_length) = options.max_length else {
            return Ok(());
        };

        if options.truncation && self.ids.len() > max_length {
            self.ids.truncate(max_length);
            self.offsets.truncate(max_length);
        }

        if options.padding && self.ids.len() < max_length {
            let pad_id = pad_id.ok_or_else(|| {
                SftError::Tokenizer("padding requested but tokenizer has no pad token".into())
            })?;
            let end = self.offsets.last().map_or(0, |&(_, end)| end);
            self.ids.resize(max_length, pad_id);
            self.offsets.resize(max_length, (end, end));
        }

        Ok(())
    }
}

/// Tokenizer contract required by prompt tokenization.
///
/// Implementations must be deterministic and safe to share across threads
/// for read-only encoding.
pub trait PromptTokenizer: Send + Sync {
    /// Encode text with the model's special tokens, returning ids and offsets.
    fn encode_with_offsets(&self, text: &str, options: EncodeOptions) -> Result<Encoding>;

    /// Encode text to token IDs.
    fn encode(&self, text: &str, options: EncodeOptions) -> Result<Vec<u32>> {
        Ok(self.encode_with_offsets(text, options)?.ids)
    }

    /// End-of-sequence token ID.
    fn eos_token_id(&self) -> Option<u32>;

    /// Beginning-of-sequence token ID.
    fn bos_token_id(&self) -> Option<u32>;

    /// Padding token ID.
    fn pad_token_id(&self) -> Option<u32>;

    /// Register special tokens, returning how many were new.
    fn add_special_tokens(&mut self, tokens: &[String]) -> Result<usize>;
}

/// Wrapper around the tokenizers library.
pub struct Tokenizer {
    inner: tokenizers::Tokenizer,
    bos_token: Option<String>,
    eos_token: Option<String>,
    pad_token: Option<String>,
    unk_token: Option<String>,
}

impl Tokenizer {
    /// Load a tokenizer from a local file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path.as_ref())
            .map_err(|e| SftError::Tokenizer(e.to_string()))?;
        Self::from_inner(inner)
    }

    /// Load a tokenizer from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_bytes(bytes)
            .map_err(|e| SftError::Tokenizer(e.to_string()))?;
        Self::from_inner(inner)
    }

    /// Wrap an already constructed tokenizer.
    ///
    /// Padding and truncation stored in the tokenizer file are cleared;
    /// [`EncodeOptions`] is the only place they are applied.
    pub fn from_inner(mut inner: tokenizers::Tokenizer) -> Result<Self> {
        inner.with_padding(None);
        inner
            .with_truncation(None)
            .map_err(|e| SftError::Tokenizer(e.to_string()))?;
        Ok(Self {
            inner,
            bos_token: None,
            eos_token: None,
            pad_token: None,
            unk_token: None,
        })
    }

    /// Register the configured special tokens and use them as role overrides.
    ///
    /// A tokenizer without a pad token gets [`LLAMA_DEFAULT_PAD_TOKEN`]
    /// registered, so padding never shares the EOS id.
    pub fn with_special_tokens(mut self, config: &SpecialTokensConfig) -> Result<Self> {
        let tokens = config.all_tokens();
        if !tokens.is_empty() {
            let added = self.add_special_tokens(&tokens)?;
            tracing::debug!(added, total = tokens.len(), "Registered special tokens");
        }

        self.bos_token = config.bos_token.clone().or(self.bos_token.take());
        self.eos_token = config.eos_token.clone().or(self.eos_token.take());
        self.pad_token = config.pad_token.clone().or(self.pad_token.take());
        self.unk_token = config.unk_token.clone().or(self.unk_token.take());

        if self.pad_token_id().is_none() {
            let pad = LLAMA_DEFAULT_PAD_TOKEN.to_string();
            self.add_special_tokens(std::slice::from_ref(&pad))?;
            tracing::debug!("No pad token found, registered {}", pad);
            self.pad_token = Some(pad);
        }
        if self.pad_token_id().is_some() && self.pad_token_id() == self.eos_token_id() {
            tracing::warn!("PAD and EOS share an id, end markers will be masked from attention");
        }

        tracing::debug!("EOS: {:?} / {:?}", self.eos_token_id(), self.eos_token);
        tracing::debug!("BOS: {:?} / {:?}", self.bos_token_id(), self.bos_token);
        tracing::debug!("PAD: {:?} / {:?}", self.pad_token_id(), self.pad_token);
        tracing::debug!("UNK: {:?} / {:?}", self.unk_token_id(), self.unk_token);

        Ok(self)
    }

    /// Decode token IDs to text.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| SftError::Tokenizer(e.to_string()))
    }

    /// Decode token IDs to text without skipping special tokens.
    pub fn decode_with_special_tokens(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, false)
            .map_err(|e| SftError::Tokenizer(e.to_string()))
    }

    /// Get vocabulary size, including added tokens.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    /// Get the underlying tokenizer.
    pub fn inner(&self) -> &tokenizers::Tokenizer {
        &self.inner
    }

    /// Get UNK token ID if available.
    pub fn unk_token_id(&self) -> Option<u32> {
        self.lookup(self.unk_token.as_deref(), UNK_CANDIDATES)
    }

    fn lookup(&self, configured: Option<&str>, candidates: &[&str]) -> Option<u32> {
        if let Some(token) = configured {
            return self.inner.token_to_id(token);
        }
        candidates
            .iter()
            .find_map(|candidate| self.inner.token_to_id(candidate))
    }
}

impl PromptTokenizer for Tokenizer {
    fn encode_with_offsets(&self, text: &str, options: EncodeOptions) -> Result<Encoding> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| SftError::Tokenizer(e.to_string()))?;

        let mut result = Encoding {
            ids: encoding.get_ids().to_vec(),
            offsets: encoding.get_offsets().to_vec(),
        };
        result.apply_options(options, self.pad_token_id())?;
        Ok(result)
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.lookup(self.eos_token.as_deref(), EOS_CANDIDATES)
    }

    fn bos_token_id(&self) -> Option<u32> {
        self.lookup(self.bos_token.as_deref(), BOS_CANDIDATES)
    }

    /// Tries common pad token names. There is no EOS fallback since the
    /// attention mask is derived from the pad id.
    fn pad_token_id(&self) -> Option<u32> {
        self.lookup(self.pad_token.as_deref(), PAD_CANDIDATES)
    }

    fn add_special_tokens(&mut self, tokens: &[String]) -> Result<usize> {
        let added: Vec<AddedToken> = tokens
            .iter()
            .map(|t| AddedToken::from(t.clone(), true))
            .collect();
        Ok(self.inner.add_special_tokens(&added))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoding(ids: Vec<u32>) -> Encoding {
        let offsets = (0..ids.len()).map(|i| (i, i + 1)).collect();
        Encoding { ids, offsets }
    }

    fn padded(max_length: usize) -> EncodeOptions {
        EncodeOptions {
            padding: true,
            ..EncodeOptions::truncated(max_length)
        }
    }

    #[test]
    fn test_truncation_keeps_prefix() {
        let mut enc = encoding(vec![1, 2, 3, 4, 5]);
        enc.apply_options(EncodeOptions::truncated(3), None).unwrap();
        assert_eq!(enc.ids, vec![1, 2, 3]);
        assert_eq!(enc.offsets.len(), 3);
    }

    #[test]
    fn test_padding_uses_pad_id() {
        let mut enc = encoding(vec![7, 8]);
        enc.apply_options(padded(4), Some(0)).unwrap();
        assert_eq!(enc.ids, vec![7, 8, 0, 0]);
        assert_eq!(enc.offsets[2], (2, 2));
    }

    #[test]
    fn test_padding_without_pad_id_fails() {
        let mut enc = encoding(vec![7]);
        let result = enc.apply_options(padded(4), None);
        assert!(result.is_err());
    }

    #[test]
    fn test_no_max_length_is_noop() {
        let mut enc = encoding(vec![1, 2, 3]);
        enc.apply_options(EncodeOptions::default(), None).unwrap();
        assert_eq!(enc.ids, vec![1, 2, 3]);
    }

    const EOS_ID: u32 = 2;

    /// Whitespace word-level tokenizer with Llama specials and no pad token.
    fn word_level_json() -> Vec<u8> {
        let special = |id: u32, content: &str| {
            serde_json::json!({
                "id": id,
                "content": content,
                "single_word": false,
                "lstrip": false,
                "rstrip": false,
                "normalized": false,
                "special": true
            })
        };
        let json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [special(0, "<unk>"), special(1, "<s>"), special(EOS_ID, "</s>")],
            "normalizer": null,
            "pre_tokenizer": {"type": "WhitespaceSplit"},
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": {
                    "<unk>": 0, "<s>": 1, "</s>": 2,
                    "USER:": 3, "ASSISTANT:": 4, "Hi": 5, "Hello": 6, "Done": 7
                },
                "unk_token": "<unk>"
            }
        });
        serde_json::to_vec(&json).unwrap()
    }

    fn word_level() -> Tokenizer {
        Tokenizer::from_bytes(&word_level_json()).unwrap()
    }

    #[test]
    fn test_special_ids_from_candidate_names() {
        let tokenizer = word_level();
        assert_eq!(tokenizer.unk_token_id(), Some(0));
        assert_eq!(tokenizer.bos_token_id(), Some(1));
        assert_eq!(tokenizer.eos_token_id(), Some(EOS_ID));
        // No pad token and no EOS fallback.
        assert_eq!(tokenizer.pad_token_id(), None);
    }

    #[test]
    fn test_missing_pad_registers_default() {
        let tokenizer = word_level()
            .with_special_tokens(&SpecialTokensConfig::default())
            .unwrap();

        let pad = tokenizer.pad_token_id().unwrap();
        assert_ne!(pad, EOS_ID);
        assert_eq!(tokenizer.inner().token_to_id(LLAMA_DEFAULT_PAD_TOKEN), Some(pad));
    }

    #[test]
    fn test_configured_tokens_override_lookup() {
        let config = SpecialTokensConfig {
            eos_token: Some("<|end|>".to_string()),
            pad_token: Some("<pad>".to_string()),
            additional_tokens: vec!["<tool>".to_string()],
            ..Default::default()
        };
        let tokenizer = word_level().with_special_tokens(&config).unwrap();

        let end = tokenizer.inner().token_to_id("<|end|>").unwrap();
        assert_eq!(tokenizer.eos_token_id(), Some(end));
        assert_eq!(tokenizer.pad_token_id(), tokenizer.inner().token_to_id("<pad>"));
        assert!(tokenizer.inner().token_to_id("<tool>").is_some());
        // Configured pad wins, nothing else registered.
        assert!(tokenizer.inner().token_to_id(LLAMA_DEFAULT_PAD_TOKEN).is_none());
    }

    #[test]
    fn test_offsets_follow_text() {
        let tokenizer = word_level();
        let enc = tokenizer
            .encode_with_offsets("Hi Hello</s>", EncodeOptions::default())
            .unwrap();
        assert_eq!(enc.ids, vec![5, 6, EOS_ID]);
        assert_eq!(enc.offsets, vec![(0, 2), (3, 8), (8, 12)]);
    }

    #[test]
    fn test_file_padding_and_truncation_cleared() {
        use tokenizers::{PaddingParams, PaddingStrategy, TruncationParams};

        let mut inner = tokenizers::Tokenizer::from_bytes(word_level_json()).unwrap();
        inner.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(64),
            ..Default::default()
        }));
        inner
            .with_truncation(Some(TruncationParams {
                max_length: 1,
                ..Default::default()
            }))
            .unwrap();

        let tokenizer = Tokenizer::from_inner(inner).unwrap();
        let ids = tokenizer.encode("Hi Hello", EncodeOptions::default()).unwrap();
        assert_eq!(ids, vec![5, 6]);
    }

    #[test]
    fn test_alpaca_record_with_padded_tokenizer_file() {
        use crate::strategy::TokenizingStrategy;
        use sftkit_core::{PromptFormat, TokenizationConfig};
        use tokenizers::{PaddingParams, PaddingStrategy};

        let mut inner = tokenizers::Tokenizer::from_bytes(word_level_json()).unwrap();
        inner.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(64),
            ..Default::default()
        }));
        let tokenizer = Tokenizer::from_inner(inner).unwrap();

        let strategy = TokenizingStrategy::new(
            PromptFormat::Alpaca,
            std::sync::Arc::new(tokenizer),
            TokenizationConfig::default(),
        )
        .unwrap();
        let record = strategy
            .tokenize_prompt(&serde_json::json!({"instruction": "x", "output": "Done"}))
            .unwrap();

        assert!(record.len() < 64);
        assert_eq!(record.labels[record.len() - 2..], [7, i64::from(EOS_ID)]);
        assert_eq!(record.num_trainable(), 2);
        assert!(record.attention_mask.iter().all(|&m| m == 1));
    }

    #[test]
    fn test_sharegpt_end_markers_stay_trainable() {
        use crate::collator::DataCollator;
        use crate::strategy::TokenizingStrategy;
        use sftkit_core::{PromptFormat, TokenizationConfig};

        let tokenizer = word_level()
            .with_special_tokens(&SpecialTokensConfig::default())
            .unwrap();
        let pad = tokenizer.pad_token_id().unwrap();

        let strategy = TokenizingStrategy::new(
            PromptFormat::ShareGpt,
            std::sync::Arc::new(tokenizer),
            TokenizationConfig::default(),
        )
        .unwrap();
        let example = serde_json::json!({"conversations": [
            {"from": "human", "value": "Hi"},
            {"from": "gpt", "value": "Hello"},
            {"from": "human", "value": "Hi"},
            {"from": "gpt", "value": "Hello"}
        ]});
        let record = strategy.tokenize_prompt(&example).unwrap();

        let eos_positions: Vec<usize> = record
            .input_ids
            .iter()
            .enumerate()
            .filter(|&(_, &id)| id == EOS_ID)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(eos_positions.len(), 2);
        for &i in &eos_positions {
            assert_eq!(record.attention_mask[i], 1);
            assert_eq!(record.labels[i], i64::from(EOS_ID));
        }

        let batch = DataCollator::new(pad, 4096).collate(std::slice::from_ref(&record));
        for &i in &eos_positions {
            assert_eq!(batch.labels[0][i], i64::from(EOS_ID));
        }
    }
}
