//! Deterministic tokenizer for unit tests.

use crate::tokenizer::{EncodeOptions, Encoding, PromptTokenizer};
use sftkit_core::Result;

pub(crate) const PAD: u32 = 0;
pub(crate) const BOS: u32 = 1;
pub(crate) const EOS: u32 = 2;

/// One token per character, `</s>` and `<s>` as single special tokens and a
/// leading BOS on every encoding.
pub(crate) struct CharTokenizer {
    specials: Vec<(String, u32)>,
    pad: Option<u32>,
}

impl CharTokenizer {
    pub(crate) fn new() -> Self {
        Self {
            specials: vec![("</s>".to_string(), EOS), ("<s>".to_string(), BOS)],
            pad: Some(PAD),
        }
    }

    /// Use a different pad id, e.g. EOS for tokenizers without a pad token.
    pub(crate) fn with_pad(mut self, pad: Option<u32>) -> Self {
        self.pad = pad;
        self
    }

    pub(crate) fn char_id(c: char) -> u32 {
        1000 + c as u32
    }

    pub(crate) fn ids(text: &str) -> Vec<u32> {
        text.chars().map(Self::char_id).collect()
    }
}

impl PromptTokenizer for CharTokenizer {
    fn encode_with_offsets(&self, text: &str, options: EncodeOptions) -> Result<Encoding> {
        let mut encoding = Encoding {
            ids: vec![BOS],
            offsets: vec![(0, 0)],
        };

        let mut pos = 0;
        while pos < text.len() {
            let rest = &text[pos..];
            if let Some((token, id)) = self
                .specials
                .iter()
                .find(|(token, _)| rest.starts_with(token.as_str()))
            {
                encoding.ids.push(*id);
                encoding.offsets.push((pos, pos + token.len()));
                pos += token.len();
                continue;
            }

            let c = rest.chars().next().unwrap();
            encoding.ids.push(Self::char_id(c));
            encoding.offsets.push((pos, pos + c.len_utf8()));
            pos += c.len_utf8();
        }

        encoding.apply_options(options, self.pad)?;
        Ok(encoding)
    }

    fn eos_token_id(&self) -> Option<u32> {
        Some(EOS)
    }

    fn bos_token_id(&self) -> Option<u32> {
        Some(BOS)
    }

    fn pad_token_id(&self) -> Option<u32> {
        self.pad
    }

    fn add_special_tokens(&mut self, tokens: &[String]) -> Result<usize> {
        let mut added = 0;
        for token in tokens {
            if self.specials.iter().all(|(t, _)| t != token) {
                let id = 10 + self.specials.len() as u32;
                self.specials.push((token.clone(), id));
                added += 1;
            }
        }
        Ok(added)
    }
}
