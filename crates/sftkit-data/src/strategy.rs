//! Tokenizing strategies.
//!
//! A strategy turns one raw example into a [`TokenRecord`] whose labels only
//! score what the model is expected to produce:
//!
//! - Single-turn (Alpaca, GPTeacher): the instruction prompt is masked, the
//!   response and the appended EOS are trained on.
//! - Multi-turn (ShareGPT): the system preamble, user turns and assistant
//!   role headers are masked, assistant replies and their end markers are
//!   trained on.
//!
//! Masked positions carry [`IGNORE_INDEX`].

use crate::conversation::{parse_turns, ConversationTemplate, RenderedConversation, ShareGptPrompter};
use crate::prompters::AlpacaPrompter;
use crate::tokenizer::{EncodeOptions, Encoding, PromptTokenizer};
use serde_json::Value;
use sftkit_core::{
    ConversationMasking, InvalidExample, PromptFormat, Result, SftError, TokenRecord,
    TokenizationConfig, IGNORE_INDEX,
};
use std::sync::Arc;

/// Tokenizing strategy, one variant per raw example layout.
#[derive(Clone)]
pub enum TokenizingStrategy {
    /// Instruction / input / output examples.
    Alpaca(InstructionStrategy),
    /// Instruction / input / response examples.
    GpTeacher(InstructionStrategy),
    /// Multi-turn ShareGPT conversations.
    ShareGpt(ShareGptStrategy),
}

impl TokenizingStrategy {
    /// Build the strategy for `format` with the default prompt templates.
    pub fn new(
        format: PromptFormat,
        tokenizer: Arc<dyn PromptTokenizer>,
        config: TokenizationConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(match format {
            PromptFormat::Alpaca => Self::Alpaca(InstructionStrategy::new(
                AlpacaPrompter::new(),
                tokenizer,
                config,
            )),
            PromptFormat::GpTeacher => Self::GpTeacher(InstructionStrategy::new(
                AlpacaPrompter::gpteacher(),
                tokenizer,
                config,
            )),
            PromptFormat::ShareGpt => Self::ShareGpt(ShareGptStrategy::new(
                ShareGptPrompter::default(),
                tokenizer,
                config,
            )),
        })
    }

    /// ShareGPT strategy with a custom conversation template.
    ///
    /// Round re-encoding splits rounds on the secondary separator, so it is
    /// rejected for templates whose two separators are equal.
    pub fn sharegpt(
        template: ConversationTemplate,
        tokenizer: Arc<dyn PromptTokenizer>,
        config: TokenizationConfig,
    ) -> Result<Self> {
        config.validate()?;
        if let ConversationMasking::RoundReencode { .. } = config.conversation_masking {
            let [sep, round_sep] = template.separators();
            if sep == round_sep {
                return Err(SftError::Config(format!(
                    "round_reencode masking needs distinct separators, template '{}' uses '{}' for both",
                    template.name, sep
                )));
            }
        }
        Ok(Self::ShareGpt(ShareGptStrategy::new(
            ShareGptPrompter::new(template),
            tokenizer,
            config,
        )))
    }

    /// Example layout handled by this strategy.
    pub fn format(&self) -> PromptFormat {
        match self {
            Self::Alpaca(_) => PromptFormat::Alpaca,
            Self::GpTeacher(_) => PromptFormat::GpTeacher,
            Self::ShareGpt(_) => PromptFormat::ShareGpt,
        }
    }

    /// Tokenize one raw example.
    ///
    /// Structurally invalid examples fail with a recoverable
    /// [`SftError::InvalidExample`](sftkit_core::SftError::InvalidExample).
    pub fn tokenize_prompt(&self, example: &Value) -> Result<TokenRecord> {
        match self {
            Self::Alpaca(strategy) | Self::GpTeacher(strategy) => strategy.tokenize_prompt(example),
            Self::ShareGpt(strategy) => strategy.tokenize_prompt(example),
        }
    }
}

/// Single-turn strategy shared by Alpaca and GPTeacher.
#[derive(Clone)]
pub struct InstructionStrategy {
    prompter: AlpacaPrompter,
    tokenizer: Arc<dyn PromptTokenizer>,
    config: TokenizationConfig,
}

impl InstructionStrategy {
    /// Create a new strategy.
    pub fn new(
        prompter: AlpacaPrompter,
        tokenizer: Arc<dyn PromptTokenizer>,
        config: TokenizationConfig,
    ) -> Self {
        Self {
            prompter,
            tokenizer,
            config,
        }
    }

    /// The prompter.
    pub fn prompter(&self) -> &AlpacaPrompter {
        &self.prompter
    }

    /// Tokenize an `{instruction, input?, <target>?}` example.
    pub fn tokenize_prompt(&self, example: &Value) -> Result<TokenRecord> {
        let instruction = required_str(example, "instruction")?;
        let input = optional_str(example, "input")?;
        let output = optional_str(example, self.prompter.target_field().key())?;

        let full_prompt = self.prompter.build_prompt(instruction, input, output);
        let mut record = self.tokenize(&full_prompt, self.config.add_eos_token)?;

        if !self.config.train_on_inputs {
            // Assumes the prompt tokens are a prefix of the full tokens.
            let user_prompt = self.prompter.build_prompt(instruction, input, None);
            let user_prompt_len = self.tokenize(&user_prompt, false)?.len();
            mask_range(&mut record.labels, 0, user_prompt_len);
        }

        Ok(record)
    }

    fn tokenize(&self, text: &str, add_eos_token: bool) -> Result<TokenRecord> {
        let sequence_len = self.config.sequence_len;
        let mut input_ids = self
            .tokenizer
            .encode(text, EncodeOptions::truncated(sequence_len))?;

        if add_eos_token {
            if let Some(eos) = self.tokenizer.eos_token_id() {
                if input_ids.last() != Some(&eos) && input_ids.len() < sequence_len {
                    input_ids.push(eos);
                }
            }
        }

        Ok(TokenRecord::unmasked(input_ids))
    }
}

/// Multi-turn ShareGPT strategy.
#[derive(Clone)]
pub struct ShareGptStrategy {
    prompter: ShareGptPrompter,
    tokenizer: Arc<dyn PromptTokenizer>,
    config: TokenizationConfig,
}

impl ShareGptStrategy {
    /// Create a new strategy.
    pub fn new(
        prompter: ShareGptPrompter,
        tokenizer: Arc<dyn PromptTokenizer>,
        config: TokenizationConfig,
    ) -> Self {
        Self {
            prompter,
            tokenizer,
            config,
        }
    }

    /// The prompter.
    pub fn prompter(&self) -> &ShareGptPrompter {
        &self.prompter
    }

    /// Tokenize a `{conversations: [...]}` example.
    pub fn tokenize_prompt(&self, example: &Value) -> Result<TokenRecord> {
        let conversations = example
            .get("conversations")
            .ok_or_else(|| InvalidExample::MissingField {
                key: "conversations".to_string(),
            })?;
        let turns = parse_turns(conversations)?;
        let rendered = self.prompter.build_prompt(&turns)?;
        self.tokenize_conversation(&rendered)
    }

    /// Tokenize an already rendered transcript.
    pub fn tokenize_conversation(&self, rendered: &RenderedConversation) -> Result<TokenRecord> {
        let encoding = self.tokenizer.encode_with_offsets(
            &rendered.text,
            EncodeOptions::truncated(self.config.sequence_len),
        )?;

        let pad_id = self.tokenizer.pad_token_id();
        let attention_mask: Vec<u32> = encoding
            .ids
            .iter()
            .map(|&id| u32::from(Some(id) != pad_id))
            .collect();

        let labels = if self.config.train_on_inputs {
            to_labels(&encoding.ids)
        } else {
            match self.config.conversation_masking {
                ConversationMasking::TokenSpans => mask_by_spans(&encoding, rendered),
                ConversationMasking::RoundReencode { instruction_offset } => mask_by_rounds(
                    self.tokenizer.as_ref(),
                    self.prompter.template(),
                    &rendered.text,
                    &encoding.ids,
                    instruction_offset,
                )?,
            }
        };

        Ok(TokenRecord {
            input_ids: encoding.ids,
            attention_mask,
            labels,
        })
    }
}

/// Keep tokens that overlap an assistant span, ignore everything else.
///
/// Zero-width tokens (BOS and other inserted specials) are always ignored.
pub fn mask_by_spans(encoding: &Encoding, rendered: &RenderedConversation) -> Vec<i64> {
    encoding
        .ids
        .iter()
        .zip(&encoding.offsets)
        .map(|(&id, &(start, end))| {
            if rendered.overlaps_target(start..end) {
                i64::from(id)
            } else {
                IGNORE_INDEX
            }
        })
        .collect()
}

/// Estimate round boundaries by re-encoding transcript fragments.
///
/// Requires a template whose secondary separator differs from the primary
/// one; [`TokenizingStrategy::sharegpt`] enforces this.
///
/// The transcript is split into rounds on the secondary separator. For every
/// round the user part (up to and including the assistant header) is masked
/// and the cursor advances by the round's encoded length. Everything after
/// the last recognised round is masked. The cursor starts at 1 to skip the
/// leading BOS, which is left untouched.
///
/// Fragment lengths include the tokenizer's own leading specials, so
/// `instruction_offset` has to match the tokenizer in use.
pub fn mask_by_rounds(
    tokenizer: &dyn PromptTokenizer,
    template: &ConversationTemplate,
    text: &str,
    input_ids: &[u32],
    instruction_offset: usize,
) -> Result<Vec<i64>> {
    let mut target = to_labels(input_ids);
    let round_sep = template.separators()[1];
    let header = template.assistant_header();

    let mut cur_len = 1;
    for round in text.split(round_sep) {
        if round.is_empty() {
            break;
        }

        let parts: Vec<&str> = round.split(header.as_str()).collect();
        if parts.len() != 2 {
            break;
        }
        let instruction = format!("{}{}", parts[0], header);

        let round_len = tokenizer.encode(round, EncodeOptions::default())?.len();
        let instruction_len = tokenizer
            .encode(&instruction, EncodeOptions::default())?
            .len()
            .saturating_sub(instruction_offset);

        mask_range(&mut target, cur_len, cur_len + instruction_len);
        cur_len += round_len;
    }

    let len = target.len();
    mask_range(&mut target, cur_len, len);
    Ok(target)
}

fn to_labels(ids: &[u32]) -> Vec<i64> {
    ids.iter().map(|&id| i64::from(id)).collect()
}

/// Set `labels[start..end]` to [`IGNORE_INDEX`], clamped to the label length.
fn mask_range(labels: &mut [i64], start: usize, end: usize) {
    let end = end.min(labels.len());
    if start < end {
        labels[start..end].fill(IGNORE_INDEX);
    }
}

fn required_str<'a>(example: &'a Value, key: &str) -> std::result::Result<&'a str, InvalidExample> {
    optional_str(example, key)?.ok_or_else(|| InvalidExample::MissingField {
        key: key.to_string(),
    })
}

/// Missing and `null` fields are both absent.
fn optional_str<'a>(
    example: &'a Value,
    key: &str,
) -> std::result::Result<Option<&'a str>, InvalidExample> {
    let object = example
        .as_object()
        .ok_or_else(|| InvalidExample::InvalidField {
            key: key.to_string(),
            reason: "example is not a JSON object".to_string(),
        })?;

    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(InvalidExample::InvalidField {
            key: key.to_string(),
            reason: format!("expected a string, found {}", other),
        }),
    }
}
