//! Single-turn instruction prompts.
//!
//! Renders `instruction` / `input` / target fields into the Alpaca prompt
//! layout and recovers the response from generated text.

use sftkit_core::{Result, SftError};

const PREAMBLE_INPUT: &str = "Below is an instruction that describes a task, paired with an input that provides further context. Write a response that appropriately completes the request.";
const PREAMBLE_NO_INPUT: &str = "Below is an instruction that describes a task. Write a response that appropriately completes the request.";

/// Marker that precedes the response in a rendered prompt.
pub const RESPONSE_SPLIT: &str = "### Response:";

/// Field of a raw example that carries the target text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetField {
    /// `output`, used by Alpaca datasets.
    Output,
    /// `response`, used by GPTeacher datasets.
    Response,
}

impl TargetField {
    /// JSON key of the field.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Output => "output",
            Self::Response => "response",
        }
    }
}

/// Alpaca-style prompt builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlpacaPrompter {
    target_field: TargetField,
}

impl Default for AlpacaPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl AlpacaPrompter {
    /// Prompter reading the target from `output`.
    pub fn new() -> Self {
        Self {
            target_field: TargetField::Output,
        }
    }

    /// Prompter reading the target from `response`.
    pub fn gpteacher() -> Self {
        Self {
            target_field: TargetField::Response,
        }
    }

    /// The field holding the target text.
    pub fn target_field(&self) -> TargetField {
        self.target_field
    }

    /// Render the prompt, appending `output` when given.
    ///
    /// An empty `input` selects the no-input template; an empty `output`
    /// is treated as absent.
    pub fn build_prompt(&self, instruction: &str, input: Option<&str>, output: Option<&str>) -> String {
        let mut prompt = match input.filter(|s| !s.is_empty()) {
            Some(input) => format!(
                "{PREAMBLE_INPUT}\n\n### Instruction:\n{instruction}\n\n### Input:\n{input}\n\n{RESPONSE_SPLIT}\n"
            ),
            None => format!(
                "{PREAMBLE_NO_INPUT}\n\n### Instruction:\n{instruction}\n\n{RESPONSE_SPLIT}\n"
            ),
        };

        if let Some(output) = output.filter(|s| !s.is_empty()) {
            prompt.push_str(output);
        }
        prompt
    }

    /// Extract the response from generated text.
    ///
    /// Returns the trimmed segment between the first response marker and the
    /// next one (or the end of the text).
    pub fn get_response(&self, output: &str) -> Result<String> {
        extract_response(output)
    }
}

/// Trimmed text following the first [`RESPONSE_SPLIT`] marker.
pub fn extract_response(output: &str) -> Result<String> {
    output
        .split(RESPONSE_SPLIT)
        .nth(1)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| SftError::MalformedOutput {
            marker: RESPONSE_SPLIT.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_input_template() {
        let prompter = AlpacaPrompter::new();
        let prompt = prompter.build_prompt("Summarize.", Some(""), Some("Done."));

        assert!(prompt.contains("### Instruction:\nSummarize."));
        assert!(!prompt.contains("### Input:"));
        assert!(prompt.ends_with("### Response:\nDone."));
    }

    #[test]
    fn test_input_template() {
        let prompter = AlpacaPrompter::new();
        let prompt = prompter.build_prompt("Translate", Some("bonjour"), None);

        assert!(prompt.contains("paired with an input"));
        assert!(prompt.contains("### Input:\nbonjour\n\n"));
        assert!(prompt.ends_with("### Response:\n"));
    }

    #[test]
    fn test_absent_input_matches_empty_input() {
        let prompter = AlpacaPrompter::new();
        assert_eq!(
            prompter.build_prompt("Do it", None, None),
            prompter.build_prompt("Do it", Some(""), Some(""))
        );
    }

    #[test]
    fn test_braces_in_fields_are_literal() {
        let prompter = AlpacaPrompter::new();
        let prompt = prompter.build_prompt("Fill {input}", Some("x"), None);
        assert!(prompt.contains("### Instruction:\nFill {input}\n"));
        assert!(prompt.contains("### Input:\nx\n"));
    }

    #[test]
    fn test_extract_response_round_trip() {
        let prompter = AlpacaPrompter::gpteacher();
        let output = "  The answer is 4.\n";
        let prompt = prompter.build_prompt("Add 2 and 2", Some("2, 2"), Some(output));

        assert_eq!(prompter.get_response(&prompt).unwrap(), output.trim());
    }

    #[test]
    fn test_extract_response_missing_marker() {
        let err = extract_response("no marker here").unwrap_err();
        assert!(matches!(err, SftError::MalformedOutput { .. }));
    }

    #[test]
    fn test_target_fields() {
        assert_eq!(AlpacaPrompter::new().target_field().key(), "output");
        assert_eq!(AlpacaPrompter::gpteacher().target_field().key(), "response");
    }
}
