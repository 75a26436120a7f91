//! Multi-turn conversation model.
//!
//! A [`Conversation`] is created fresh from a [`ConversationTemplate`] for
//! every example, filled with alternating user/assistant turns and rendered
//! into a single transcript. Rendering also records where each assistant
//! reply sits in the transcript so labels can be aligned with it later.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sftkit_core::{InvalidExample, Result};
use std::ops::Range;

/// How consecutive turns are delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeparatorStyle {
    /// Every turn ends with `sep`.
    Single,
    /// User turns end with `sep`, assistant turns with `sep2`.
    #[default]
    Two,
}

/// Named conversation layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTemplate {
    /// Template name.
    pub name: String,
    /// System preamble placed before the first turn.
    pub system: String,
    /// Role labels, user first.
    pub roles: [String; 2],
    /// Separator style.
    #[serde(default)]
    pub sep_style: SeparatorStyle,
    /// Primary separator.
    pub sep: String,
    /// Secondary separator, used by [`SeparatorStyle::Two`].
    #[serde(default)]
    pub sep2: Option<String>,
}

impl Default for ConversationTemplate {
    fn default() -> Self {
        Self::vicuna_v1_1()
    }
}

impl ConversationTemplate {
    /// Vicuna v1.1: `USER: ... ASSISTANT: ...</s>`.
    pub fn vicuna_v1_1() -> Self {
        Self {
            name: "vicuna_v1.1".to_string(),
            system: "A chat between a curious user and an artificial intelligence assistant. \
                     The assistant gives helpful, detailed, and polite answers to the user's questions."
                .to_string(),
            roles: ["USER".to_string(), "ASSISTANT".to_string()],
            sep_style: SeparatorStyle::Two,
            sep: " ".to_string(),
            sep2: Some("</s>".to_string()),
        }
    }

    /// Look up a template by name.
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "vicuna_v1.1" | "vicuna_v1_1" | "vicuna" => Some(Self::vicuna_v1_1()),
            _ => None,
        }
    }

    /// Separators for even and odd turn positions.
    pub fn separators(&self) -> [&str; 2] {
        match self.sep_style {
            SeparatorStyle::Single => [self.sep.as_str(), self.sep.as_str()],
            SeparatorStyle::Two => [
                self.sep.as_str(),
                self.sep2.as_deref().unwrap_or(self.sep.as_str()),
            ],
        }
    }

    /// Label of a role.
    pub fn role_label(&self, role: Role) -> &str {
        &self.roles[role.index()]
    }

    /// Text that opens an assistant reply inside a round: `sep + role + ": "`.
    pub fn assistant_header(&self) -> String {
        format!("{}{}: ", self.sep, self.roles[1])
    }
}

/// Speaker of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The human side; always speaks first.
    User,
    /// The model side.
    Assistant,
}

impl Role {
    /// Position of the role in the template's role pair.
    pub fn index(self) -> usize {
        match self {
            Self::User => 0,
            Self::Assistant => 1,
        }
    }

    /// Role expected at a given turn position.
    pub fn for_turn(position: usize) -> Self {
        if position % 2 == 0 {
            Self::User
        } else {
            Self::Assistant
        }
    }
}

/// A rendered transcript and the byte ranges the model is trained on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderedConversation {
    /// Full transcript.
    pub text: String,
    /// One range per non-empty assistant turn, covering the reply and its
    /// trailing separator.
    pub target_spans: Vec<Range<usize>>,
}

impl RenderedConversation {
    /// Text of each target span.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.target_spans.iter().map(|span| &self.text[span.clone()])
    }

    /// Whether a non-empty byte range overlaps any target span.
    pub fn overlaps_target(&self, range: Range<usize>) -> bool {
        range.start < range.end
            && self
                .target_spans
                .iter()
                .any(|span| range.start < span.end && range.end > span.start)
    }
}

/// Conversation history built from a template.
#[derive(Debug, Clone)]
pub struct Conversation {
    template: ConversationTemplate,
    messages: Vec<(Role, String)>,
}

impl Conversation {
    /// Start an empty conversation from a copy of `template`.
    pub fn from_template(template: &ConversationTemplate) -> Self {
        Self {
            template: template.clone(),
            messages: Vec::new(),
        }
    }

    /// Append a turn.
    pub fn append_message(&mut self, role: Role, message: impl Into<String>) {
        self.messages.push((role, message.into()));
    }

    /// Turns appended so far.
    pub fn messages(&self) -> &[(Role, String)] {
        &self.messages
    }

    /// The template this conversation was built from.
    pub fn template(&self) -> &ConversationTemplate {
        &self.template
    }

    /// Render the transcript.
    ///
    /// `system + sep`, then `"{role}: {message}{separator}"` per turn with
    /// separators alternating by position. A turn with an empty message
    /// renders as `"{role}:"` with no separator.
    pub fn render(&self) -> RenderedConversation {
        let seps = self.template.separators();
        let mut text = String::new();
        let mut target_spans = Vec::new();

        text.push_str(&self.template.system);
        text.push_str(seps[0]);

        for (i, (role, message)) in self.messages.iter().enumerate() {
            text.push_str(self.template.role_label(*role));
            if message.is_empty() {
                text.push(':');
                continue;
            }

            text.push_str(": ");
            let start = text.len();
            text.push_str(message);
            text.push_str(seps[i % 2]);

            if *role == Role::Assistant {
                target_spans.push(start..text.len());
            }
        }

        RenderedConversation { text, target_spans }
    }

    /// Rendered transcript text.
    pub fn get_prompt(&self) -> String {
        self.render().text
    }
}

/// One ShareGPT turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Speaker tag, `human` or `gpt`.
    pub from: String,
    /// Message text.
    pub value: String,
}

impl Turn {
    /// Create a turn.
    pub fn new(from: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            value: value.into(),
        }
    }
}

/// Parse the `conversations` array of a raw example.
pub fn parse_turns(value: &Value) -> std::result::Result<Vec<Turn>, InvalidExample> {
    let items = value.as_array().ok_or_else(|| InvalidExample::InvalidField {
        key: "conversations".to_string(),
        reason: "expected an array of turns".to_string(),
    })?;

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let field = |key: &str| {
                item.get(key)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| InvalidExample::InvalidField {
                        key: format!("conversations[{}].{}", index, key),
                        reason: "expected a string".to_string(),
                    })
            };
            Ok(Turn {
                from: field("from")?,
                value: field("value")?,
            })
        })
        .collect()
}

/// Builds conversations from ShareGPT turns.
#[derive(Debug, Clone, Default)]
pub struct ShareGptPrompter {
    template: ConversationTemplate,
}

impl ShareGptPrompter {
    /// Create a prompter using `template`.
    pub fn new(template: ConversationTemplate) -> Self {
        Self { template }
    }

    /// The conversation template.
    pub fn template(&self) -> &ConversationTemplate {
        &self.template
    }

    fn role_for(&self, from: &str) -> Option<Role> {
        match from {
            "human" => Some(Role::User),
            "gpt" => Some(Role::Assistant),
            _ => None,
        }
    }

    /// Validate turns and fill a fresh conversation.
    ///
    /// A leading turn that is not from the user (system or bot openers) is
    /// dropped silently. Afterwards every speaker must be known and roles
    /// must alternate starting with the user. Reported indices refer to the
    /// original turn list.
    pub fn build_conversation(&self, turns: &[Turn]) -> Result<Conversation> {
        if turns.len() < 2 {
            return Err(InvalidExample::TooFewTurns { count: turns.len() }.into());
        }

        let (skipped, turns) = if self.role_for(&turns[0].from) == Some(Role::User) {
            (0, turns)
        } else {
            tracing::debug!(from = %turns[0].from, "Dropping leading non-user turn");
            (1, &turns[1..])
        };

        let mut conversation = Conversation::from_template(&self.template);
        for (position, turn) in turns.iter().enumerate() {
            let index = position + skipped;
            let role = self
                .role_for(&turn.from)
                .ok_or_else(|| InvalidExample::UnknownRole {
                    index,
                    from: turn.from.clone(),
                })?;

            let expected = Role::for_turn(position);
            if role != expected {
                return Err(InvalidExample::RoleMismatch {
                    index,
                    expected: self.template.role_label(expected).to_string(),
                    found: self.template.role_label(role).to_string(),
                }
                .into());
            }

            conversation.append_message(role, turn.value.as_str());
        }

        Ok(conversation)
    }

    /// Validate and render turns into a transcript with target spans.
    pub fn build_prompt(&self, turns: &[Turn]) -> Result<RenderedConversation> {
        Ok(self.build_conversation(turns)?.render())
    }
}
