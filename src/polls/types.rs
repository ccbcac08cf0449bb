//! Poll Types
//!
//! Identifiers and the in-memory poll model owned by the engine.

use serde::{Deserialize, Serialize};

use super::error::PollError;
use crate::config::PollsConfig;

/// Poll identifier.
///
/// Negative values are local identifiers handed out by the client for polls
/// the server has not confirmed yet. Positive values are server-assigned.
/// Zero is neither and never names a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PollId(pub i64);

impl PollId {
    /// Wrap a raw identifier
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw identifier value
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Client-assigned, not yet known to the server
    pub const fn is_local(self) -> bool {
        self.0 < 0
    }

    /// Server-assigned and persistable
    pub const fn is_remote(self) -> bool {
        self.0 > 0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for PollId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "poll {}", self.0)
    }
}

/// Chat identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

/// Message identifier, unique within one chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

/// A message, identified across all chats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FullMessageId {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

impl FullMessageId {
    pub const fn new(chat_id: ChatId, message_id: MessageId) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

impl std::fmt::Display for FullMessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "message {} in chat {}", self.message_id.0, self.chat_id.0)
    }
}

/// One selectable answer of a poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOption {
    /// Text shown to the user
    pub text: String,
    /// Opaque token the server uses to record a vote for this option
    pub data: Vec<u8>,
    /// Number of respondents who picked this option
    pub voter_count: i32,
    /// Whether the current user picked this option
    pub is_chosen: bool,
}

impl PollOption {
    /// Create an option with no votes
    pub fn new(text: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            text: text.into(),
            data: data.into(),
            voter_count: 0,
            is_chosen: false,
        }
    }
}

/// A poll as held by the engine.
///
/// `total_voter_count` comes from the server and is not derived from the
/// option counts: one respondent may pick several options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Poll {
    pub question: String,
    /// Presentation order; the index also correlates wire answers
    pub options: Vec<PollOption>,
    pub total_voter_count: i32,
    /// Closing is one-way
    pub is_closed: bool,
}

impl Poll {
    /// Build a fresh, unanswered poll from a question and option texts.
    ///
    /// Each option's token is its decimal position, which is what the server
    /// echoes back in results for polls created by this client.
    pub fn from_draft(question: String, options: Vec<String>) -> Self {
        let options = options
            .into_iter()
            .enumerate()
            .map(|(pos, text)| PollOption::new(text, pos.to_string().into_bytes()))
            .collect();
        Self {
            question,
            options,
            total_voter_count: 0,
            is_closed: false,
        }
    }
}

/// Validate a poll draft against the configured limits.
///
/// Lengths are counted in characters, not bytes.
pub fn validate_draft(
    question: &str,
    options: &[String],
    limits: &PollsConfig,
) -> Result<(), PollError> {
    if question.trim().is_empty() {
        return Err(PollError::EmptyQuestion);
    }
    let question_len = question.chars().count();
    if question_len > limits.max_question_length {
        return Err(PollError::QuestionTooLong {
            len: question_len,
            max: limits.max_question_length,
        });
    }
    if options.is_empty() {
        return Err(PollError::NoOptions);
    }
    if options.len() > limits.max_options {
        return Err(PollError::TooManyOptions {
            count: options.len(),
            max: limits.max_options,
        });
    }
    for (index, option) in options.iter().enumerate() {
        if option.trim().is_empty() {
            return Err(PollError::EmptyOption { index });
        }
        let len = option.chars().count();
        if len > limits.max_option_length {
            return Err(PollError::OptionTooLong {
                index,
                len,
                max: limits.max_option_length,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_id_partition() {
        for raw in [-1_i64, -42, i64::MIN, 1, 42, i64::MAX, 0] {
            let id = PollId::new(raw);
            assert!(!(id.is_local() && id.is_remote()), "{raw} is in both ranges");
        }
        assert!(PollId::new(-5).is_local());
        assert!(PollId::new(5).is_remote());
        assert!(!PollId::new(0).is_valid());
        assert!(!PollId::new(0).is_local());
        assert!(!PollId::new(0).is_remote());
    }

    #[test]
    fn test_from_draft_assigns_positional_tokens() {
        let poll = Poll::from_draft(
            "Lunch?".to_string(),
            vec!["Pizza".to_string(), "Sushi".to_string(), "Tacos".to_string()],
        );
        let tokens: Vec<&[u8]> = poll.options.iter().map(|o| o.data.as_slice()).collect();
        assert_eq!(tokens, vec![&b"0"[..], &b"1"[..], &b"2"[..]]);
        assert_eq!(poll.total_voter_count, 0);
        assert!(!poll.is_closed);
    }

    #[test]
    fn test_validate_draft() {
        let limits = PollsConfig::default();
        let options = vec!["A".to_string(), "B".to_string()];

        assert!(validate_draft("Q?", &options, &limits).is_ok());
        assert!(matches!(
            validate_draft("  ", &options, &limits),
            Err(PollError::EmptyQuestion)
        ));
        assert!(matches!(
            validate_draft("Q?", &[], &limits),
            Err(PollError::NoOptions)
        ));
        assert!(matches!(
            validate_draft("Q?", &["A".to_string(), String::new()], &limits),
            Err(PollError::EmptyOption { index: 1 })
        ));

        let too_many: Vec<String> = (0..=limits.max_options).map(|i| i.to_string()).collect();
        assert!(matches!(
            validate_draft("Q?", &too_many, &limits),
            Err(PollError::TooManyOptions { .. })
        ));

        let long_question = "é".repeat(limits.max_question_length + 1);
        assert!(matches!(
            validate_draft(&long_question, &options, &limits),
            Err(PollError::QuestionTooLong { .. })
        ));
        let at_limit = "é".repeat(limits.max_question_length);
        assert!(validate_draft(&at_limit, &options, &limits).is_ok());
    }
}
