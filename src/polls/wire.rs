//! Wire Format
//!
//! Poll payloads exchanged with the remote peer. Outbound, a poll is sent as
//! an [`InputMediaPoll`]; inbound, the server reports a poll definition,
//! its results, or both, which the caller wraps in a [`PollSnapshot`].
//!
//! Answer tokens are opaque bytes and travel as base64 strings in JSON.

use serde::{Deserialize, Serialize};

use super::types::{PollId, PollOption};

/// One answer as the server knows it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollAnswer {
    pub text: String,
    /// Selector token for this answer
    #[serde(with = "token_base64")]
    pub option: Vec<u8>,
}

/// Poll definition reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPoll {
    /// Server-assigned identifier, 0 in outbound payloads
    pub id: i64,
    #[serde(default)]
    pub closed: bool,
    pub question: String,
    pub answers: Vec<PollAnswer>,
}

/// Respondent count for one answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollAnswerVoters {
    #[serde(with = "token_base64")]
    pub option: Vec<u8>,
    /// Whether the current user picked this answer
    #[serde(default)]
    pub chosen: bool,
    pub voters: i32,
}

/// Poll results reported by the server.
///
/// A `min` result set omits the current user's choices, so `chosen` flags
/// in it carry no information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPollResults {
    #[serde(default)]
    pub min: bool,
    #[serde(default)]
    pub results: Vec<PollAnswerVoters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_voters: Option<i32>,
}

/// Inbound poll data. Fields not present in a variant are left untouched
/// by the merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PollSnapshot {
    Definition(ServerPoll),
    Results(ServerPollResults),
    Full {
        poll: ServerPoll,
        results: ServerPollResults,
    },
}

impl PollSnapshot {
    /// The poll definition, when the snapshot carries one
    pub fn definition(&self) -> Option<&ServerPoll> {
        match self {
            Self::Definition(poll) | Self::Full { poll, .. } => Some(poll),
            Self::Results(_) => None,
        }
    }

    /// The result set, when the snapshot carries one
    pub fn results(&self) -> Option<&ServerPollResults> {
        match self {
            Self::Results(results) | Self::Full { results, .. } => Some(results),
            Self::Definition(_) => None,
        }
    }

    /// Server identifier named by the definition
    pub fn server_poll_id(&self) -> Option<PollId> {
        self.definition().map(|poll| PollId::new(poll.id))
    }
}

/// Outbound payload that asks the server to create a poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputMediaPoll {
    pub poll: ServerPoll,
}

/// Convert an option into the answer the server expects in votes and
/// creation requests
pub fn get_input_poll_option(option: &PollOption) -> PollAnswer {
    PollAnswer {
        text: option.text.clone(),
        option: option.data.clone(),
    }
}

/// Convert server answers into fresh, unanswered options
pub fn get_poll_options(answers: Vec<PollAnswer>) -> Vec<PollOption> {
    answers
        .into_iter()
        .map(|answer| PollOption::new(answer.text, answer.option))
        .collect()
}

mod token_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
