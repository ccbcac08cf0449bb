//! Poll Errors

use thiserror::Error;

use super::record::RecordError;

/// Errors surfaced to callers of the poll engine and service
#[derive(Debug, Error)]
pub enum PollError {
    #[error("Poll question must not be empty")]
    EmptyQuestion,

    #[error("Poll question is {len} characters long, at most {max} allowed")]
    QuestionTooLong { len: usize, max: usize },

    #[error("Poll must have at least one option")]
    NoOptions,

    #[error("Poll has {count} options, at most {max} allowed")]
    TooManyOptions { count: usize, max: usize },

    #[error("Poll option {index} must not be empty")]
    EmptyOption { index: usize },

    #[error("Poll option {index} is {len} characters long, at most {max} allowed")]
    OptionTooLong { index: usize, len: usize, max: usize },

    #[error("Local poll identifiers are exhausted")]
    IdSpaceExhausted,

    #[error("Poll service has stopped")]
    ServiceStopped,

    #[error(transparent)]
    Record(#[from] RecordError),
}
