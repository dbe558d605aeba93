//! Error type for journal operations.

use std::fmt;

use crate::types::Seq;

/// Failures of an append-only intake journal.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum JournalError {
    /// The entry could not be serialized.
    Serialization {
        /// Underlying error message.
        message: String,
    },

    /// The entry could not be deserialized on read-back.
    Deserialization {
        /// Sequence number of the bad entry.
        seq: Seq,
        /// Underlying error message.
        message: String,
    },

    /// Appends must carry dense, ascending sequence numbers.
    NonMonotonicSequence {
        /// The sequence number that was appended.
        got: Seq,
        /// The sequence number that was expected.
        expected: Seq,
    },

    /// The requested sequence number is not in the journal.
    SequenceNotFound {
        /// The missing sequence number.
        seq: Seq,
    },
}

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalError::Serialization { message } => {
                write!(f, "journal serialization failed: {message}")
            }
            JournalError::Deserialization { seq, message } => {
                write!(f, "journal entry {seq} failed to deserialize: {message}")
            }
            JournalError::NonMonotonicSequence { got, expected } => {
                write!(f, "non-monotonic journal append: got {got}, expected {expected}")
            }
            JournalError::SequenceNotFound { seq } => {
                write!(f, "journal sequence {seq} not found")
            }
        }
    }
}

impl std::error::Error for JournalError {}
