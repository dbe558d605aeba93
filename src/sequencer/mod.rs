//! Intake sequencing and journaling for deterministic replay.
//!
//! Every symbol shard is a single-writer that stamps each command with a
//! shard-local sequence number and appends it to an append-only journal
//! before applying it. Replaying the journal through a fresh shard core
//! reproduces the exact same books, positions, and events.
//!
//! The [`Journal`] trait is the producer contract for external
//! persistence; [`MemoryJournal`] is the in-memory reference
//! implementation the core uses by default.

mod error;
mod journal;
mod types;

pub use error::JournalError;
pub use journal::{Journal, MemoryJournal};
pub use types::{IntakeCommand, IntakeRecord, ModifyRequest};
