//! The append-only intake journal contract and its in-memory reference
//! implementation.

use super::error::JournalError;
use super::types::IntakeRecord;
use crate::types::Seq;

/// Producer contract for persisting a shard's intake log.
///
/// Implementations append records in sequence order and read them back for
/// replay. Storage choice (file, database, message log) is an adapter
/// concern; the core only requires these operations.
pub trait Journal: Send {
    /// Append one record. Sequence numbers must be dense and ascending.
    fn append(&mut self, record: IntakeRecord) -> Result<(), JournalError>;

    /// Number of records.
    fn len(&self) -> usize;

    /// Whether the journal holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The highest appended sequence number, if any.
    fn last_seq(&self) -> Option<Seq>;

    /// Read all records starting at `from` (inclusive).
    fn read_from(&self, from: Seq) -> Result<Vec<IntakeRecord>, JournalError>;
}

/// In-memory journal: a plain vector of records.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    records: Vec<IntakeRecord>,
}

impl MemoryJournal {
    /// Empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// All records, in order.
    #[must_use]
    pub fn records(&self) -> &[IntakeRecord] {
        &self.records
    }
}

impl Journal for MemoryJournal {
    fn append(&mut self, record: IntakeRecord) -> Result<(), JournalError> {
        let expected = Seq(self.records.last().map_or(1, |r| r.seq.0 + 1));
        if record.seq != expected {
            return Err(JournalError::NonMonotonicSequence {
                got: record.seq,
                expected,
            });
        }
        self.records.push(record);
        Ok(())
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn last_seq(&self) -> Option<Seq> {
        self.records.last().map(|r| r.seq)
    }

    fn read_from(&self, from: Seq) -> Result<Vec<IntakeRecord>, JournalError> {
        if self.records.is_empty() && from.0 > 1 {
            return Err(JournalError::SequenceNotFound { seq: from });
        }
        Ok(self
            .records
            .iter()
            .filter(|r| r.seq >= from)
            .cloned()
            .collect())
    }
}
