//! The matching core: per-symbol single-writer shards, the matching walk,
//! and conditional-order triggering.

mod matching;
pub mod shard;
pub mod triggers;

pub use shard::{
    ApplyOutcome, CancelReport, ShardCommand, ShardCore, ShardRouter, ShardSender, SubmitReport,
    SymbolShard,
};
pub use triggers::TriggerSet;
