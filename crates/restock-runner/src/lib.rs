//! The Restock reorder job.
//!
//! For every eligible user, builds the last-purchased index from their
//! history, resolves which subscription items are due, and merges those items
//! into the user's cart through any [`DocumentStore`].
//!
//! [`DocumentStore`]: restock_core::store::DocumentStore

pub mod error;
pub mod orchestrator;
pub mod settings;
pub mod upsert;

pub use error::{Error, Result};
pub use orchestrator::{RunSummary, Runner, UserSummary};
pub use settings::{RunOptions, RunnerConfig};
pub use upsert::{PlannedWrite, UpsertWriter, WriteReport, WriteTarget};

#[cfg(test)]
mod tests;
