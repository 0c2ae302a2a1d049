//! Core types and algorithms for the Restock reorder job.
//!
//! Everything needed to decide which subscription items are due lives here:
//! identity normalization, the last-purchased index, and the due resolver.
//! The crate has no database or HTTP dependencies; storage is reached through
//! the [`store::DocumentStore`] trait.

pub mod error;
pub mod history;
pub mod identity;
pub mod item;
pub mod memory;
pub mod resolve;
pub mod store;
pub mod timestamp;

pub use error::{Error, Result};
