//! Error types for `restock-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid collection path: {0:?}")]
  InvalidCollection(String),

  #[error("invalid document id: {0:?}")]
  InvalidDocumentId(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
