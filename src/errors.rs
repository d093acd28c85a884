// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::graph::CycleError;

#[derive(Error, Debug)]
pub enum TaskdagError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TaskdagError>;
