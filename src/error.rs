use std::io;

use thiserror::Error;

use crate::solver::SolverError;

/// Errors surfaced by the analysis.
///
/// Infeasibility is not an error: it is the `false` region or an empty
/// successor list.
#[derive(Debug, Error)]
pub enum Error {
    #[error("solver failure: {0}")]
    Solver(#[from] SolverError),

    #[error("unrecognized code in edge `{edge}`: {reason}")]
    UnrecognizedCode { edge: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration for option `{key}`: {reason}")]
    InvalidConfiguration { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn unrecognized(edge: impl ToString, reason: impl Into<String>) -> Self {
        Error::UnrecognizedCode {
            edge: edge.to_string(),
            reason: reason.into(),
        }
    }
}
