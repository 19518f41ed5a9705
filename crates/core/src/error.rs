//! Error types shared across the verdelta crates

use thiserror::Error;

/// Main error type for verdelta operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("format error: {0}")]
    Format(String),

    #[error("grids are not aligned: {0}")]
    Alignment(String),

    #[error("invalid comparison operator: {0:?}")]
    InvalidOperator(String),

    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    #[error("geometry does not intersect the grid extent")]
    EmptyIntersection,

    #[error("invalid grid dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("index out of bounds: ({row}, {col}) in grid of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("grid size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for verdelta operations
pub type Result<T> = std::result::Result<T, Error>;
