//! Error taxonomy of the runtime core.
//!
//! Every failure mode surfaces to the driver and aborts the current
//! iteration; nothing is recovered locally. Worker-side kernel failures
//! arrive as [`PisdfError::Lrt`] through the notification channel.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PisdfError {
    /// The balance equations of a graph admit no positive integer solution.
    #[error("repetition vector of graph [{graph}] is inconsistent: {detail}")]
    BrvInconsistent { graph: String, detail: String },

    /// A rate/parameter expression referenced a name absent from scope.
    #[error("parameter [{name}] not found while evaluating expression")]
    RateExprBadParam { name: String },

    /// A function or operator was applied with the wrong operand count.
    #[error("operator [{token}] applied with {got} operand(s), expected {expected}")]
    RateExprArity {
        token: String,
        expected: usize,
        got: usize,
    },

    /// Malformed expression text (unbalanced parenthesis, bad token).
    #[error("failed to parse expression [{expression}]: {detail}")]
    RateExprSyntax { expression: String, detail: String },

    /// A firing consumes from before time zero on an edge without setter.
    #[error("vertex [{vertex}] firing {firing} reads {missing} byte(s) before time zero on a delay without setter")]
    DelayUnderflow {
        vertex: String,
        firing: u32,
        missing: i64,
    },

    /// A persistent delay was declared with a setter or getter.
    #[error("persistent delay on edge [{edge}] cannot have a setter or getter")]
    DelayPersistentWithSetter { edge: String },

    /// No mappable processing element satisfies a task's constraints.
    #[error("no processing element can host task [{task}]")]
    UnmappableTask { task: String },

    /// Cross-cluster communication required but no memory bus exists.
    #[error("no memory bus between cluster {from} and cluster {to}")]
    NoRoute { from: u32, to: u32 },

    /// The iteration ended with unresolved dynamic parameters.
    #[error("iteration finished with {unresolved} unresolved dynamic parameter(s)")]
    DynamicTimeout { unresolved: usize },

    /// Producer and consumer byte totals disagree on an edge.
    #[error("fifo size mismatch on edge [{edge}]: produced {produced} byte(s), consumed {consumed}")]
    FifoSizeMismatch {
        edge: String,
        produced: i64,
        consumed: i64,
    },

    /// Structural error in the graph description (builder misuse).
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// A worker thread reported a failed kernel; fatal for the iteration.
    #[error("lrt {lrt} failed: {message}")]
    Lrt { lrt: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type that uses PisdfError
pub type Result<T> = std::result::Result<T, PisdfError>;
