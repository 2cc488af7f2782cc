use thiserror::Error;

use crate::memory::DRAMAddr;

/// Errors that can occur while loading layouts, parsing fliptables or estimating exploits.
#[derive(Debug, Error)]
pub enum Error {
    /// A report line, address or layout description could not be parsed.
    #[error("Parse error in line {line}: {reason} (at '{token}')")]
    Parse {
        /// 1-based line number, 0 if the input was not line-oriented
        line: usize,
        /// The offending substring
        token: String,
        /// Why the token was rejected
        reason: String,
    },
    /// Two attacks with different target sequences were diffed or merged.
    #[error("Target mismatch: {} vs {}", format_targets(.left), format_targets(.right))]
    TargetMismatch {
        /// Targets of the left-hand attack
        left: Vec<DRAMAddr>,
        /// Targets of the right-hand attack
        right: Vec<DRAMAddr>,
    },
    /// The memory layout is inconsistent and cannot be used for translation.
    #[error("Invalid memory layout: {0}")]
    Config(String),
    /// Statistics were requested, but no attack succeeded.
    #[error("No successful attacks")]
    NoSuccessfulAttacks,
    /// A function received an argument outside its domain.
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),
    /// An estimator was constructed from a fliptable without attacks.
    #[error("Fliptable contains no attacks")]
    EmptyFliptable,
    #[allow(missing_docs)]
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[allow(missing_docs)]
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn parse(line: usize, token: &str, reason: impl Into<String>) -> Self {
        Error::Parse {
            line,
            token: token.to_string(),
            reason: reason.into(),
        }
    }

    /// Attach a line number to a parse error raised without line context.
    pub(crate) fn at_line(self, lineno: usize) -> Self {
        match self {
            Error::Parse {
                line: 0,
                token,
                reason,
            } => Error::Parse {
                line: lineno,
                token,
                reason,
            },
            e => e,
        }
    }
}

fn format_targets(targets: &[DRAMAddr]) -> String {
    targets
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(" / ")
}

/// Result type used throughout `hammertime-core`.
pub type Result<T> = std::result::Result<T, Error>;
