//! Error types shared by the engine crates.
//!
//! Library code reports failures through these `thiserror` enums; the
//! `anyhow` context chains are reserved for the constructor boundary
//! (opening ports, bring-up probes), where a human-readable chain of
//! causes matters more than a matchable variant.

use thiserror::Error;

use crate::command::CommandKind;

/// Convenience alias for engine results.
pub type MotionResult<T> = std::result::Result<T, MotionError>;

/// A transaction was rejected before any bytes were sent.
///
/// Build errors never leave a partially transmitted command on the wire;
/// the transaction simply does not happen.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    /// The assembled message exceeds the dialect's transaction buffer.
    #[error("transaction length {len} exceeds dialect buffer limit {limit}")]
    MessageTooLong { len: usize, limit: usize },

    /// The dialect table has no entry at all for this command.
    ///
    /// Distinct from a `NoOp` entry, which is a deliberate "this
    /// controller has no such concept" marking and builds successfully.
    #[error("dialect has no entry for command {0:?}")]
    UnknownCommand(CommandKind),

    /// A parameter was structurally unusable for the command.
    #[error("bad parameter for {command:?}: {reason}")]
    BadParameter {
        command: CommandKind,
        reason: String,
    },

    /// Template substitution failed (malformed dialect data).
    #[error("template for {command:?} failed to format: {reason}")]
    Template {
        command: CommandKind,
        reason: String,
    },
}

/// A reply arrived but could not be decoded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The reply is shorter than the layout requires. Reported rather
    /// than indexing past the end of the buffer.
    #[error("reply too short: need {need} bytes/fields, got {got}")]
    ShortReply { need: usize, got: usize },

    /// The aggregate reply has no field for the addressed axis.
    #[error("no field for axis {axis} in aggregate reply")]
    MissingAxisField { axis: usize },

    /// A numeric field failed to parse.
    #[error("bad numeric field {text:?}")]
    BadNumber { text: String },

    /// The poll plan finished without producing a mandatory field.
    #[error("poll replies produced no {field} for the axis")]
    MissingField { field: &'static str },
}

/// Top-level engine error.
#[derive(Error, Debug)]
pub enum MotionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transaction build rejected: {0}")]
    Build(#[from] BuildError),

    #[error("reply parse failed: {0}")]
    Parse(#[from] ParseError),

    /// The controller instance was disabled by a hardware self-fault and
    /// no longer accepts transactions.
    #[error("controller disabled by hardware self-fault")]
    Disabled,

    /// The controller's poll task is gone (shut down or panicked).
    #[error("controller task is not running")]
    NotRunning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_error_displays_limit() {
        let e = BuildError::MessageTooLong { len: 400, limit: 300 };
        assert!(e.to_string().contains("400"));
        assert!(e.to_string().contains("300"));
    }

    #[test]
    fn parse_error_is_comparable() {
        let a = ParseError::ShortReply { need: 8, got: 3 };
        let b = ParseError::ShortReply { need: 8, got: 3 };
        assert_eq!(a, b);
    }
}
