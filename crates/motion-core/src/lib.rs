//! Core types for the motion controller engine.
//!
//! This crate holds everything the engine and the per-model dialect
//! tables share: the wire/transport abstractions, the canonical command
//! vocabulary and axis status model, the dialect-table data types, the
//! error taxonomy and controller configuration. It contains no engine
//! logic — the transaction builder, executor and polling scheduler live
//! in `motion-engine`.

pub mod command;
pub mod config;
pub mod dialect;
pub mod error;
pub mod serial;
pub mod status;
pub mod transport;

pub use command::{CommandKind, Directive, MessageClass, MotionCommand};
pub use config::ControllerConfig;
pub use dialect::DialectTable;
pub use error::{BuildError, MotionError, MotionResult, ParseError};
pub use status::{AxisReadback, AxisStatus};
pub use transport::{Framing, RecvOutcome, Transport};
