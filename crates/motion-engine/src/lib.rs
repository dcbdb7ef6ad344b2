//! Motion controller transaction & status engine.
//!
//! The repeated heart of every motor-controller driver, implemented
//! once and driven by per-model dialect tables:
//!
//! - [`builder`] — assemble dialect byte strings from motion commands
//! - [`executor`] — timed send/receive exchanges with flush discipline
//! - [`parser`] — decode idiosyncratic status replies into the
//!   canonical axis status
//! - [`health`] — the Normal/Retry/CommError reliability ladder
//! - [`axis`] — per-axis state and robust motion-completion detection
//! - [`controller`] / [`poller`] — controller bring-up, the consumer
//!   handle and the periodic poll task
//!
//! A controller is connected once, then spawned:
//!
//! ```rust,ignore
//! let (controller, handle, host_events) =
//!     Controller::connect(config, dialect, wire).await?;
//! tokio::spawn(controller.run());
//!
//! handle.submit(MotionRequest::new(0, MotionCommand::MoveAbs(2000.0)))?;
//! let readback = handle.axis(0);
//! ```

pub mod axis;
pub mod builder;
pub mod controller;
pub mod executor;
pub mod health;
pub mod parser;
mod poller;

pub use axis::{AxisState, MotionNode, PollVerdict};
pub use builder::{build_transaction, BuildContext, Transaction};
pub use controller::{Controller, ControllerHandle, HostEvent, MotionRequest};
pub use executor::{ExchangeOutcome, ProtocolParams};
pub use health::CommHealth;
pub use parser::ParsedStatus;
