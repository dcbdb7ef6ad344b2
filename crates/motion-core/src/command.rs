//! The canonical motion command vocabulary.
//!
//! Hosts queue [`MotionCommand`]s; the builder turns them into dialect
//! byte strings. The vocabulary is the superset understood by every
//! supported controller family — a dialect that has no use for a command
//! marks its table entry as a no-op and the builder skips it.

use serde::{Deserialize, Serialize};

/// Identifies a command independent of its parameters.
///
/// Used as the dialect-table key and in error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    MoveAbs,
    MoveRel,
    HomeForward,
    HomeReverse,
    LoadPosition,
    SetVelocityBase,
    SetVelocity,
    SetAccel,
    Go,
    SetEncoderRatio,
    ReadInfo,
    Stop,
    Jog,
    SetPGain,
    SetIGain,
    SetDGain,
    EnableTorque,
    DisableTorque,
    Primitive,
    JogVelocity,
}

/// Wire-message classification.
///
/// The order matters: a multi-part transaction is classified by the
/// greatest class among its parts, and the scheduler treats each class
/// differently (motion and velocity commands open an in-flight motion
/// node; info forces a status refresh; move-terminate cancels an
/// outstanding motion).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MessageClass {
    /// Execute immediately, no completion tracking.
    Immediate,
    /// Terminates a previously queued motion (stop).
    MoveTerminate,
    /// A move; completion is tracked until the controller reports done.
    Motion,
    /// Continuous motion updates until a move-terminate arrives.
    Velocity,
    /// Pure status refresh, nothing sent for the command itself.
    Info,
}

/// A queued command with its parameters.
///
/// Numeric parameters are in raw controller steps; the builder scales
/// them by the axis drive resolution where the dialect calls for
/// engineering units.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionCommand {
    /// Absolute move to the target step position.
    MoveAbs(f64),
    /// Relative move by the given step count.
    MoveRel(f64),
    HomeForward,
    HomeReverse,
    /// Redefine the current position as the given value.
    LoadPosition(f64),
    /// Minimum (base) velocity in steps/s.
    SetVelocityBase(f64),
    /// Slew velocity in steps/s.
    SetVelocity(f64),
    /// Acceleration in steps/s^2.
    SetAccel(f64),
    /// Start a previously programmed move.
    Go,
    /// Encoder pulses per motor pulse.
    SetEncoderRatio { motor: f64, encoder: f64 },
    /// Force a status/position refresh; no bytes of its own.
    ReadInfo,
    /// Stop axis motion.
    Stop,
    /// Momentary jog at signed velocity.
    Jog(f64),
    SetPGain(f64),
    SetIGain(f64),
    SetDGain(f64),
    EnableTorque,
    DisableTorque,
    /// Raw controller-native command string, passed through untouched.
    Primitive(String),
    /// Change jog velocity mid-jog.
    JogVelocity(f64),
}

impl MotionCommand {
    /// The dialect-table key for this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            MotionCommand::MoveAbs(_) => CommandKind::MoveAbs,
            MotionCommand::MoveRel(_) => CommandKind::MoveRel,
            MotionCommand::HomeForward => CommandKind::HomeForward,
            MotionCommand::HomeReverse => CommandKind::HomeReverse,
            MotionCommand::LoadPosition(_) => CommandKind::LoadPosition,
            MotionCommand::SetVelocityBase(_) => CommandKind::SetVelocityBase,
            MotionCommand::SetVelocity(_) => CommandKind::SetVelocity,
            MotionCommand::SetAccel(_) => CommandKind::SetAccel,
            MotionCommand::Go => CommandKind::Go,
            MotionCommand::SetEncoderRatio { .. } => CommandKind::SetEncoderRatio,
            MotionCommand::ReadInfo => CommandKind::ReadInfo,
            MotionCommand::Stop => CommandKind::Stop,
            MotionCommand::Jog(_) => CommandKind::Jog,
            MotionCommand::SetPGain(_) => CommandKind::SetPGain,
            MotionCommand::SetIGain(_) => CommandKind::SetIGain,
            MotionCommand::SetDGain(_) => CommandKind::SetDGain,
            MotionCommand::EnableTorque => CommandKind::EnableTorque,
            MotionCommand::DisableTorque => CommandKind::DisableTorque,
            MotionCommand::Primitive(_) => CommandKind::Primitive,
            MotionCommand::JogVelocity(_) => CommandKind::JogVelocity,
        }
    }
}

/// A deferred action attached to a motion, parsed once at request time.
///
/// Free-form post-move text such as `@PUT(target,value)@` is resolved
/// into a tagged variant here, so nothing re-parses strings on the poll
/// path.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Raw bytes for the controller, sent through the normal transaction
    /// path after the motion completes.
    Controller(String),
    /// A host-side notification: deliver `value` to `target` through the
    /// controller handle's event channel. Never touches the wire.
    Host { target: String, value: f64 },
}

impl Directive {
    /// Parse post-move text into a directive.
    ///
    /// `@PUT(name,value)@` becomes [`Directive::Host`]; anything else is
    /// controller-native text.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        if let Some(inner) = trimmed
            .strip_prefix("@PUT(")
            .and_then(|rest| rest.strip_suffix(")@"))
        {
            if let Some((target, value)) = inner.split_once(',') {
                if let Ok(value) = value.trim().parse::<f64>() {
                    return Directive::Host {
                        target: target.trim().to_string(),
                        value,
                    };
                }
            }
        }
        Directive::Controller(trimmed.to_string())
    }
}
