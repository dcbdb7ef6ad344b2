//! Per-axis state and motion-completion detection.
//!
//! Everything here is mutated only by the owning controller's poll
//! cycle; the record layer sees the axis through the published
//! [`AxisReadback`] snapshot.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::time::Instant;

use motion_core::command::{Directive, MessageClass};
use motion_core::status::{AxisReadback, AxisStatus};

use crate::parser::ParsedStatus;

/// The in-flight command context for one axis.
///
/// At most one node exists per axis; a new motion request replaces a
/// finished one, never an outstanding one mid-build.
#[derive(Debug, Clone)]
pub struct MotionNode {
    pub class: MessageClass,
    /// Dispatched exactly once when the motion terminates cleanly.
    pub post_move: Option<Directive>,
}

/// What the completion detector concluded for one axis this cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PollVerdict {
    /// Motion continues (or nothing is outstanding).
    Pending,
    /// The controller first reported done; re-query after the settle
    /// delay before trusting it.
    NeedsSettleCheck,
    /// The no-motion ceiling tripped: issue a stop, node terminated.
    Stalled,
    /// Motion terminated; dispatch the post-move directive if present.
    Completed { post_move: Option<Directive> },
}

/// State for one axis of one controller instance.
#[derive(Debug)]
pub struct AxisState {
    pub(crate) status: AxisStatus,
    /// Step position; updated only together with `encoder_position` and
    /// a `no_motion_count` reset.
    pub(crate) position: i64,
    pub(crate) encoder_position: i64,
    pub(crate) velocity: i64,
    pub(crate) no_motion_count: u32,
    pub(crate) encoder_present: bool,
    pub(crate) gain_support: bool,
    /// Last commanded base velocity in steps/s, for the velocity-floor
    /// quirk.
    pub(crate) base_velocity: f64,
    /// Engineering units per step.
    pub(crate) resolution: f64,
    pub(crate) decimals: usize,
    pub(crate) home_preset: f64,
    pub(crate) low_limit: f64,
    pub(crate) high_limit: f64,
    pub(crate) node: Option<MotionNode>,
    /// When the last motion/velocity command went out; the stale-data
    /// delay is measured from here.
    pub(crate) last_command_at: Option<Instant>,
    /// The settle re-query already ran for the current done report.
    pub(crate) settle_checked: bool,
    snapshot: Arc<RwLock<AxisReadback>>,
}

impl AxisState {
    pub fn new(resolution: f64, decimals: usize) -> Self {
        Self {
            status: AxisStatus::default(),
            position: 0,
            encoder_position: 0,
            velocity: 0,
            no_motion_count: 0,
            encoder_present: false,
            gain_support: false,
            base_velocity: 0.0,
            resolution,
            decimals,
            home_preset: 0.0,
            low_limit: 0.0,
            high_limit: 0.0,
            node: None,
            last_command_at: None,
            settle_checked: false,
            snapshot: Arc::new(RwLock::new(AxisReadback::default())),
        }
    }

    /// Handle the record layer reads snapshots through.
    pub fn snapshot_handle(&self) -> Arc<RwLock<AxisReadback>> {
        Arc::clone(&self.snapshot)
    }

    pub fn in_motion(&self) -> bool {
        self.node.is_some()
    }

    /// Publish current state to the read-only snapshot.
    pub fn publish(&self) {
        *self.snapshot.write() = AxisReadback {
            position: self.position,
            encoder_position: self.encoder_position,
            velocity: self.velocity,
            status: self.status,
        };
    }

    /// Install the in-flight node for a just-sent motion/velocity
    /// command.
    pub fn start_motion(&mut self, node: MotionNode, now: Instant) {
        // A fresh move restarts stall accounting for true motions only;
        // velocity (jog) commands keep the running count.
        if node.class == MessageClass::Motion {
            self.no_motion_count = 0;
        }
        self.node = Some(node);
        self.last_command_at = Some(now);
        self.settle_checked = false;
        self.status.done = false;
        self.status.problem = false;
    }

    /// Merge one poll sweep's parsed reply into the axis.
    pub fn apply_parsed(&mut self, parsed: &ParsedStatus) {
        let moving = parsed.moving.unwrap_or(false);
        self.status.moving = moving;
        self.status.done = !moving;

        if let Some(dir) = parsed.direction_positive {
            self.status.direction_positive = dir;
        }
        self.status.plus_limit = parsed.plus_limit.unwrap_or(false);
        self.status.minus_limit = parsed.minus_limit.unwrap_or(false);
        self.status.home = parsed.home.unwrap_or(false);
        self.status.position_maintenance =
            parsed.power_off.map(|off| !off).unwrap_or(false);

        // Encoder condition bits are rebuilt every sweep.
        self.status.slip = false;
        self.status.slip_stall = false;
        self.status.encoder_home = false;

        self.status.problem = matches!(parsed.fault, Some(f) if f != 0);

        if let Some(raw) = parsed.raw_position {
            self.update_position(raw, parsed.direction_positive);
        }
    }

    /// Position update invariant: position, encoder position and the
    /// no-motion counter change together or not at all.
    fn update_position(&mut self, raw: f64, reported_direction: Option<bool>) {
        let steps = nint(raw / self.resolution);
        if steps == self.position {
            if self.node.is_some() {
                self.no_motion_count += 1;
            }
            return;
        }

        // Dialects that do not report direction get it from the delta.
        if reported_direction.is_none() {
            self.status.direction_positive = steps >= self.position;
        }
        self.position = steps;
        self.encoder_position = if self.encoder_present { raw as i64 } else { 0 };
        self.no_motion_count = 0;
    }

    /// Run the completion rules after a sweep's merge.
    pub fn evaluate(&mut self, no_motion_ceiling: u32, settle_available: bool) -> PollVerdict {
        if self.node.is_none() {
            return PollVerdict::Pending;
        }

        // Stall escape hatch: the move is outstanding but nothing has
        // moved for too many polls.
        if self.no_motion_count > no_motion_ceiling {
            self.no_motion_count = 0;
            self.status.problem = true;
            self.node = None;
            return PollVerdict::Stalled;
        }

        let limit_stop = self.status.limit_in_travel_direction();
        let terminated = self.status.done || limit_stop || self.status.problem;
        if !terminated {
            return PollVerdict::Pending;
        }

        // Some firmware reports "jerk complete" while the axis is still
        // settling; hold off once and look again.
        if (self.status.done || limit_stop)
            && settle_available
            && self.gain_support
            && !self.settle_checked
        {
            self.settle_checked = true;
            return PollVerdict::NeedsSettleCheck;
        }

        let node = self.node.take();
        let post_move = match node {
            // The post-move directive fires only on a clean end (done or
            // a limit in the travel direction), never on problem alone.
            Some(n) if self.status.done || limit_stop => n.post_move,
            _ => None,
        };
        PollVerdict::Completed { post_move }
    }

    /// Persistent communication failure: fail the axis and terminate
    /// any in-flight motion as done-with-error.
    pub fn fail_comm(&mut self) {
        self.status.mark_comm_failed();
        self.node = None;
        self.publish();
    }

    /// Good exchange: clear the communication-error indication.
    pub fn comm_recovered(&mut self) {
        self.status.clear_comm_failed();
    }
}

/// Nearest integer, half away from zero (the classic NINT).
fn nint(v: f64) -> i64 {
    if v > 0.0 {
        (v + 0.5) as i64
    } else {
        (v - 0.5) as i64
    }
}
