//! Per-controller-model dialect tables.
//!
//! A [`DialectTable`] is pure data: command templates, reply layouts,
//! framing, probe queries and firmware quirks for one controller family.
//! The engine never branches on a model name — everything
//! model-specific lives in the table, so supporting a new family means
//! writing a table, not engine code.
//!
//! Command templates are `strfmt` strings over `{axis}`, `{value}` and
//! `{value2}`; numeric parameters are pre-formatted (scaled by the axis
//! drive resolution where the controller speaks engineering units)
//! before substitution.

use std::collections::HashMap;
use std::time::Duration;

use crate::command::{CommandKind, MessageClass};
use crate::transport::Framing;

/// How axes are addressed on the wire.
#[derive(Debug, Clone)]
pub enum AxisAddressing {
    /// Axes are numbers starting at `base` (`1PA...` style).
    Numeric { base: usize },
    /// Axes are named tokens (`X`, `Y`, ... style). The list length also
    /// caps the axis count for the family.
    Names(&'static [&'static str]),
}

impl AxisAddressing {
    /// Wire label for a zero-based axis index, if the family has one.
    pub fn label(&self, axis: usize) -> Option<String> {
        match self {
            AxisAddressing::Numeric { base } => Some((axis + base).to_string()),
            AxisAddressing::Names(names) => names.get(axis).map(|n| (*n).to_string()),
        }
    }

    /// Maximum axis count addressable by this family, if bounded by names.
    pub fn max_axes(&self) -> Option<usize> {
        match self {
            AxisAddressing::Numeric { .. } => None,
            AxisAddressing::Names(names) => Some(names.len()),
        }
    }
}

/// Numeric formatting for a template's `{value}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// Use the axis's probed decimal digits.
    AxisDecimals,
    /// Always this many decimal places.
    Fixed(usize),
}

/// One command's wire template.
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    /// strfmt template, e.g. `"{axis}PA{value}"`.
    pub template: String,
    pub class: MessageClass,
    /// Multiply the step parameter by the axis drive resolution before
    /// formatting (controllers that speak engineering units).
    pub scaled: bool,
    pub precision: Precision,
    /// Always render an explicit sign (`+12.5`), for firmware where the
    /// sign *is* the command.
    pub signed: bool,
}

impl CommandTemplate {
    pub fn new(template: &str, class: MessageClass) -> Self {
        Self {
            template: template.to_string(),
            class,
            scaled: true,
            precision: Precision::AxisDecimals,
            signed: false,
        }
    }

    pub fn raw_value(mut self) -> Self {
        self.scaled = false;
        self
    }

    pub fn precision(mut self, digits: usize) -> Self {
        self.precision = Precision::Fixed(digits);
        self
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }
}

/// Dialect-table entry for one command.
#[derive(Debug, Clone)]
pub enum CommandSlot {
    Template(CommandTemplate),
    /// The family has no such concept; the builder skips the part
    /// without error and without sending bytes.
    NoOp,
}

/// Bit masks into a packed per-axis status byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusBits {
    pub moving: u8,
    pub direction: u8,
    pub plus_limit: u8,
    pub minus_limit: u8,
    pub home: u8,
    /// Set when motor power (closed-loop hold) is OFF.
    pub power_off: u8,
}

/// What one poll reply contains and where.
#[derive(Debug, Clone)]
pub enum ReplyLayout {
    /// Aggregate reply with one packed status byte per axis at
    /// `offset + axis * stride` (`1MSx,2MSy,...`).
    StatusByteList {
        offset: usize,
        stride: usize,
        bits: StatusBits,
    },
    /// Aggregate reply with one position token per axis
    /// (`1TP5.012,2TP1.123,...`); the numeric text starts `prefix`
    /// characters into each token.
    PositionList { separator: char, prefix: usize },
    /// Single-axis reply carrying a status code character, a direction
    /// character and the position in one string (`XB+0.0012` style).
    /// `busy`/`fault`/`limit` are the code characters; any other code
    /// means idle. The position text starts at `position_at`.
    CodeCharsWithPosition {
        status_at: usize,
        direction_at: usize,
        busy: u8,
        fault: u8,
        limit: u8,
        position_at: usize,
    },
    /// Four-character axis flag reply (`PDLH` style): direction
    /// (`P`/`M`), done (`D`/`N`), overtravel (`L`/`N`) and home
    /// (`H`/`N`) at fixed positions. Overtravel reports the limit in
    /// the current direction of travel.
    CharFlags {
        direction_at: usize,
        done_at: usize,
        overtravel_at: usize,
        home_at: usize,
    },
    /// Single-axis reply whose integer field (after `prefix` chars) is
    /// nonzero while the axis moves.
    MovingFlag { prefix: usize },
    /// Single-axis reply whose float field (after `prefix` chars) is the
    /// position.
    Position { prefix: usize },
    /// Single-axis reply whose integer field (after `prefix` chars)
    /// packs the travel-limit switches.
    LimitWord {
        prefix: usize,
        plus_mask: u32,
        minus_mask: u32,
    },
    /// Firmware self-check register (after `prefix` chars). Nonzero
    /// asserts `problem`; when `fatal`, it disables the whole
    /// controller instance.
    FaultWord { prefix: usize, fatal: bool },
}

/// How status queries are issued on each poll sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Send one query per axis, read its reply, then the next axis.
    Sequential,
    /// Send every axis's queries first, then read the replies in issue
    /// order. Cuts round-trip latency on multi-axis controllers.
    Pipelined,
}

/// One status/position query and the layout of its reply.
#[derive(Debug, Clone)]
pub struct PollQuery {
    /// strfmt template over `{axis}` (ignored for controller-scoped
    /// plans, which query all axes at once).
    pub template: String,
    pub layout: ReplyLayout,
}

/// The dialect's complete poll recipe.
#[derive(Debug, Clone)]
pub struct PollPlan {
    /// Whether one query set covers the whole controller (aggregate
    /// replies indexed by axis) or each axis is queried on its own.
    pub per_controller: bool,
    pub batch: BatchMode,
    pub queries: Vec<PollQuery>,
}

/// A bring-up probe: query template plus the reply prefix to skip.
#[derive(Debug, Clone)]
pub struct Probe {
    pub query: String,
    pub prefix: usize,
}

impl Probe {
    pub fn new(query: &str, prefix: usize) -> Self {
        Self {
            query: query.to_string(),
            prefix,
        }
    }
}

/// Bring-up queries for controller and axis discovery.
#[derive(Debug, Clone)]
pub struct ProbeSet {
    /// Liveness/axis-discovery probe (usually the position query).
    pub position: Probe,
    /// Discover the axis count by counting fields in the position reply.
    pub axis_count_from_position: bool,
    /// Identity query (`VE` style) and a substring the reply must carry.
    pub ident: Option<Probe>,
    pub ident_substring: Option<&'static str>,
    /// Stop-all command issued once at bring-up.
    pub stop_all: Option<String>,
    /// Per-axis closed-loop probe; nonzero reply means encoder + gain
    /// support.
    pub loop_mode: Option<Probe>,
    /// Per-axis drive resolution probe (engineering units per step).
    pub resolution: Option<Probe>,
    /// Per-axis home preset position probe.
    pub home_preset: Option<Probe>,
    /// Per-axis travel limit probes.
    pub low_limit: Option<Probe>,
    pub high_limit: Option<Probe>,
}

/// Direction-dependent command selection for moving off an active
/// travel-limit switch (firmware that refuses ordinary moves while the
/// switch is made).
#[derive(Debug, Clone)]
pub struct LimitEscape {
    /// Used instead of the move command when escaping the plus limit.
    pub off_plus: String,
    /// Used instead of the move command when escaping the minus limit.
    pub off_minus: String,
}

/// Documented firmware workarounds, applied by the builder only when a
/// table sets them.
#[derive(Debug, Clone, Default)]
pub struct QuirkSet {
    /// Firmware ignores relative moves of exactly ±1 step; format them
    /// as ±1.5 instead.
    pub rel_move_unit_bump: bool,
    /// Commanded slew velocity at or below the base velocity is bumped
    /// to base + 1 (and reported as an adjustment).
    pub velocity_floor_base_plus_one: bool,
    /// Legal acceleration range; out-of-range values are clamped (and
    /// reported as an adjustment).
    pub accel_range: Option<(f64, f64)>,
    /// No jog primitive: synthesize as set-velocity + absolute move to
    /// the travel limit in the jog direction.
    pub jog_via_move_to_limit: bool,
    /// Firmware can only define the current position as zero; any other
    /// load-position value is rejected at build time.
    pub load_position_zero_only: bool,
    /// Direction-dependent move-off-limit command selection.
    pub limit_escape: Option<LimitEscape>,
}

/// Everything the engine needs to know about one controller family.
#[derive(Debug, Clone)]
pub struct DialectTable {
    pub name: &'static str,
    pub framing: Framing,
    /// Appended to every outgoing wire message.
    pub send_terminator: &'static str,
    /// Intra-transaction delimiter between command parts.
    pub delimiter: char,
    /// Send each delimited part as its own wire message (discarding
    /// intermediate replies) instead of one composite message.
    pub split_transmission: bool,
    /// The family echoes a reply to motion/velocity/stop commands; it
    /// must be read and discarded inside the same exchange.
    pub cmnd_response: bool,
    /// Hard ceiling on one assembled transaction.
    pub buffer_limit: usize,
    pub addressing: AxisAddressing,
    pub poll: PollPlan,
    /// Post-done settle delay before re-querying and trusting `done`.
    /// Zero disables the workaround.
    pub settle_delay: Duration,
    pub quirks: QuirkSet,
    pub commands: HashMap<CommandKind, CommandSlot>,
    pub probes: ProbeSet,
    /// Fallbacks when the family has no resolution probe.
    pub default_resolution: f64,
    pub default_decimals: usize,
}

impl DialectTable {
    /// Table entry for a command, if the dialect defines one.
    pub fn slot(&self, kind: CommandKind) -> Option<&CommandSlot> {
        self.commands.get(&kind)
    }

    /// Wire label for a zero-based axis index.
    pub fn axis_label(&self, axis: usize) -> Option<String> {
        self.addressing.label(axis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_addressing_is_base_offset() {
        let a = AxisAddressing::Numeric { base: 1 };
        assert_eq!(a.label(0).as_deref(), Some("1"));
        assert_eq!(a.label(3).as_deref(), Some("4"));
        assert_eq!(a.max_axes(), None);
    }

    #[test]
    fn named_addressing_bounds_axis_count() {
        let a = AxisAddressing::Names(&["X", "Y", "Z"]);
        assert_eq!(a.label(2).as_deref(), Some("Z"));
        assert_eq!(a.label(3), None);
        assert_eq!(a.max_axes(), Some(3));
    }

    #[test]
    fn template_builder_defaults() {
        let t = CommandTemplate::new("{axis}PA{value}", MessageClass::Motion);
        assert!(t.scaled);
        assert_eq!(t.precision, Precision::AxisDecimals);

        let t = CommandTemplate::new("{axis}KP{value}", MessageClass::Immediate)
            .raw_value()
            .precision(6);
        assert!(!t.scaled);
        assert_eq!(t.precision, Precision::Fixed(6));
    }
}
