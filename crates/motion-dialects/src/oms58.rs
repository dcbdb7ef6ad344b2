//! OMS VME58-style programmable family.
//!
//! Axes are selected by a two-letter token (`AX`, `AY`, ...) and
//! commands are short mnemonics in a per-axis program: `AX MR200 GD`.
//! Parameters are integer steps. Status is polled per axis: `RA`
//! answers four flag characters (direction/done/overtravel/home) and
//! `RP` the raw step position; `#WS` reads the firmware watchdog
//! register — a nonzero report means the self-check failed and the
//! whole card is disabled, a harder failure than a communication
//! error.
//!
//! This family carries the richest set of firmware workarounds, all
//! expressed as data:
//! - relative moves of exactly ±1 step are silently ignored; sent as
//!   ±1.5 instead,
//! - a slew velocity at or below the base velocity is invalid; bumped
//!   to base + 1,
//! - acceleration outside 1..=1e9 is invalid; clamped,
//! - ordinary moves are refused while sitting on a limit switch;
//!   escaping uses the direction-logic commands (`MM`/`MP`) ahead of
//!   the move.

use std::collections::HashMap;
use std::time::Duration;

use motion_core::command::{CommandKind, MessageClass};
use motion_core::dialect::{
    AxisAddressing, BatchMode, CommandSlot, CommandTemplate, DialectTable, LimitEscape, PollPlan,
    PollQuery, Probe, ProbeSet, QuirkSet, ReplyLayout,
};
use motion_core::transport::Framing;

const AXIS_NAMES: &[&str] = &["AX", "AY", "AZ", "AT", "AU", "AV", "AR", "AS"];

/// Dialect table for the OMS VME58-style family.
pub fn oms58() -> DialectTable {
    use CommandKind::*;
    use MessageClass::*;

    let mut commands = HashMap::new();
    let mut t = |kind: CommandKind, slot: CommandSlot| {
        commands.insert(kind, slot);
    };

    t(MoveAbs, tmpl("{axis} MA{value}", Motion));
    t(MoveRel, tmpl("{axis} MR{value}", Motion));
    t(HomeForward, tmpl("{axis} CA HM", Motion));
    t(HomeReverse, tmpl("{axis} CA HR", Motion));
    t(LoadPosition, tmpl("{axis} LP{value}", Immediate));
    t(SetVelocityBase, tmpl("{axis} VB{value}", Immediate));
    t(SetVelocity, tmpl("{axis} VL{value}", Immediate));
    t(SetAccel, tmpl("{axis} AC{value}", Immediate));
    t(Go, tmpl("{axis} GD", Immediate));
    t(SetEncoderRatio, tmpl("{axis} ER{value},{value2}", Immediate));
    t(Stop, tmpl("{axis} ST", MoveTerminate));
    t(Jog, tmpl("{axis} CA JG{value}", Velocity));
    t(JogVelocity, tmpl("{axis} JG{value}", Velocity));
    t(
        SetPGain,
        CommandSlot::Template(
            CommandTemplate::new("{axis} KP{value}", Immediate)
                .raw_value()
                .precision(1),
        ),
    );
    t(
        SetIGain,
        CommandSlot::Template(
            CommandTemplate::new("{axis} KI{value}", Immediate)
                .raw_value()
                .precision(1),
        ),
    );
    t(
        SetDGain,
        CommandSlot::Template(
            CommandTemplate::new("{axis} KD{value}", Immediate)
                .raw_value()
                .precision(1),
        ),
    );
    t(EnableTorque, tmpl("{axis} HN", Immediate));
    t(DisableTorque, tmpl("{axis} HF", Immediate));

    DialectTable {
        name: "oms58",
        framing: Framing::Line(b'\r'),
        send_terminator: "\r",
        delimiter: ';',
        split_transmission: false,
        cmnd_response: false,
        buffer_limit: 300,
        addressing: AxisAddressing::Names(AXIS_NAMES),
        poll: PollPlan {
            per_controller: false,
            batch: BatchMode::Sequential,
            queries: vec![
                PollQuery {
                    template: "{axis} RA".to_string(),
                    layout: ReplyLayout::CharFlags {
                        direction_at: 0,
                        done_at: 1,
                        overtravel_at: 2,
                        home_at: 3,
                    },
                },
                PollQuery {
                    template: "{axis} RP".to_string(),
                    layout: ReplyLayout::Position { prefix: 0 },
                },
                PollQuery {
                    template: "#WS".to_string(),
                    layout: ReplyLayout::FaultWord {
                        prefix: 1,
                        fatal: true,
                    },
                },
            ],
        },
        settle_delay: Duration::ZERO,
        quirks: QuirkSet {
            rel_move_unit_bump: true,
            velocity_floor_base_plus_one: true,
            accel_range: Some((1.0, 1_000_000_000.0)),
            limit_escape: Some(LimitEscape {
                off_plus: "{axis} MM MR{value}".to_string(),
                off_minus: "{axis} MP MR{value}".to_string(),
            }),
            ..QuirkSet::default()
        },
        commands,
        probes: ProbeSet {
            position: Probe::new("{axis} RP", 0),
            axis_count_from_position: false,
            ident: Some(Probe::new("WY", 0)),
            ident_substring: Some("VME58"),
            stop_all: Some("AA ST".to_string()),
            loop_mode: None,
            resolution: None,
            home_preset: None,
            low_limit: None,
            high_limit: None,
        },
        default_resolution: 1.0,
        default_decimals: 0,
    }
}

fn tmpl(template: &str, class: MessageClass) -> CommandSlot {
    CommandSlot::Template(CommandTemplate::new(template, class))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_fault_is_fatal() {
        let d = oms58();
        let fatal = d.poll.queries.iter().any(|q| {
            matches!(q.layout, ReplyLayout::FaultWord { fatal: true, .. })
        });
        assert!(fatal);
    }

    #[test]
    fn firmware_workarounds_are_table_data() {
        let d = oms58();
        assert!(d.quirks.rel_move_unit_bump);
        assert!(d.quirks.velocity_floor_base_plus_one);
        assert_eq!(d.quirks.accel_range, Some((1.0, 1_000_000_000.0)));
        assert!(d.quirks.limit_escape.is_some());
    }

    #[test]
    fn integer_step_formatting() {
        let d = oms58();
        assert_eq!(d.default_decimals, 0);
        assert_eq!(d.default_resolution, 1.0);
        assert_eq!(d.axis_label(1).as_deref(), Some("AY"));
    }
}
