//! Newport PM500 precision stage family.
//!
//! Letter-named axes (`X`, `Y`, `Z`, ...), one command per message,
//! replies framed by the controller's `>` prompt character rather than
//! a line terminator. Every command is acknowledged, so the echo is
//! read and discarded inside the same exchange.
//!
//! Status and position arrive in a single per-axis reply: `XB+1.2345`
//! — a code character (`B` busy, `E` fault, `L` limit), then the
//! signed position. A limit report names the switch by the sign of the
//! position field.

use std::collections::HashMap;
use std::time::Duration;

use motion_core::command::{CommandKind, MessageClass};
use motion_core::dialect::{
    AxisAddressing, BatchMode, CommandSlot, CommandTemplate, DialectTable, PollPlan, PollQuery,
    Probe, ProbeSet, QuirkSet, ReplyLayout,
};
use motion_core::transport::Framing;

const AXIS_NAMES: &[&str] = &["X", "Y", "Z", "A", "B", "C"];

/// Dialect table for the PM500 family.
pub fn pm500() -> DialectTable {
    use CommandKind::*;
    use MessageClass::*;

    let mut commands = HashMap::new();
    let mut t = |kind: CommandKind, slot: CommandSlot| {
        commands.insert(kind, slot);
    };

    t(MoveAbs, tmpl("{axis}G{value}", Motion));
    t(MoveRel, tmpl("{axis}R{value}", Motion));
    t(HomeForward, tmpl("{axis}F0", Motion));
    t(HomeReverse, tmpl("{axis}F0", Motion));
    t(LoadPosition, tmpl("{axis}S{value}", Immediate));
    t(SetVelocityBase, CommandSlot::NoOp);
    t(SetVelocity, tmpl("{axis}V{value}", Immediate));
    t(SetAccel, tmpl("{axis}ACCEL{value}", Immediate));
    t(Go, CommandSlot::NoOp);
    t(SetEncoderRatio, CommandSlot::NoOp);
    t(Stop, tmpl("{axis}T", MoveTerminate));
    t(Jog, tmpl("{axis}V{value}", Velocity));
    t(JogVelocity, tmpl("{axis}V{value}", Velocity));
    t(SetPGain, CommandSlot::NoOp);
    t(SetIGain, CommandSlot::NoOp);
    t(SetDGain, CommandSlot::NoOp);
    t(EnableTorque, tmpl("{axis}M", Immediate));
    t(DisableTorque, tmpl("{axis}F", Immediate));

    DialectTable {
        name: "pm500",
        framing: Framing::Prompt(b'>'),
        send_terminator: "\r",
        delimiter: ';',
        // One command per wire message; the controller acknowledges
        // each before accepting the next.
        split_transmission: true,
        cmnd_response: true,
        buffer_limit: 100,
        addressing: AxisAddressing::Names(AXIS_NAMES),
        poll: PollPlan {
            per_controller: false,
            batch: BatchMode::Sequential,
            queries: vec![PollQuery {
                template: "{axis}R".to_string(),
                layout: ReplyLayout::CodeCharsWithPosition {
                    status_at: 1,
                    direction_at: 2,
                    busy: b'B',
                    fault: b'E',
                    limit: b'L',
                    position_at: 2,
                },
            }],
        },
        settle_delay: Duration::ZERO,
        quirks: QuirkSet::default(),
        commands,
        probes: ProbeSet {
            position: Probe::new("{axis}R", 2),
            axis_count_from_position: false,
            ident: Some(Probe::new("SVN?", 0)),
            ident_substring: None,
            stop_all: None,
            loop_mode: None,
            resolution: None,
            home_preset: None,
            low_limit: Some(Probe::new("{axis}NSLIM?", 1)),
            high_limit: Some(Probe::new("{axis}PSLIM?", 1)),
        },
        default_resolution: 0.00001,
        default_decimals: 7,
    }
}

fn tmpl(template: &str, class: MessageClass) -> CommandSlot {
    CommandSlot::Template(CommandTemplate::new(template, class))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_framed_with_command_echo() {
        let d = pm500();
        assert_eq!(d.framing, Framing::Prompt(b'>'));
        assert!(d.cmnd_response);
        assert!(d.split_transmission);
    }

    #[test]
    fn axes_are_letter_named_and_bounded() {
        let d = pm500();
        assert_eq!(d.axis_label(0).as_deref(), Some("X"));
        assert_eq!(d.axis_label(5).as_deref(), Some("C"));
        assert_eq!(d.axis_label(6), None);
        assert_eq!(d.addressing.max_axes(), Some(6));
    }

    #[test]
    fn single_query_carries_status_and_position() {
        let d = pm500();
        assert_eq!(d.poll.queries.len(), 1);
        assert!(matches!(
            d.poll.queries[0].layout,
            ReplyLayout::CodeCharsWithPosition { .. }
        ));
    }
}
