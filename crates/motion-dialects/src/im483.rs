//! IMS IM483 party-line stepper family.
//!
//! Several single-axis drives share one RS-485 line; each is addressed
//! by a name letter prepended to the command. One command per message,
//! CR-terminated. Status takes three numeric queries per axis — moving
//! flag (`^`), position (`Z 0`) and a limit-switch word (`] 0`) — so
//! the poll plan pipelines all queries down the party line before
//! reading any replies.
//!
//! Family limitations carried as data: the position register can only
//! be loaded with zero, relative moves are the bare signed distance,
//! and acceleration is an internal look-up table the host cannot set.

use std::collections::HashMap;
use std::time::Duration;

use motion_core::command::{CommandKind, MessageClass};
use motion_core::dialect::{
    AxisAddressing, BatchMode, CommandSlot, CommandTemplate, DialectTable, PollPlan, PollQuery,
    Probe, ProbeSet, QuirkSet, ReplyLayout,
};
use motion_core::transport::Framing;

const AXIS_NAMES: &[&str] = &["A", "B", "C", "D", "E", "F", "G", "H"];

/// Dialect table for the IM483 party-line family.
pub fn im483() -> DialectTable {
    use CommandKind::*;
    use MessageClass::*;

    let mut commands = HashMap::new();
    let mut t = |kind: CommandKind, slot: CommandSlot| {
        commands.insert(kind, slot);
    };

    t(MoveAbs, tmpl("{axis} R{value}", Motion));
    // A relative move is just the signed distance.
    t(
        MoveRel,
        CommandSlot::Template(CommandTemplate::new("{axis} {value}", Motion).signed()),
    );
    t(HomeForward, tmpl("{axis} F1000 0", Motion));
    t(HomeReverse, tmpl("{axis} F1000 1", Motion));
    t(LoadPosition, tmpl("{axis} O", Immediate));
    t(SetVelocityBase, tmpl("{axis} I{value}", Immediate));
    t(SetVelocity, tmpl("{axis} V{value}", Immediate));
    t(SetAccel, CommandSlot::NoOp);
    t(Go, CommandSlot::NoOp);
    t(SetEncoderRatio, CommandSlot::NoOp);
    t(Stop, tmpl("{axis} @ 0", MoveTerminate));
    t(
        Jog,
        CommandSlot::Template(CommandTemplate::new("{axis} M{value}", Velocity).signed()),
    );
    t(
        JogVelocity,
        CommandSlot::Template(CommandTemplate::new("{axis} M{value}", Velocity).signed()),
    );
    t(SetPGain, CommandSlot::NoOp);
    t(SetIGain, CommandSlot::NoOp);
    t(SetDGain, CommandSlot::NoOp);
    t(EnableTorque, tmpl("{axis} MO", Immediate));
    t(DisableTorque, tmpl("{axis} MF", Immediate));

    DialectTable {
        name: "im483",
        framing: Framing::Line(b'\r'),
        send_terminator: "\r",
        delimiter: ';',
        split_transmission: true,
        cmnd_response: false,
        buffer_limit: 120,
        addressing: AxisAddressing::Names(AXIS_NAMES),
        poll: PollPlan {
            per_controller: false,
            batch: BatchMode::Pipelined,
            queries: vec![
                PollQuery {
                    template: "{axis} ^".to_string(),
                    layout: ReplyLayout::MovingFlag { prefix: 4 },
                },
                PollQuery {
                    template: "{axis} Z 0".to_string(),
                    layout: ReplyLayout::Position { prefix: 5 },
                },
                PollQuery {
                    template: "{axis} ] 0".to_string(),
                    layout: ReplyLayout::LimitWord {
                        prefix: 5,
                        plus_mask: 1,
                        minus_mask: 2,
                    },
                },
            ],
        },
        settle_delay: Duration::ZERO,
        quirks: QuirkSet {
            load_position_zero_only: true,
            ..QuirkSet::default()
        },
        commands,
        probes: ProbeSet {
            position: Probe::new("{axis} Z 0", 5),
            axis_count_from_position: false,
            ident: None,
            ident_substring: None,
            stop_all: None,
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
