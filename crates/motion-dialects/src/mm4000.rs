//! Newport MM4000/MM4005 motion-master family.
//!
//! ASCII command/response over RS-232 or GPIB, CR-terminated. Commands
//! are `{axis}{mnemonic}{value}` joined with `;` into one composite
//! message. Status and position queries are aggregate: `MS` answers
//! `1MSx,2MSy,...` with one packed status byte per axis, `TP` answers
//! `1TP5.012,2TP1.123,...`.
//!
//! Family quirks: no jog primitive (synthesized as set-velocity plus a
//! move to the travel limit), and "done" is reported at the end of the
//! jerk, before the mechanics settle — closed-loop axes are re-queried
//! after a short delay before done is trusted.

use std::collections::HashMap;
use std::time::Duration;

use motion_core::command::{CommandKind, MessageClass};
use motion_core::dialect::{
    AxisAddressing, BatchMode, CommandSlot, CommandTemplate, DialectTable, PollPlan, PollQuery,
    Probe, ProbeSet, QuirkSet, ReplyLayout, StatusBits,
};
use motion_core::transport::Framing;

/// Status byte bits of the `MS` reply.
const STATUS_BITS: StatusBits = StatusBits {
    moving: 0x01,
    power_off: 0x02,
    direction: 0x04,
    plus_limit: 0x08,
    minus_limit: 0x10,
    home: 0x20,
};

/// Dialect table for the MM4000/MM4005 family.
pub fn mm4000() -> DialectTable {
    use CommandKind::*;
    use MessageClass::*;

    let mut commands = HashMap::new();
    let mut t = |kind: CommandKind, slot: CommandSlot| {
        commands.insert(kind, slot);
    };

    t(MoveAbs, tmpl("{axis}PA{value}", Motion));
    t(MoveRel, tmpl("{axis}PR{value}", Motion));
    t(HomeForward, tmpl("{axis}OR", Motion));
    t(HomeReverse, tmpl("{axis}OR", Motion));
    // Redefine home at the target, then restore the home preset.
    t(
        LoadPosition,
        tmpl("{axis}SH{value};{axis}DH;{axis}SH{value2}", Immediate),
    );
    // No base-velocity concept.
    t(SetVelocityBase, CommandSlot::NoOp);
    t(SetVelocity, tmpl("{axis}VA{value}", Immediate));
    t(SetAccel, tmpl("{axis}AC{value}", Immediate));
    // Moves start immediately; GO does nothing.
    t(Go, CommandSlot::NoOp);
    t(SetEncoderRatio, CommandSlot::NoOp);
    t(Stop, tmpl("{axis}ST", MoveTerminate));
    t(Jog, tmpl("{axis}VA{value}", Velocity));
    t(JogVelocity, tmpl("{axis}VA{value}", Velocity));
    t(
        SetPGain,
        CommandSlot::Template(
            CommandTemplate::new("{axis}KP{value};{axis}UF", Immediate)
                .raw_value()
                .precision(6),
        ),
    );
    t(
        SetIGain,
        CommandSlot::Template(
            CommandTemplate::new("{axis}KI{value};{axis}UF", Immediate)
                .raw_value()
                .precision(6),
        ),
    );
    t(
        SetDGain,
        CommandSlot::Template(
            CommandTemplate::new("{axis}KD{value};{axis}UF", Immediate)
                .raw_value()
                .precision(6),
        ),
    );
    t(EnableTorque, tmpl("MO", Immediate));
    t(DisableTorque, tmpl("MF", Immediate));

    DialectTable {
        name: "mm4000",
        framing: Framing::Line(b'\r'),
        send_terminator: "\r",
        delimiter: ';',
        split_transmission: false,
        cmnd_response: false,
        buffer_limit: 300,
        addressing: AxisAddressing::Numeric { base: 1 },
        poll: PollPlan {
            per_controller: true,
            batch: BatchMode::Sequential,
            queries: vec![
                PollQuery {
                    template: "MS".to_string(),
                    layout: ReplyLayout::StatusByteList {
                        offset: 3,
                        stride: 5,
                        bits: STATUS_BITS,
                    },
                },
                PollQuery {
                    template: "TP".to_string(),
                    layout: ReplyLayout::PositionList {
                        separator: ',',
                        prefix: 3,
                    },
                },
            ],
        },
        settle_delay: Duration::from_millis(50),
        quirks: QuirkSet {
            jog_via_move_to_limit: true,
            ..QuirkSet::default()
        },
        commands,
        probes: ProbeSet {
            position: Probe::new("TP", 3),
            axis_count_from_position: true,
            ident: Some(Probe::new("VE", 2)),
            ident_substring: Some("MM"),
            stop_all: Some("ST".to_string()),
            loop_mode: Some(Probe::new("{axis}TC", 3)),
            resolution: Some(Probe::new("{axis}TU", 3)),
            home_preset: Some(Probe::new("{axis}XH", 3)),
            low_limit: Some(Probe::new("{axis}TL", 3)),
            high_limit: Some(Probe::new("{axis}TR", 3)),
        },
        default_resolution: 0.0001,
        default_decimals: 6,
    }
}

fn tmpl(template: &str, class: MessageClass) -> CommandSlot {
    CommandSlot::Template(CommandTemplate::new(template, class))
}
