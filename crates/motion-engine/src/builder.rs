//! Transaction assembly.
//!
//! Turns queued [`MotionCommand`]s into one dialect byte string:
//! template lookup, parameter formatting, pre-move primitive injection,
//! quirk application and the transaction-length guard. Anything that
//! can go wrong here goes wrong *before* bytes touch the wire.

use std::collections::HashMap;

use strfmt::strfmt;
use tracing::warn;

use motion_core::command::{CommandKind, Directive, MessageClass, MotionCommand};
use motion_core::dialect::{CommandSlot, CommandTemplate, DialectTable, Precision};
use motion_core::error::BuildError;

/// An assembled transaction, ready for the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub class: MessageClass,
    /// Delimiter-joined command parts, without the wire terminator.
    /// Empty when every part was a dialect no-op.
    pub message: String,
    /// Deferred directive dispatched once by the completion detector.
    pub post_move: Option<Directive>,
    /// A parameter was clamped to a legal value; recoverable, not an
    /// error.
    pub adjusted: bool,
}

impl Transaction {
    /// True when nothing will be sent (all parts were no-ops).
    pub fn is_noop(&self) -> bool {
        self.message.is_empty()
    }
}

/// Per-axis facts the builder needs: formatting parameters and the
/// current limit/velocity state for quirk decisions.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Wire label for the addressed axis.
    pub axis_label: String,
    /// Engineering units per step; applied to scaled templates.
    pub resolution: f64,
    /// Decimal digits for `Precision::AxisDecimals` templates.
    pub decimals: usize,
    /// Base (minimum) velocity in steps/s, for the velocity-floor quirk.
    pub base_velocity: f64,
    pub plus_limit_active: bool,
    pub minus_limit_active: bool,
    /// Travel limits in controller units, for synthesized jogs.
    pub high_limit: f64,
    pub low_limit: f64,
    /// Home preset in controller units, available to load-position
    /// templates as `{value2}`.
    pub home_preset: f64,
}

/// Assemble one transaction for an axis.
///
/// `pre` is a controller-native primitive injected ahead of the first
/// command part; `post` rides on the transaction and is dispatched by
/// the completion detector after the move ends.
pub fn build_transaction(
    dialect: &DialectTable,
    ctx: &BuildContext,
    commands: &[MotionCommand],
    pre: Option<&str>,
    post: Option<Directive>,
) -> Result<Transaction, BuildError> {
    let mut parts: Vec<String> = Vec::new();
    let mut class = MessageClass::Immediate;
    let mut adjusted = false;

    if let Some(pre) = pre {
        if !pre.is_empty() {
            parts.push(pre.to_string());
        }
    }

    for command in commands {
        let kind = command.kind();

        // Info never sends bytes of its own; it classifies the
        // transaction so the scheduler forces a status refresh.
        if kind == CommandKind::ReadInfo {
            class = class.max(MessageClass::Info);
            continue;
        }

        // Raw primitives bypass the table entirely.
        if let MotionCommand::Primitive(text) = command {
            if !text.is_empty() {
                parts.push(text.clone());
            }
            continue;
        }

        let slot = dialect
            .slot(kind)
            .ok_or(BuildError::UnknownCommand(kind))?;
        let template = match slot {
            CommandSlot::NoOp => continue,
            CommandSlot::Template(t) => t,
        };
        class = class.max(template.class);

        if matches!(command, MotionCommand::Jog(_)) && dialect.quirks.jog_via_move_to_limit {
            build_synthesized_jog(dialect, ctx, command, &mut parts, &mut class)?;
            continue;
        }

        let part = expand(dialect, ctx, command, template, &mut adjusted)?;
        if !part.is_empty() {
            parts.push(part);
        }
    }

    let message = parts.join(&dialect.delimiter.to_string());
    if message.len() > dialect.buffer_limit {
        return Err(BuildError::MessageTooLong {
            len: message.len(),
            limit: dialect.buffer_limit,
        });
    }

    Ok(Transaction {
        class,
        message,
        post_move: post,
        adjusted,
    })
}

/// Format one command part from its template.
fn expand(
    dialect: &DialectTable,
    ctx: &BuildContext,
    command: &MotionCommand,
    template: &CommandTemplate,
    adjusted: &mut bool,
) -> Result<String, BuildError> {
    let kind = command.kind();
    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert("axis".to_string(), ctx.axis_label.clone());

    match command {
        MotionCommand::LoadPosition(v) => {
            if dialect.quirks.load_position_zero_only && *v != 0.0 {
                return Err(BuildError::BadParameter {
                    command: kind,
                    reason: "firmware can only load position zero".to_string(),
                });
            }
            vars.insert("value".to_string(), format_value(ctx, template, *v));
            // Families that redefine home around the load need the
            // probed preset back afterwards.
            let digits = precision_digits(ctx, template);
            vars.insert("value2".to_string(), format!("{:.digits$}", ctx.home_preset));
        }

        MotionCommand::MoveAbs(v)
        | MotionCommand::SetVelocityBase(v)
        | MotionCommand::JogVelocity(v)
        | MotionCommand::SetPGain(v)
        | MotionCommand::SetIGain(v)
        | MotionCommand::SetDGain(v)
        | MotionCommand::Jog(v) => {
            vars.insert("value".to_string(), format_value(ctx, template, *v));
        }

        MotionCommand::MoveRel(v) => {
            let rounded = v.round();
            if dialect.quirks.rel_move_unit_bump && (rounded == 1.0 || rounded == -1.0) {
                // Firmware ignores MR±1; ±1.5 still moves one step.
                let text = if rounded > 0.0 { "1.5" } else { "-1.5" };
                vars.insert("value".to_string(), text.to_string());
            } else {
                vars.insert("value".to_string(), format_value(ctx, template, *v));
            }
            if let Some(escape) = escape_template(dialect, ctx, *v) {
                return fill(escape, &vars, kind);
            }
        }

        MotionCommand::SetVelocity(v) => {
            let mut v = *v;
            if dialect.quirks.velocity_floor_base_plus_one && v <= ctx.base_velocity {
                warn!(
                    commanded = v,
                    base = ctx.base_velocity,
                    "overriding invalid velocity; slew <= base"
                );
                v = ctx.base_velocity + 1.0;
                *adjusted = true;
            }
            vars.insert("value".to_string(), format_value(ctx, template, v));
        }

        MotionCommand::SetAccel(v) => {
            let mut v = *v;
            if let Some((lo, hi)) = dialect.quirks.accel_range {
                if v < lo || v > hi {
                    warn!(commanded = v, lo, hi, "overriding invalid acceleration");
                    v = v.clamp(lo, hi);
                    *adjusted = true;
                }
            }
            vars.insert("value".to_string(), format_value(ctx, template, v));
        }

        MotionCommand::SetEncoderRatio { motor, encoder } => {
            vars.insert("value".to_string(), format_value(ctx, template, *motor));
            vars.insert("value2".to_string(), format_value(ctx, template, *encoder));
        }

        MotionCommand::HomeForward
        | MotionCommand::HomeReverse
        | MotionCommand::Go
        | MotionCommand::Stop
        | MotionCommand::EnableTorque
        | MotionCommand::DisableTorque => {}

        MotionCommand::ReadInfo | MotionCommand::Primitive(_) => {
            // Handled before template lookup.
        }
    }

    fill(&template.template, &vars, kind)
}

fn fill(
    template: &str,
    vars: &HashMap<String, String>,
    kind: CommandKind,
) -> Result<String, BuildError> {
    strfmt(template, vars).map_err(|e| BuildError::Template {
        command: kind,
        reason: e.to_string(),
    })
}

/// Direction-dependent move-off-limit command selection: an ordinary
/// move away from an active limit switch is replaced by the dialect's
/// escape command for that switch.
fn escape_template<'a>(
    dialect: &'a DialectTable,
    ctx: &BuildContext,
    step_delta: f64,
) -> Option<&'a str> {
    let escape = dialect.quirks.limit_escape.as_ref()?;
    if ctx.plus_limit_active && step_delta < 0.0 {
        Some(&escape.off_plus)
    } else if ctx.minus_limit_active && step_delta > 0.0 {
        Some(&escape.off_minus)
    } else {
        None
    }
}

/// Jog for families without a jog primitive: set the slew velocity,
/// then move absolute to the travel limit in the jog direction.
fn build_synthesized_jog(
    dialect: &DialectTable,
    ctx: &BuildContext,
    command: &MotionCommand,
    parts: &mut Vec<String>,
    class: &mut MessageClass,
) -> Result<(), BuildError> {
    let MotionCommand::Jog(velocity) = command else {
        return Ok(());
    };

    let vel_template = match dialect.slot(CommandKind::SetVelocity) {
        Some(CommandSlot::Template(t)) => t,
        _ => return Err(BuildError::UnknownCommand(CommandKind::SetVelocity)),
    };
    let move_template = match dialect.slot(CommandKind::MoveAbs) {
        Some(CommandSlot::Template(t)) => t,
        _ => return Err(BuildError::UnknownCommand(CommandKind::MoveAbs)),
    };
    *class = (*class).max(MessageClass::Velocity);

    let mut vars = HashMap::new();
    vars.insert("axis".to_string(), ctx.axis_label.clone());
    vars.insert(
        "value".to_string(),
        format_value(ctx, vel_template, velocity.abs()),
    );
    parts.push(fill(&vel_template.template, &vars, CommandKind::Jog)?);

    // The travel limits are already in controller units; bypass the
    // step scaling the move template would normally apply.
    let target = if *velocity > 0.0 {
        ctx.high_limit
    } else {
        ctx.low_limit
    };
    let digits = precision_digits(ctx, move_template);
    vars.insert("value".to_string(), format!("{target:.digits$}"));
    parts.push(fill(&move_template.template, &vars, CommandKind::Jog)?);
    Ok(())
}

fn precision_digits(ctx: &BuildContext, template: &CommandTemplate) -> usize {
    match template.precision {
        Precision::AxisDecimals => ctx.decimals,
        Precision::Fixed(d) => d,
    }
}

/// Scale a step parameter into controller units (where the template
/// asks for it) and render with the template's precision.
fn format_value(ctx: &BuildContext, template: &CommandTemplate, steps: f64) -> String {
    let value = if template.scaled {
        steps * ctx.resolution
    } else {
        steps
    };
    let digits = precision_digits(ctx, template);
    if template.signed {
        format!("{value:+.digits$}")
    } else {
        format!("{value:.digits$}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_core::dialect::{
        AxisAddressing, BatchMode, LimitEscape, PollPlan, Probe, ProbeSet, QuirkSet,
    };
    use motion_core::transport::Framing;

    fn test_dialect(quirks: QuirkSet) -> DialectTable {
        let mut commands = HashMap::new();
        commands.insert(
            CommandKind::MoveAbs,
            CommandSlot::Template(CommandTemplate::new("{axis}PA{value}", MessageClass::Motion)),
        );
        commands.insert(
            CommandKind::MoveRel,
            CommandSlot::Template(CommandTemplate::new("{axis}PR{value}", MessageClass::Motion)),
        );
        commands.insert(
            CommandKind::SetVelocity,
            CommandSlot::Template(CommandTemplate::new(
                "{axis}VA{value}",
                MessageClass::Immediate,
            )),
        );
        commands.insert(
            CommandKind::SetAccel,
            CommandSlot::Template(CommandTemplate::new(
                "{axis}AC{value}",
                MessageClass::Immediate,
            )),
        );
        commands.insert(
            CommandKind::Jog,
            CommandSlot::Template(CommandTemplate::new("{axis}JA{value}", MessageClass::Velocity)),
        );
        commands.insert(CommandKind::Go, CommandSlot::NoOp);
        commands.insert(
            CommandKind::Stop,
            CommandSlot::Template(CommandTemplate::new("{axis}ST", MessageClass::MoveTerminate)),
        );

        DialectTable {
            name: "test",
            framing: Framing::Line(b'\r'),
            send_terminator: "\r",
            delimiter: ';',
            split_transmission: false,
            cmnd_response: false,
            buffer_limit: 80,
            addressing: AxisAddressing::Numeric { base: 1 },
            poll: PollPlan {
                per_controller: false,
                batch: BatchMode::Sequential,
                queries: vec![],
            },
            settle_delay: std::time::Duration::ZERO,
            quirks,
            commands,
            probes: ProbeSet {
                position: Probe::new("TP", 3),
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
            default_decimals: 4,
        }
    }

    fn ctx() -> BuildContext {
        BuildContext {
            axis_label: "2".to_string(),
            resolution: 0.001,
            decimals: 3,
            base_velocity: 100.0,
            plus_limit_active: false,
            minus_limit_active: false,
            high_limit: 25.0,
            low_limit: -25.0,
            home_preset: 0.0,
        }
    }

    #[test]
    fn scales_steps_and_formats_with_axis_decimals() {
        let d = test_dialect(QuirkSet::default());
        let txn =
            build_transaction(&d, &ctx(), &[MotionCommand::MoveAbs(2000.0)], None, None)
                .unwrap();
        assert_eq!(txn.message, "2PA2.000");
        assert_eq!(txn.class, MessageClass::Motion);
        assert!(!txn.adjusted);
    }

    #[test]
    fn noop_entry_builds_empty_transaction() {
        let d = test_dialect(QuirkSet::default());
        let txn = build_transaction(&d, &ctx(), &[MotionCommand::Go], None, None).unwrap();
        assert!(txn.is_noop());
    }

    #[test]
    fn missing_entry_is_a_build_error() {
        let d = test_dialect(QuirkSet::default());
        let err = build_transaction(&d, &ctx(), &[MotionCommand::HomeForward], None, None)
            .unwrap_err();
        assert_eq!(err, BuildError::UnknownCommand(CommandKind::HomeForward));
    }

    #[test]
    fn pre_move_primitive_is_prepended() {
        let d = test_dialect(QuirkSet::default());
        let txn = build_transaction(
            &d,
            &ctx(),
            &[MotionCommand::MoveAbs(1000.0)],
            Some("2MO"),
            None,
        )
        .unwrap();
        assert_eq!(txn.message, "2MO;2PA1.000");
    }

    #[test]
    fn over_limit_transaction_is_rejected_before_send() {
        let mut d = test_dialect(QuirkSet::default());
        d.buffer_limit = 6;
        let err = build_transaction(&d, &ctx(), &[MotionCommand::MoveAbs(2000.0)], None, None)
            .unwrap_err();
        assert!(matches!(err, BuildError::MessageTooLong { len: 8, limit: 6 }));
    }

    #[test]
    fn unit_relative_move_gets_bumped() {
        let d = test_dialect(QuirkSet {
            rel_move_unit_bump: true,
            ..QuirkSet::default()
        });
        let txn =
            build_transaction(&d, &ctx(), &[MotionCommand::MoveRel(1.0)], None, None).unwrap();
        assert_eq!(txn.message, "2PR1.5");

        let txn =
            build_transaction(&d, &ctx(), &[MotionCommand::MoveRel(-1.0)], None, None).unwrap();
        assert_eq!(txn.message, "2PR-1.5");

        // Larger moves are untouched.
        let txn =
            build_transaction(&d, &ctx(), &[MotionCommand::MoveRel(10.0)], None, None).unwrap();
        assert_eq!(txn.message, "2PR0.010");
    }

    #[test]
    fn slow_slew_velocity_is_floored_and_flagged() {
        let d = test_dialect(QuirkSet {
            velocity_floor_base_plus_one: true,
            ..QuirkSet::default()
        });
        let txn =
            build_transaction(&d, &ctx(), &[MotionCommand::SetVelocity(50.0)], None, None)
                .unwrap();
        // base 100 + 1 = 101 steps, scaled by 0.001.
        assert_eq!(txn.message, "2VA0.101");
        assert!(txn.adjusted);
    }

    #[test]
    fn acceleration_is_clamped_to_range() {
        let d = test_dialect(QuirkSet {
            accel_range: Some((1.0, 1_000_000_000.0)),
            ..QuirkSet::default()
        });
        let txn =
            build_transaction(&d, &ctx(), &[MotionCommand::SetAccel(0.0)], None, None).unwrap();
        assert_eq!(txn.message, "2AC0.001");
        assert!(txn.adjusted);
    }

    #[test]
    fn jog_synthesized_as_velocity_plus_move_to_limit() {
        let d = test_dialect(QuirkSet {
            jog_via_move_to_limit: true,
            ..QuirkSet::default()
        });
        let txn = build_transaction(&d, &ctx(), &[MotionCommand::Jog(-200.0)], None, None)
            .unwrap();
        // |v| scaled, then absolute move to the low travel limit.
        assert_eq!(txn.message, "2VA0.200;2PA-25.000");
        assert_eq!(txn.class, MessageClass::Velocity);
    }

    #[test]
    fn move_off_active_limit_uses_escape_command() {
        let d = test_dialect(QuirkSet {
            limit_escape: Some(LimitEscape {
                off_plus: "{axis}MF-".to_string(),
                off_minus: "{axis}MF+".to_string(),
            }),
            ..QuirkSet::default()
        });
        let mut c = ctx();
        c.plus_limit_active = true;

        let txn =
            build_transaction(&d, &c, &[MotionCommand::MoveRel(-500.0)], None, None).unwrap();
        assert_eq!(txn.message, "2MF-");

        // Moving further into the limit is not an escape.
        let txn =
            build_transaction(&d, &c, &[MotionCommand::MoveRel(500.0)], None, None).unwrap();
        assert_eq!(txn.message, "2PR0.500");
    }

    #[test]
    fn class_takes_greatest_part() {
        let d = test_dialect(QuirkSet::default());
        let txn = build_transaction(
            &d,
            &ctx(),
            &[
                MotionCommand::SetVelocity(5000.0),
                MotionCommand::MoveAbs(2000.0),
            ],
            None,
            None,
        )
        .unwrap();
        assert_eq!(txn.class, MessageClass::Motion);

        let txn = build_transaction(
            &d,
            &ctx(),
            &[MotionCommand::MoveAbs(2000.0), MotionCommand::ReadInfo],
            None,
            None,
        )
        .unwrap();
        assert_eq!(txn.class, MessageClass::Info);
    }
}
