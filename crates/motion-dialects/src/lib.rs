//! Example dialect tables for the motion engine.
//!
//! Each module is pure data: the command templates, reply layouts,
//! framing, probes and documented firmware quirks of one controller
//! family. Together they cover the dialect variation the engine has to
//! absorb — aggregate vs. per-axis status, line vs. prompt framing,
//! composite vs. split transmission, command echoes, settle delays and
//! a fatal firmware self-check.
//!
//! | family | framing | poll shape | notable |
//! |---|---|---|---|
//! | [`mm4000`] | CR line | aggregate | settle workaround, synthesized jog |
//! | [`pm500`] | `>` prompt | per-axis single query | command echo |
//! | [`im483`] | CR line | per-axis pipelined | party line, zero-only load |
//! | [`oms58`] | CR line | per-axis | watchdog disable, MR±1 bump |

mod im483;
mod mm4000;
mod oms58;
mod pm500;

pub use im483::im483;
pub use mm4000::mm4000;
pub use oms58::oms58;
pub use pm500::pm500;
