//! Canonical axis status.
//!
//! Controllers report their condition in wildly different shapes — a
//! packed status byte per axis, single code characters, numeric flag
//! words. The status parser decodes each of those into this one struct
//! of named booleans; nothing downstream ever looks at raw reply bytes.

use serde::{Deserialize, Serialize};

/// Canonical per-axis status bits.
///
/// `problem` means the driver stopped trusting the controller (stall
/// detection, persistent communication failure, firmware fault) and
/// should normally be treated like `done` by consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisStatus {
    /// Direction of the last motion: `true` = positive.
    pub direction_positive: bool,
    /// Commanded motion has ceased.
    pub done: bool,
    /// Plus travel-limit switch is active.
    pub plus_limit: bool,
    /// Minus travel-limit switch is active.
    pub minus_limit: bool,
    /// Home switch signal is on.
    pub home: bool,
    /// Closed-loop position maintenance is enabled.
    pub position_maintenance: bool,
    /// Encoder slip detection is enabled.
    pub slip: bool,
    /// Slip/stall detected.
    pub slip_stall: bool,
    /// Encoder home signal is on.
    pub encoder_home: bool,
    /// An encoder is fitted to this axis.
    pub encoder_present: bool,
    /// Driver-side problem; treat like `done`.
    pub problem: bool,
    /// Nonzero velocity present.
    pub moving: bool,
    /// Controller supports closed-loop gain commands for this axis.
    pub gain_support: bool,
    /// Communication with the controller has failed persistently.
    pub comm_error: bool,
    /// The axis has been homed.
    pub homed: bool,
}

impl AxisStatus {
    /// Whether a limit switch is active in the direction of travel.
    ///
    /// Only a limit in the direction the axis was last moving terminates
    /// a move; the opposite limit is recorded but does not end motion.
    pub fn limit_in_travel_direction(&self) -> bool {
        if self.direction_positive {
            self.plus_limit
        } else {
            self.minus_limit
        }
    }

    /// Set both failure bits used for persistent communication loss.
    pub fn mark_comm_failed(&mut self) {
        self.comm_error = true;
        self.problem = true;
    }

    /// Clear the communication-failure indication after a good exchange.
    pub fn clear_comm_failed(&mut self) {
        self.comm_error = false;
    }
}

/// Read-only per-axis snapshot published to the record/consumer layer.
///
/// Positions are raw controller steps; `encoder_position` is zero when
/// no encoder is fitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisReadback {
    pub position: i64,
    pub encoder_position: i64,
    /// Raw velocity readback, negative when moving in the minus
    /// direction. Zero for dialects without a velocity report.
    pub velocity: i64,
    pub status: AxisStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_gating_follows_direction() {
        let mut st = AxisStatus {
            direction_positive: true,
            minus_limit: true,
            ..AxisStatus::default()
        };
        assert!(!st.limit_in_travel_direction());

        st.plus_limit = true;
        assert!(st.limit_in_travel_direction());

        st.direction_positive = false;
        assert!(st.limit_in_travel_direction());

        st.minus_limit = false;
        assert!(!st.limit_in_travel_direction());
    }

    #[test]
    fn comm_failure_sets_problem_and_clears_only_comm_bit() {
        let mut st = AxisStatus::default();
        st.mark_comm_failed();
        assert!(st.comm_error && st.problem);

        st.clear_comm_failed();
        assert!(!st.comm_error);
        // problem is owned by the completion/stall logic, not the clear.
        assert!(st.problem);
    }
}
