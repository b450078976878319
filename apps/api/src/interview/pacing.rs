//! Pacing Policy: maps the round budget and topic backlog to advisory text.
//!
//! The directive only biases the progress judgment. It never mutates state
//! and never stops an interview on its own.

use serde::Serialize;

/// Remaining rounds at or below which time pressure kicks in.
const TIME_PRESSURE_ROUNDS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingDirective {
    TimePressure,
    BacklogPressure,
    Standard,
}

impl PacingDirective {
    /// Text fed to the progress judgment prompt.
    pub fn instruction(self) -> &'static str {
        match self {
            PacingDirective::TimePressure => {
                "WARNING: Time is running out. STRICTLY LIMIT follow-ups. \
                 AGGRESSIVELY mark low-priority future tasks as completed to finish on time."
            }
            PacingDirective::BacklogPressure => {
                "WARNING: Too many tasks remaining. You must speed up. \
                 Combine topics or auto-skip less important ones."
            }
            PacingDirective::Standard => "Standard pacing. Be thorough.",
        }
    }
}

/// Picks the directive for the next judgment.
///
/// `queue_length` includes the active topic, so `queue_length - 1` is the
/// backlog still waiting behind it.
pub fn pacing(total_round: u32, max_round: u32, queue_length: usize) -> PacingDirective {
    let remaining_rounds = i64::from(max_round) - i64::from(total_round);
    let backlog = queue_length as i64 - 1;

    if remaining_rounds <= TIME_PRESSURE_ROUNDS {
        PacingDirective::TimePressure
    } else if backlog > remaining_rounds {
        PacingDirective::BacklogPressure
    } else {
        PacingDirective::Standard
    }
}
