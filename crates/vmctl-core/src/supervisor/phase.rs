use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where one rollout member is in its lifecycle.
///
/// ```text
/// Connecting -> Connected -> Configured -> Started
///      \             \             \           \
///       +-------------+-------------+-----------+--> Failed
///
/// any phase except Closed -> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Connecting,
    Connected,
    Configured,
    Started,
    Failed,
    Closed,
}

impl Phase {
    /// The phase a healthy member moves to next, if any.
    pub fn next(self) -> Option<Phase> {
        match self {
            Self::Connecting => Some(Self::Connected),
            Self::Connected => Some(Self::Configured),
            Self::Configured => Some(Self::Started),
            Self::Started | Self::Failed | Self::Closed => None,
        }
    }

    /// Whether the forward path has ended. A `Started` member can still
    /// fail or close.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Started | Self::Failed | Self::Closed)
    }

    /// Check whether moving from `from` to `to` is allowed.
    pub fn is_valid_transition(from: Phase, to: Phase) -> bool {
        matches!(
            (from, to),
            (Self::Connecting, Self::Connected)
                | (Self::Connected, Self::Configured)
                | (Self::Configured, Self::Started)
                | (
                    Self::Connecting | Self::Connected | Self::Configured | Self::Started,
                    Self::Failed
                )
                | (
                    Self::Connecting
                        | Self::Connected
                        | Self::Configured
                        | Self::Started
                        | Self::Failed,
                    Self::Closed
                )
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Configured => "configured",
            Self::Started => "started",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

impl FromStr for Phase {
    type Err = PhaseParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connecting" => Ok(Self::Connecting),
            "connected" => Ok(Self::Connected),
            "configured" => Ok(Self::Configured),
            "started" => Ok(Self::Started),
            "failed" => Ok(Self::Failed),
            "closed" => Ok(Self::Closed),
            other => Err(PhaseParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Phase`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid phase: {0:?}")]
pub struct PhaseParseError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Phase; 6] = [
        Phase::Connecting,
        Phase::Connected,
        Phase::Configured,
        Phase::Started,
        Phase::Failed,
        Phase::Closed,
    ];

    #[test]
    fn forward_path_is_valid() {
        let mut phase = Phase::Connecting;
        while let Some(next) = phase.next() {
            assert!(Phase::is_valid_transition(phase, next), "{phase} -> {next}");
            phase = next;
        }
        assert_eq!(phase, Phase::Started);
    }

    #[test]
    fn skipping_a_phase_is_invalid() {
        assert!(!Phase::is_valid_transition(Phase::Connecting, Phase::Configured));
        assert!(!Phase::is_valid_transition(Phase::Connected, Phase::Started));
        assert!(!Phase::is_valid_transition(Phase::Started, Phase::Connecting));
    }

    #[test]
    fn failure_from_every_live_phase() {
        for from in ALL {
            let expected = !matches!(from, Phase::Failed | Phase::Closed);
            assert_eq!(Phase::is_valid_transition(from, Phase::Failed), expected, "{from}");
        }
        assert!(Phase::is_valid_transition(Phase::Started, Phase::Failed));
        assert!(Phase::Started.is_terminal());
    }

    #[test]
    fn closed_is_reachable_from_everything_but_itself() {
        for from in ALL {
            assert_eq!(
                Phase::is_valid_transition(from, Phase::Closed),
                from != Phase::Closed,
                "{from}"
            );
        }
    }

    #[test]
    fn phase_round_trips_through_text() {
        for phase in ALL {
            assert_eq!(phase.to_string().parse::<Phase>().unwrap(), phase);
        }
        assert!("running".parse::<Phase>().is_err());
    }
}
