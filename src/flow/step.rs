//! Flow steps and session phases.

use serde::{Deserialize, Serialize};

/// The steps of an onboarding flow.
///
/// Intro → AwaitVisualAck → AwaitVerbalAck → back to Intro, with any step able
/// to fall through to the terminal Fallback on an external signal. Plans
/// without a visual step go straight from Intro to AwaitVerbalAck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Intro,
    AwaitVisualAck,
    AwaitVerbalAck,
    Fallback,
}

impl Step {
    /// Numeric index as shown to the presentation layer (0-3).
    pub fn index(&self) -> u8 {
        match self {
            Self::Intro => 0,
            Self::AwaitVisualAck => 1,
            Self::AwaitVerbalAck => 2,
            Self::Fallback => 3,
        }
    }

    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: Step) -> bool {
        use Step::*;
        matches!(
            (self, target),
            (Intro, AwaitVisualAck)
                | (Intro, AwaitVerbalAck)
                | (AwaitVisualAck, AwaitVerbalAck)
                | (AwaitVisualAck, Intro)
                | (AwaitVerbalAck, Intro)
                | (Intro, Fallback)
                | (AwaitVisualAck, Fallback)
                | (AwaitVerbalAck, Fallback)
        )
    }

    /// Whether this step ends all timed behavior.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fallback)
    }
}

impl Default for Step {
    fn default() -> Self {
        Self::Intro
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Intro => "intro",
            Self::AwaitVisualAck => "await_visual_ack",
            Self::AwaitVerbalAck => "await_verbal_ack",
            Self::Fallback => "fallback",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle of one controller's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionPhase {
    /// Never started.
    Idle,
    Running,
    /// Handed off to the presentation layer.
    Exited { destination: String },
    /// Torn down by `stop()`.
    Stopped,
}

impl SessionPhase {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl Default for SessionPhase {
    fn default() -> Self {
        Self::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        use Step::*;
        let transitions = [
            (Intro, AwaitVisualAck),
            (Intro, AwaitVerbalAck),
            (AwaitVisualAck, AwaitVerbalAck),
            (AwaitVisualAck, Intro),
            (AwaitVerbalAck, Intro),
            (Intro, Fallback),
            (AwaitVisualAck, Fallback),
            (AwaitVerbalAck, Fallback),
        ];
        for (from, to) in transitions {
            assert!(
                from.can_transition_to(to),
                "{from} should transition to {to}"
            );
        }
    }

    #[test]
    fn invalid_transitions() {
        use Step::*;
        // Terminal
        assert!(!Fallback.can_transition_to(Intro));
        assert!(!Fallback.can_transition_to(AwaitVerbalAck));
        // Self-transition
        assert!(!Intro.can_transition_to(Intro));
        assert!(!AwaitVerbalAck.can_transition_to(AwaitVerbalAck));
        // Verbal never goes back to visual
        assert!(!AwaitVerbalAck.can_transition_to(AwaitVisualAck));
    }

    #[test]
    fn indices_follow_declaration_order() {
        use Step::*;
        let indices: Vec<u8> = [Intro, AwaitVisualAck, AwaitVerbalAck, Fallback]
            .iter()
            .map(Step::index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn display_matches_serde() {
        use Step::*;
        for step in [Intro, AwaitVisualAck, AwaitVerbalAck, Fallback] {
            let display = format!("{step}");
            let json = serde_json::to_string(&step).unwrap();
            assert_eq!(
                format!("\"{display}\""),
                json,
                "Display and serde should match for {step:?}"
            );
        }
    }

    #[test]
    fn session_phase_serializes_destination() {
        let phase = SessionPhase::Exited {
            destination: "next".to_string(),
        };
        let json = serde_json::to_value(&phase).unwrap();
        assert_eq!(json, serde_json::json!({"state": "exited", "destination": "next"}));
        assert!(!phase.is_running());
        assert!(SessionPhase::Running.is_running());
        assert_eq!(SessionPhase::default(), SessionPhase::Idle);
    }
}
