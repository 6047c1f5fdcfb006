//! Lifecycle states and the transitions allowed between them.

/// Where the application is in its lifecycle.
///
/// ```text
/// Idle → Booting → AfterPhase → Ready → Stopping → Stopped
///   └───────┴──────────┴──────────────────↗
/// ```
///
/// `Stopping` can be entered from any state before it, so an explicit stop
/// during a failed boot still releases whatever was set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumIter)]
pub enum LifecycleState {
    Idle,
    Booting,
    AfterPhase,
    Ready,
    Stopping,
    Stopped,
}

impl LifecycleState {
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Idle, Booting)
                | (Booting, AfterPhase)
                | (AfterPhase, Ready)
                | (Idle | Booting | AfterPhase | Ready, Stopping)
                | (Stopping, Stopped)
        )
    }
}

/// The module callback being run, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Setup,
    After,
}

#[cfg(test)]
mod tests {
    use super::LifecycleState::{self, *};
    use strum::IntoEnumIterator;

    #[test]
    fn happy_path_is_allowed() {
        let path = [Idle, Booting, AfterPhase, Ready, Stopping, Stopped];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn phases_cannot_be_skipped_or_repeated() {
        assert!(!Idle.can_transition_to(Ready));
        assert!(!Booting.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Booting));
        assert!(!Stopping.can_transition_to(Stopping));
        assert!(!Stopped.can_transition_to(Stopping));
        assert!(!Ready.can_transition_to(Stopped));
    }

    #[test]
    fn stopped_is_final() {
        assert!(LifecycleState::iter().all(|next| !Stopped.can_transition_to(next)));
    }

    #[test]
    fn stop_is_reachable_before_ready() {
        assert!(Idle.can_transition_to(Stopping));
        assert!(Booting.can_transition_to(Stopping));
        assert!(AfterPhase.can_transition_to(Stopping));
    }

    #[test]
    fn display_names() {
        assert_eq!(AfterPhase.to_string(), "AfterPhase");
        assert_eq!(super::Phase::After.to_string(), "after");
    }
}
