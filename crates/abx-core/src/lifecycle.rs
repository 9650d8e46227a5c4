//! Experiment lifecycle transitions
//!
//! ```text
//! draft -> running <-> paused
//!          running | paused -> completed -> archived
//! ```

use crate::types::TestStatus;

/// Statuses reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: TestStatus) -> &'static [TestStatus] {
    use TestStatus::{Archived, Completed, Draft, Paused, Running};
    match from {
        Draft => &[Running],
        Running => &[Paused, Completed],
        Paused => &[Running, Completed],
        Completed => &[Archived],
        Archived => &[],
    }
}

/// Whether `from -> to` is a legal transition
#[inline]
#[must_use]
pub fn can_transition(from: TestStatus, to: TestStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = TestStatus> {
        prop_oneof![
            Just(TestStatus::Draft),
            Just(TestStatus::Running),
            Just(TestStatus::Paused),
            Just(TestStatus::Completed),
            Just(TestStatus::Archived),
        ]
    }

    #[test]
    fn draft_transitions() {
        assert!(can_transition(TestStatus::Draft, TestStatus::Running));
        assert!(!can_transition(TestStatus::Draft, TestStatus::Completed));
        assert!(!can_transition(TestStatus::Draft, TestStatus::Paused));
    }

    #[test]
    fn pause_cycle() {
        assert!(can_transition(TestStatus::Running, TestStatus::Paused));
        assert!(can_transition(TestStatus::Paused, TestStatus::Running));
        assert!(can_transition(TestStatus::Paused, TestStatus::Completed));
    }

    #[test]
    fn archived_is_terminal() {
        assert!(allowed_transitions(TestStatus::Archived).is_empty());
    }

    proptest! {
        #[test]
        fn prop_no_transition_back_to_draft(from in any_status()) {
            prop_assert!(!can_transition(from, TestStatus::Draft));
        }

        #[test]
        fn prop_no_self_transitions(status in any_status()) {
            prop_assert!(!can_transition(status, status));
        }
    }
}
