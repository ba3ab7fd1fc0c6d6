// Property tests for the access method testing state machine

use proptest::prelude::*;

use api_access::access_method::{TestingEvent, TestingStatus};

fn event() -> impl Strategy<Value = TestingEvent> {
    prop_oneof![
        Just(TestingEvent::Started),
        Just(TestingEvent::Cancelled),
        any::<bool>().prop_map(|reachable| TestingEvent::Finished { reachable }),
    ]
}

proptest! {
    #[test]
    fn terminal_states_are_only_reached_from_in_progress(events in prop::collection::vec(event(), 0..64)) {
        let mut status = TestingStatus::Initial;

        for event in events {
            let before = status;
            if let Some(next) = status.next(event) {
                if next.is_terminal() {
                    prop_assert_eq!(before, TestingStatus::InProgress);
                }
                status = next;
            }
        }
    }

    #[test]
    fn cancel_never_yields_terminal(events in prop::collection::vec(event(), 0..64)) {
        let mut status = TestingStatus::Initial;

        for event in events {
            status = status.next(event).unwrap_or(status);
        }

        prop_assert_eq!(status.next(TestingEvent::Cancelled), Some(TestingStatus::Initial));
    }

    #[test]
    fn finished_outcome_matches_reachability(reachable in any::<bool>()) {
        let next = TestingStatus::InProgress.next(TestingEvent::Finished { reachable });
        let expected = if reachable { TestingStatus::Succeeded } else { TestingStatus::Failed };
        prop_assert_eq!(next, Some(expected));
    }
}
