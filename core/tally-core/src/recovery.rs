//! Detection of sessions left running by a previous process.
//!
//! A fresh process always starts with an idle timer, so any running session
//! in the store that the timer does not own was abandoned. Detection only;
//! nothing here stops or deletes sessions.

use serde::{Deserialize, Serialize};

use crate::timer::TimerState;
use crate::types::TimeSession;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub orphaned: Vec<TimeSession>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned.is_empty()
    }
}

pub fn detect_orphans(running: &[TimeSession], timer: &TimerState) -> RecoveryReport {
    let owned = timer.session_id.as_deref();
    let orphaned: Vec<TimeSession> = running
        .iter()
        .filter(|s| s.is_running && Some(s.id.as_str()) != owned)
        .cloned()
        .collect();

    for session in &orphaned {
        tracing::warn!(
            session_id = %session.id,
            project_id = %session.project_id,
            started_at = %session.start_time,
            "Running session not owned by the timer"
        );
    }
    RecoveryReport { orphaned }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn running(id: &str) -> TimeSession {
        TimeSession::open(
            id.to_string(),
            "P1".to_string(),
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        )
    }

    #[test]
    fn idle_timer_owns_nothing() {
        let report = detect_orphans(&[running("a"), running("b")], &TimerState::initial(25));
        assert_eq!(report.orphaned.len(), 2);
        assert!(!report.is_clean());
    }

    #[test]
    fn timer_session_is_not_an_orphan() {
        let mut state = TimerState::initial(25);
        state.session_id = Some("a".to_string());
        let report = detect_orphans(&[running("a")], &state);
        assert!(report.is_clean());
    }
}
