//! Aggregates over closed sessions.
//!
//! Running sessions never count toward totals; their duration is not
//! authoritative until they are stopped.

use crate::types::{ProjectStats, TimeSession};

/// Sums the closed sessions in `sessions` that belong to `project_id`.
pub fn summarize<'a>(
    project_id: &str,
    sessions: impl IntoIterator<Item = &'a TimeSession>,
) -> ProjectStats {
    let mut stats = ProjectStats::empty(project_id);
    for session in sessions {
        if session.project_id != project_id || session.is_running {
            continue;
        }
        stats.total_seconds += session.duration_seconds.unwrap_or(0);
        stats.session_count += 1;
    }
    stats.total_hours = hours(stats.total_seconds);
    stats
}

/// Seconds to hours, rounded to two decimals for display.
pub fn hours(total_seconds: i64) -> f64 {
    (total_seconds as f64 / 36.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn closed(id: &str, project: &str, secs: i64) -> TimeSession {
        let mut session = TimeSession::open(id.into(), project.into(), at(0));
        session.close(at(secs), None);
        session
    }

    #[test]
    fn running_and_foreign_sessions_are_excluded() {
        let sessions = vec![
            closed("a", "P1", 1800),
            closed("b", "P1", 5400),
            closed("c", "P2", 999),
            TimeSession::open("d".into(), "P1".into(), at(0)),
        ];

        let stats = summarize("P1", &sessions);
        assert_eq!(stats.session_count, 2);
        assert_eq!(stats.total_seconds, 7200);
        assert_eq!(stats.total_hours, 2.0);
    }

    #[test]
    fn hours_rounds_to_two_decimals() {
        assert_eq!(hours(0), 0.0);
        assert_eq!(hours(1500), 0.42);
    }
}
