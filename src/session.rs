/*!
Listening sessions: maximal runs of plays where no two adjacent
plays are more than `session_gap()` apart.
*/
use chrono::{DateTime, Duration, Utc};

use crate::models::Session;

/// Adjacent plays further apart than this start a new session.
/// A gap of exactly this long stays in the same session.
pub fn session_gap() -> Duration {
    Duration::minutes(30)
}

pub const MAX_SESSIONS: usize = 20;

struct OpenSession {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    plays: i64,
}

impl OpenSession {
    fn at(t: DateTime<Utc>) -> Self {
        Self {
            start: t,
            end: t,
            plays: 1,
        }
    }

    fn close(self) -> Session {
        let duration_minutes = (self.end - self.start).num_milliseconds() as f64 / 60_000.0;
        Session {
            start: self.start,
            end: self.end,
            plays: self.plays,
            duration_minutes,
        }
    }
}

/// Split ascending play times into sessions, in chronological order.
pub fn segment(played_at: &[DateTime<Utc>]) -> Vec<Session> {
    let (first, rest) = match played_at.split_first() {
        Some(split) => split,
        None => return vec![],
    };
    let gap = session_gap();
    let mut sessions = vec![];
    let mut current = OpenSession::at(*first);
    for &t in rest {
        if t - current.end > gap {
            sessions.push(current.close());
            current = OpenSession::at(t);
        } else {
            current.end = t;
            current.plays += 1;
        }
    }
    sessions.push(current.close());
    sessions
}

/// The longest sessions first, at most `MAX_SESSIONS` of them
pub fn top_sessions(played_at: &[DateTime<Utc>]) -> Vec<Session> {
    let mut sessions = segment(played_at);
    // stable: equal durations keep chronological order
    sessions.sort_by(|a, b| {
        b.duration_minutes
            .partial_cmp(&a.duration_minutes)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sessions.truncate(MAX_SESSIONS);
    sessions
}
