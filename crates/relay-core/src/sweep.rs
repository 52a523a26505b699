//! Eviction policy applied by the periodic sweeper.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::ids::SessionId;
use crate::session::Session;

/// Time budgets for live and completed sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweepPolicy {
    /// Absolute age ceiling, measured from `createdAt`, regardless of status.
    pub max_age: Duration,
    /// How long a terminal session stays queryable after completing.
    pub completed_grace: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(60 * 60),
            completed_grace: Duration::from_secs(30),
        }
    }
}

impl SweepPolicy {
    /// Why `session` should be evicted at `now`, if at all.
    ///
    /// Terminal sessions are always reported as [`EvictionReason::Completed`],
    /// even when they also crossed the age ceiling.
    pub fn verdict(&self, session: &Session, now: DateTime<Utc>) -> Option<EvictionReason> {
        let age = now.signed_duration_since(session.created_at());
        let aged_out = age > to_delta(self.max_age);

        if session.status().is_terminal() {
            let since_terminal = session
                .completed_at()
                .map_or(age, |at| now.signed_duration_since(at));
            return (aged_out || since_terminal > to_delta(self.completed_grace))
                .then_some(EvictionReason::Completed);
        }
        aged_out.then_some(EvictionReason::MaxAge)
    }
}

fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

/// Why a session was removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Non-terminal session exceeded the age ceiling.
    MaxAge,
    /// Terminal session outlived its grace window.
    Completed,
}

impl EvictionReason {
    /// Label used in logs, metrics and `session_expired` frames.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MaxAge => "max_age",
            Self::Completed => "completed",
        }
    }
}

/// Session removed by a sweep, with the reason.
#[derive(Clone, Debug)]
pub struct Evicted {
    /// The record as it was when removed.
    pub session: Session,
    /// Why it was removed.
    pub reason: EvictionReason,
}

/// Summary of one sweep run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Removed sessions, oldest first.
    pub evicted: Vec<(SessionId, EvictionReason)>,
    /// Bindings released from the registry.
    pub released_bindings: usize,
}

impl SweepReport {
    /// Sessions removed for exceeding the age ceiling.
    pub fn expired(&self) -> usize {
        self.count(EvictionReason::MaxAge)
    }

    /// Completed sessions removed after their grace window.
    pub fn completed(&self) -> usize {
        self.count(EvictionReason::Completed)
    }

    /// Whether nothing was removed.
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty()
    }

    fn count(&self, reason: EvictionReason) -> usize {
        self.evicted.iter().filter(|(_, r)| *r == reason).count()
    }
}
