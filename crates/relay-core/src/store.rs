//! Session Store: owns every session record and enforces the transition
//! table.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::errors::RelayError;
use crate::ids::{SessionId, WorkId};
use crate::session::{NewSession, Outcome, Session, SessionStatus};
use crate::sweep::{EvictionReason, Evicted, SweepPolicy};

/// In-memory session table.
///
/// Every method is a single read-modify-write on `&mut self`; callers
/// serialize access (the server runs the store inside one actor task).
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<SessionId, Session>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new session in `Created`. Duplicate ids are rejected.
    pub fn create(&mut self, params: NewSession, now: DateTime<Utc>) -> Result<&Session, RelayError> {
        if self.sessions.contains_key(&params.id) {
            return Err(RelayError::SessionExists(params.id));
        }
        let id = params.id.clone();
        Ok(&*self.sessions.entry(id).or_insert(Session::new(params, now)))
    }

    /// Look up a session.
    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Look up a session or fail with `SessionNotFound`.
    pub fn require(&self, id: &SessionId) -> Result<&Session, RelayError> {
        self.sessions
            .get(id)
            .ok_or_else(|| RelayError::SessionNotFound(id.clone()))
    }

    /// Fail unless the session exists and is in `expected`.
    pub fn require_status(
        &self,
        id: &SessionId,
        expected: SessionStatus,
    ) -> Result<&Session, RelayError> {
        let session = self.require(id)?;
        if session.status() != expected {
            return Err(RelayError::InvalidStatus {
                id: id.clone(),
                actual: session.status(),
                expected,
            });
        }
        Ok(session)
    }

    /// `Created → Bound`.
    pub fn mark_bound(&mut self, id: &SessionId, now: DateTime<Utc>) -> Result<&Session, RelayError> {
        let session = self.require_mut(id)?;
        let _ = session.advance(SessionStatus::Created, now)?;
        Ok(&*session)
    }

    /// `Bound → ResourceLinked`, recording the resource.
    pub fn link_resource(
        &mut self,
        id: &SessionId,
        resource_id: String,
        resource_link: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<&Session, RelayError> {
        let session = self.require_mut(id)?;
        let _ = session.advance(SessionStatus::Bound, now)?;
        session.set_resource(resource_id, resource_link);
        Ok(&*session)
    }

    /// `ResourceLinked → TransactionInFlight`, recording the work id.
    pub fn start_work(
        &mut self,
        id: &SessionId,
        work_id: WorkId,
        now: DateTime<Utc>,
    ) -> Result<&Session, RelayError> {
        let session = self.require_mut(id)?;
        let _ = session.advance(SessionStatus::ResourceLinked, now)?;
        session.set_work_id(work_id);
        Ok(&*session)
    }

    /// `TransactionInFlight → Completed`.
    ///
    /// When `work_id` is given it must match the in-flight request.
    pub fn complete_work(
        &mut self,
        id: &SessionId,
        work_id: Option<&WorkId>,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<&Session, RelayError> {
        let session = self.require_status(id, SessionStatus::TransactionInFlight)?;
        if let (Some(reported), Some(in_flight)) = (work_id, session.work_id()) {
            if reported != in_flight {
                return Err(RelayError::WorkIdMismatch {
                    id: id.clone(),
                    expected: in_flight.clone(),
                    actual: reported.clone(),
                });
            }
        }

        let session = self.require_mut(id)?;
        let _ = session.advance(SessionStatus::TransactionInFlight, now)?;
        session.set_outcome(outcome);
        Ok(&*session)
    }

    /// Remove every session the policy marks at `now`, oldest first.
    ///
    /// Sessions evicted for age are moved to `Expired` before being returned.
    pub fn sweep(&mut self, policy: &SweepPolicy, now: DateTime<Utc>) -> Vec<Evicted> {
        let mut marked: Vec<(SessionId, EvictionReason)> = self
            .sessions
            .values()
            .filter_map(|s| policy.verdict(s, now).map(|reason| (s.id().clone(), reason)))
            .collect();
        marked.sort_by(|(a, _), (b, _)| {
            let created = |id: &SessionId| self.sessions.get(id).map(Session::created_at);
            created(a).cmp(&created(b)).then_with(|| a.cmp(b))
        });

        marked
            .into_iter()
            .filter_map(|(id, reason)| {
                let mut session = self.sessions.remove(&id)?;
                if reason == EvictionReason::MaxAge {
                    let _ = session.expire();
                }
                Some(Evicted { session, reason })
            })
            .collect()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of records currently in `status`.
    pub fn count_with_status(&self, status: SessionStatus) -> usize {
        self.sessions.values().filter(|s| s.status() == status).count()
    }

    fn require_mut(&mut self, id: &SessionId) -> Result<&mut Session, RelayError> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| RelayError::SessionNotFound(id.clone()))
    }
}
