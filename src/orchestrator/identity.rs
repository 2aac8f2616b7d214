//! Nested-session identity resolution.
//!
//! The host acknowledges `start_session` without telling us the new
//! session's id, so a started session is linked to its pending request by,
//! in order of strength:
//!
//! 1. the parent id carried on the host event,
//! 2. the correlation marker echoed back in the session's configuration,
//! 3. a name/request heuristic over a polled active-session snapshot.
//!
//! Only (1) and (2) are trusted on the event path. (3) is the bounded
//! polling fallback and is inherently racy: when several sessions match,
//! the most recently started one wins and the ambiguity is logged.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::host::HostSession;

/// How a started session was linked to its pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Linkage {
    /// Name and request kind match a session started after the request.
    Heuristic,
    /// The echoed correlation marker matches.
    CorrelationToken,
    /// The host reported the primary as the session's parent.
    ParentId,
}

/// A nested start the host has accepted but not yet identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingNested {
    /// Primary the nested session belongs to.
    pub primary_id: String,
    /// Token placed in the nested configuration.
    pub correlation_id: String,
    /// Display name the nested session was requested with.
    pub expected_name: String,
    /// When the start was requested.
    pub requested_at: DateTime<Utc>,
}

impl PendingNested {
    /// Strongest linkage between `session` and this request, if any.
    #[must_use]
    pub fn linkage(&self, session: &HostSession) -> Option<Linkage> {
        if session.id == self.primary_id {
            return None;
        }

        if session.parent_id.as_deref() == Some(self.primary_id.as_str()) {
            return Some(Linkage::ParentId);
        }

        if let Some(marker) = session.configuration.nested_marker() {
            return (marker.correlation_id == self.correlation_id
                && marker.parent_session_id == self.primary_id)
                .then_some(Linkage::CorrelationToken);
        }

        let attach = session.configuration.request() == Some("attach");
        let named = session.name == self.expected_name
            || session.configuration.name() == Some(self.expected_name.as_str());
        (attach && named && session.started_at >= self.requested_at).then_some(Linkage::Heuristic)
    }
}

/// Link a started-session event to one of the pending requests.
///
/// Heuristic matches are ignored here; they are left to the polling path.
#[must_use]
pub fn match_event<'a>(
    session: &HostSession,
    pending: impl IntoIterator<Item = &'a PendingNested>,
) -> Option<(&'a PendingNested, Linkage)> {
    pending
        .into_iter()
        .filter_map(|p| p.linkage(session).map(|l| (p, l)))
        .filter(|(_, l)| *l >= Linkage::CorrelationToken)
        .max_by_key(|(_, l)| *l)
}

/// Result of picking a nested session out of an active-session snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// The chosen session.
    pub session: HostSession,
    /// How it was linked.
    pub linkage: Linkage,
    /// How many sessions qualified; more than one means the pick was a guess.
    pub candidates: usize,
}

impl Selection {
    /// Whether more than one session qualified.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        self.candidates > 1
    }
}

/// Pick the nested session for `pending` from `sessions`.
///
/// Sessions in `exclude` (already tracked) never qualify. Among the rest the
/// strongest linkage wins, then the most recent start.
#[must_use]
pub fn select_candidate(
    sessions: &[HostSession],
    pending: &PendingNested,
    exclude: &HashSet<String>,
) -> Option<Selection> {
    let mut candidates: Vec<(&HostSession, Linkage)> = sessions
        .iter()
        .filter(|s| !exclude.contains(&s.id))
        .filter_map(|s| pending.linkage(s).map(|l| (s, l)))
        .collect();

    let count = candidates.len();
    candidates.sort_by(|(a, la), (b, lb)| la.cmp(lb).then(a.started_at.cmp(&b.started_at)));
    candidates.pop().map(|(session, linkage)| Selection {
        session: session.clone(),
        linkage,
        candidates: count,
    })
}

// ── Tests ─────────────────────────────────────────────────
