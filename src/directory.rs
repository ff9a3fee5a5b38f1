//! The hub directory: every connection, and the nick/op indexes over it.
//!
//! `hub.py` keeps `sockets`, `nicks`, `users`, `ops`, `bots` as separate
//! dicts and removes a user from each with `if dict.get(k) is user: del
//! dict[k]` — an object-identity check so that a *new* session which has
//! already claimed the same nick is never evicted by a late cleanup of an
//! *old* session. This crate's `ConnId` is the direct translation of that
//! identity check (see DESIGN.md's Open Questions).

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::session::{ConnId, Session};

/// All directory state owned by the `Hub` actor. Never shared — only the
/// `Hub` task ever touches this.
#[derive(Default)]
pub struct Directory {
    sessions: HashMap<ConnId, Session>,
    nicks: HashMap<String, ConnId>,
    ops: HashSet<ConnId>,
    bots: HashSet<ConnId>,
    /// `hub.py::joinfloodcheck`'s `jointimes` list, unified around the
    /// connecting IP (see DESIGN.md's Open Question decision) rather than
    /// the original's dual ip/nick keying.
    jointimes: VecDeque<(Instant, IpAddr)>,
}

impl Directory {
    pub fn new() -> Self {
        Directory::default()
    }

    /// Register a newly accepted connection before it has a nick.
    pub fn insert_pending(&mut self, session: Session) {
        self.sessions.insert(session.id, session);
    }

    pub fn get(&self, id: ConnId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Look up a nick that is currently claimed by *any* pending or active
    /// session (nick reservation happens at `$ValidateNick`, not at
    /// `$MyINFO`, matching `hub.py`'s `nicks` dict population timing).
    pub fn nick_owner(&self, nick: &str) -> Option<ConnId> {
        self.nicks.get(nick).copied()
    }

    /// Reserve a nick for `id`. Caller must have already checked
    /// `nick_owner` per the collision rules in spec's command dispatcher.
    pub fn reserve_nick(&mut self, nick: String, id: ConnId) {
        self.nicks.insert(nick, id);
    }

    /// `hub.py::joinfloodcheck`: reject if `ip` appears in the join history
    /// within `window`, otherwise record `(now, ip)` and allow it. Prunes
    /// entries older than `window` first, exactly as the original list
    /// comprehension does on every call.
    pub fn check_join_flood(&mut self, ip: IpAddr, now: Instant, window: Duration) -> bool {
        while let Some((t, _)) = self.jointimes.front() {
            if now.saturating_duration_since(*t) > window {
                self.jointimes.pop_front();
            } else {
                break;
            }
        }

        if self.jointimes.iter().any(|(_, seen)| *seen == ip) {
            return false;
        }

        self.jointimes.push_back((now, ip));
        true
    }

    pub fn set_op(&mut self, id: ConnId, is_op: bool) {
        if is_op {
            self.ops.insert(id);
        } else {
            self.ops.remove(&id);
        }
        if let Some(s) = self.sessions.get_mut(&id) {
            s.op = is_op;
        }
    }

    pub fn set_bot(&mut self, id: ConnId, is_bot: bool) {
        if is_bot {
            self.bots.insert(id);
        } else {
            self.bots.remove(&id);
        }
        if let Some(s) = self.sessions.get_mut(&id) {
            s.is_bot = is_bot;
        }
    }

    /// Active (logged-in) sessions: those with a reserved nick whose
    /// `LoginState` is `Active`.
    pub fn active_sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions
            .values()
            .filter(|s| s.login.state() == crate::session::LoginState::Active)
    }

    pub fn active_nicks(&self) -> Vec<String> {
        self.active_sessions()
            .filter_map(|s| s.nick().map(str::to_string))
            .collect()
    }

    pub fn op_nicks(&self) -> Vec<String> {
        self.ops
            .iter()
            .filter_map(|id| self.sessions.get(id))
            .filter_map(|s| s.nick().map(str::to_string))
            .collect()
    }

    pub fn is_op(&self, id: ConnId) -> bool {
        self.ops.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<ConnId> {
        self.sessions.keys().copied().collect()
    }

    /// Remove a connection, scoped to its identity: if another, newer
    /// session has since claimed the same nick, that reservation survives.
    /// Returns the removed session (so the caller can decide whether to
    /// broadcast `$Quit`, matching `hub.py::removeuser`'s "only if they had
    /// been in `users`" rule) along with whether they were active.
    pub fn remove(&mut self, id: ConnId) -> Option<(Session, bool)> {
        let session = self.sessions.remove(&id)?;
        let was_active = session.login.state() == crate::session::LoginState::Active;

        if let Some(nick) = session.nick() {
            if self.nicks.get(nick) == Some(&id) {
                self.nicks.remove(nick);
            }
        }
        self.ops.remove(&id);
        self.bots.remove(&id);

        Some((session, was_active))
    }
}
