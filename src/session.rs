//! Per-connection session state and its login state machine.
//!
//! The state machine is sans-IO in the same spirit as `HandshakeMachine` in
//! `src/state.rs`: it never touches a socket, only consumes parsed commands
//! and returns actions for the caller (the `Hub`) to perform. That keeps it
//! directly unit-testable without a running connection.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::ratelimit::SessionWindows;

/// Monotonically increasing connection identity, used in place of Python's
/// `dict[k] is user` object-identity comparisons for directory removal.
pub type ConnId = u64;

/// Where a connection is in the NMDC login handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    /// Connection accepted, nothing received yet.
    New,
    /// `$ValidateNick` received and accepted, nick reserved pending auth.
    AwaitingPass,
    /// Nick reserved (no account, or account auth already satisfied),
    /// waiting for `$MyINFO` before the user is admitted to the directory.
    AwaitingMyInfo,
    /// Fully logged in and visible in the directory.
    Active,
    /// Connection is being torn down; no further output will be sent.
    Closed,
}

/// Actions the login machine asks the caller to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginAction {
    /// Send this raw frame (without trailing `|`) back to the connection.
    Send(String),
    /// Admit the session to the directory as a fully logged-in user.
    Admit,
    /// Reject and close the connection, optionally after sending queued
    /// output (`Send` actions preceding this one are still flushed).
    Reject,
}

/// Sans-IO login handshake driver for one connection.
#[derive(Debug, Clone)]
pub struct LoginMachine {
    state: LoginState,
    nick: Option<String>,
    needs_pass: bool,
}

impl LoginMachine {
    pub fn new() -> Self {
        LoginMachine {
            state: LoginState::New,
            nick: None,
            needs_pass: false,
        }
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    pub fn nick(&self) -> Option<&str> {
        self.nick.as_deref()
    }

    /// A `$ValidateNick` was accepted (the caller already resolved any
    /// same-IP-reconnect / different-IP-collision cases against the
    /// directory before calling this).
    pub fn accept_nick(&mut self, nick: String, account_has_password: bool) -> Vec<LoginAction> {
        self.nick = Some(nick.clone());
        self.needs_pass = account_has_password;
        if account_has_password {
            self.state = LoginState::AwaitingPass;
            vec![LoginAction::Send("$GetPass".to_string())]
        } else {
            self.state = LoginState::AwaitingMyInfo;
            vec![LoginAction::Send("$Hello ".to_string() + &nick)]
        }
    }

    /// `$ValidateNick` rejected (already in use from a different IP). Sent
    /// bare, with no nick argument.
    pub fn reject_nick(&mut self, _nick: &str) -> Vec<LoginAction> {
        self.state = LoginState::Closed;
        vec![
            LoginAction::Send("$ValidateDenide".to_string()),
            LoginAction::Reject,
        ]
    }

    /// `$MyPass` accepted.
    pub fn accept_pass(&mut self) -> Vec<LoginAction> {
        if self.state != LoginState::AwaitingPass {
            return vec![];
        }
        self.state = LoginState::AwaitingMyInfo;
        let nick = self.nick.clone().unwrap_or_default();
        vec![LoginAction::Send("$Hello ".to_string() + &nick)]
    }

    /// `$MyPass` rejected (wrong password).
    pub fn reject_pass(&mut self) -> Vec<LoginAction> {
        self.state = LoginState::Closed;
        vec![
            LoginAction::Send("$BadPass".to_string()),
            LoginAction::Reject,
        ]
    }

    /// `$MyINFO` for our own nick arrived while awaiting it: the session is
    /// now admitted to the directory.
    pub fn admit(&mut self) -> Vec<LoginAction> {
        if self.state != LoginState::AwaitingMyInfo {
            return vec![];
        }
        self.state = LoginState::Active;
        vec![LoginAction::Admit]
    }

    pub fn close(&mut self) {
        self.state = LoginState::Closed;
    }
}

impl Default for LoginMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Full per-connection record held by the `Hub`. This is `DCHubClient`
/// translated: one struct per socket, holding both protocol state and the
/// directory-visible presence fields (`MyINFO` cache, nick, op bit, ...).
pub struct Session {
    pub id: ConnId,
    pub ip: IpAddr,
    pub out_tx: mpsc::UnboundedSender<String>,

    pub login: LoginMachine,
    pub windows: SessionWindows,
    pub queued_commands: VecDeque<String>,

    pub account: Option<String>,
    pub op: bool,
    pub is_bot: bool,
    pub ignoremessages: bool,
    pub supports: Vec<String>,
    pub given_nicklist: bool,

    pub description: String,
    pub tag: String,
    pub speed: String,
    pub speedclass: u8,
    pub email: String,
    pub sharesize: u64,
    pub myinfo_cache: String,

    pub start_time: Instant,
    pub last_activity: Instant,
}

impl Session {
    pub fn new(id: ConnId, ip: IpAddr, out_tx: mpsc::UnboundedSender<String>) -> Self {
        let now = Instant::now();
        Session {
            id,
            ip,
            out_tx,
            login: LoginMachine::new(),
            windows: SessionWindows::new(),
            queued_commands: VecDeque::new(),
            account: None,
            op: false,
            is_bot: false,
            ignoremessages: false,
            supports: Vec::new(),
            given_nicklist: false,
            description: String::new(),
            tag: String::new(),
            speed: "56Kbps".to_string(),
            speedclass: 1,
            email: String::new(),
            sharesize: 0,
            myinfo_cache: String::new(),
            start_time: now,
            last_activity: now,
        }
    }

    pub fn nick(&self) -> Option<&str> {
        self.login.nick()
    }

    /// Queue a line for delivery to the connection, unless output has been
    /// suppressed (`$ForceMove` sets this before closing), matching
    /// `DCHubUser.sendmessage`'s `ignoremessages` guard.
    pub fn send(&self, line: impl Into<String>) {
        if self.ignoremessages {
            return;
        }
        let _ = self.out_tx.send(line.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_nick_without_password_skips_to_myinfo() {
        let mut m = LoginMachine::new();
        let actions = m.accept_nick("alice".to_string(), false);
        assert_eq!(m.state(), LoginState::AwaitingMyInfo);
        assert_eq!(actions, vec![LoginAction::Send("$Hello alice".to_string())]);
    }

    #[test]
    fn accept_nick_with_password_requests_pass() {
        let mut m = LoginMachine::new();
        let actions = m.accept_nick("bob".to_string(), true);
        assert_eq!(m.state(), LoginState::AwaitingPass);
        assert_eq!(actions, vec![LoginAction::Send("$GetPass".to_string())]);
    }

    #[test]
    fn reject_nick_closes_and_denies() {
        let mut m = LoginMachine::new();
        let actions = m.reject_nick("alice");
        assert_eq!(m.state(), LoginState::Closed);
        assert_eq!(
            actions,
            vec![
                LoginAction::Send("$ValidateDenide".to_string()),
                LoginAction::Reject
            ]
        );
    }

    #[test]
    fn full_happy_path_reaches_active() {
        let mut m = LoginMachine::new();
        m.accept_nick("alice".to_string(), true);
        m.accept_pass();
        assert_eq!(m.state(), LoginState::AwaitingMyInfo);
        let actions = m.admit();
        assert_eq!(actions, vec![LoginAction::Admit]);
        assert_eq!(m.state(), LoginState::Active);
    }

    #[test]
    fn bad_pass_closes_connection() {
        let mut m = LoginMachine::new();
        m.accept_nick("alice".to_string(), true);
        let actions = m.reject_pass();
        assert_eq!(m.state(), LoginState::Closed);
        assert_eq!(
            actions,
            vec![LoginAction::Send("$BadPass".to_string()), LoginAction::Reject]
        );
    }

    #[test]
    fn admit_ignored_outside_awaiting_myinfo() {
        let mut m = LoginMachine::new();
        assert_eq!(m.admit(), Vec::<LoginAction>::new());
    }
}
