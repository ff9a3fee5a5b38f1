//! The central hub actor: owns all directory state and drives every
//! command handler. Exactly one task runs this loop, so nothing here needs
//! a lock — the `mpsc::Receiver<HubEvent>` is the only synchronization
//! primitive, matching spec's single-writer guarantee and `hub.py`'s
//! single-threaded `processcommand` dispatch.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::accounts::Accounts;
use crate::command::{self, Classified};
use crate::config::Config;
use crate::directory::Directory;
use crate::error::CommandError;
use crate::session::{ConnId, LoginAction, LoginState, Session};
use crate::usercommands::UserCommands;

/// `hub.py::setupdefaults`'s `lockstring`; clients echo a derived key back
/// in `$Key`, which this hub does not need to verify (see spec's
/// Non-goals on the handshake cipher).
const LOCK_STRING: &str = "EXTENDEDPROTOCOLABCABCABCABCABCABC";
const PRIVATE_KEY_PREFIX: &str = "rust-dchub--";
/// `hub.py::setupdefaults`'s `supports` list.
const HUB_SUPPORTS: &[&str] = &["NoGetINFO", "NoHello", "UserCommand", "UserIP2"];

/// Messages sent to the `Hub` task.
pub enum HubEvent {
    Connect {
        ip: IpAddr,
        out_tx: mpsc::UnboundedSender<String>,
        reply: oneshot::Sender<ConnId>,
    },
    Frame {
        id: ConnId,
        raw: String,
    },
    FrameTooLong {
        id: ConnId,
    },
    Disconnect {
        id: ConnId,
    },
    Tick,
    Reload,
}

pub struct HubPaths {
    pub config: std::path::PathBuf,
    pub accounts: std::path::PathBuf,
    pub usercommands: std::path::PathBuf,
    pub welcome: std::path::PathBuf,
}

pub struct Hub {
    directory: Directory,
    config: Config,
    accounts: Accounts,
    usercommands: UserCommands,
    welcome: String,
    paths: HubPaths,
    next_id: ConnId,
}

impl Hub {
    pub fn new(config: Config, accounts: Accounts, usercommands: UserCommands, welcome: String, paths: HubPaths) -> Self {
        Hub {
            directory: Directory::new(),
            config,
            accounts,
            usercommands,
            welcome,
            paths,
            next_id: 1,
        }
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<HubEvent>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle(event),
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    self.handle(HubEvent::Tick);
                }
            }
        }
    }

    fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Connect { ip, out_tx, reply } => {
                let id = self.connect(ip, out_tx);
                let _ = reply.send(id);
            }
            HubEvent::Frame { id, raw } => {
                self.enqueue_frame(id, raw);
                self.drain_queue(id, Instant::now());
            }
            HubEvent::FrameTooLong { id } => {
                warn!(id, "frame exceeded max size, dropping connection");
                self.disconnect(id);
            }
            HubEvent::Disconnect { id } => self.disconnect(id),
            HubEvent::Tick => {
                self.tick(Instant::now());
                let ids = self.directory.ids();
                for id in ids {
                    self.drain_queue(id, Instant::now());
                }
            }
            HubEvent::Reload => self.reload(),
        }
    }

    fn connect(&mut self, ip: IpAddr, out_tx: mpsc::UnboundedSender<String>) -> ConnId {
        let id = self.next_id;
        self.next_id += 1;
        let session = Session::new(id, ip, out_tx);
        self.directory.insert_pending(session);
        info!(id, %ip, "new connection");

        if self.reject_if_hub_full(id) {
            return id;
        }

        if self.config.joinfloodtime > 0 {
            let window = Duration::from_secs(self.config.joinfloodtime);
            if !self.directory.check_join_flood(ip, Instant::now(), window) {
                warn!(id, %ip, "join flood detected, rejecting connection");
                self.disconnect(id);
                return id;
            }
        }

        if let Some(session) = self.directory.get(id) {
            session.send(format!("$Lock {LOCK_STRING} Pk={PRIVATE_KEY_PREFIX}"));
            session.send(format!("$HubName {}", self.config.hubname));
        }
        id
    }

    /// `hub.py::hubfullcheck`: reject with the configured redirect, or
    /// `$HubIsFull` if none is set, and suppress further output. Returns
    /// whether `id` was rejected.
    fn reject_if_hub_full(&mut self, id: ConnId) -> bool {
        let others = self.directory.active_sessions().filter(|s| s.id != id).count();
        if self.config.maxusers == 0 || others < self.config.maxusers {
            return false;
        }

        if let Some(redirect) = self.config.hubredirectwhenfull.clone() {
            if let Some(session) = self.directory.get(id) {
                session.send(format!("$ForceMove {redirect}"));
            }
        } else if let Some(session) = self.directory.get(id) {
            session.send("$HubIsFull");
        }
        if let Some(session) = self.directory.get_mut(id) {
            session.ignoremessages = true;
        }
        true
    }

    fn disconnect(&mut self, id: ConnId) {
        if let Some((session, was_active)) = self.directory.remove(id) {
            info!(id, nick = session.nick(), "connection removed");
            if was_active {
                if let Some(nick) = session.nick() {
                    self.broadcast(format!("$Quit {nick}"));
                }
            }
        }
    }

    fn tick(&mut self, now: Instant) {
        let stale: Vec<ConnId> = self
            .directory
            .ids()
            .into_iter()
            .filter(|&id| {
                self.directory
                    .get(id)
                    .map(|s| s.ignoremessages)
                    .unwrap_or(false)
            })
            .collect();
        for id in stale {
            self.disconnect(id);
        }

        let pingtime = Duration::from_secs(self.config.limits.pingtime);
        let ids = self.directory.ids();
        for id in ids {
            if let Some(session) = self.directory.get(id) {
                if session.login.state() == LoginState::Active
                    && now.duration_since(session.last_activity) >= pingtime
                {
                    session.send("");
                }
            }
        }
    }

    fn reload(&mut self) {
        match Config::load(&self.paths.config) {
            Ok(new_config) => self.config = new_config,
            Err(e) => warn!(error = %e, "failed to reload config"),
        }
        match Accounts::load(&self.paths.accounts) {
            Ok(new_accounts) => self.accounts = new_accounts,
            Err(e) => warn!(error = %e, "failed to reload accounts"),
        }
        match UserCommands::load(&self.paths.usercommands) {
            Ok(new_commands) => self.usercommands = new_commands,
            Err(e) => warn!(error = %e, "failed to reload user commands"),
        }
        self.welcome = crate::welcome::load(&self.paths.welcome);
        info!("hub reloaded");
    }

    fn broadcast(&self, line: impl Into<String>) {
        let line = line.into();
        for session in self.directory.active_sessions() {
            session.send(line.clone());
        }
    }

    /// Queue a decoded frame for processing, discarding the oldest excess
    /// once the backlog exceeds `maxqueuedcommands`. Mirrors the effect of
    /// `hub.py::processcommands`' `del user.incoming[maxqueuedcommands-1:-1]`
    /// truncation, sized against the named flood-shedding scenario (25
    /// frames in, oldest 5 dropped, 20 kept at a limit of 20).
    fn enqueue_frame(&mut self, id: ConnId, raw: String) {
        let max_queued = self.config.limits.maxqueuedcommands;
        let Some(session) = self.directory.get_mut(id) else { return };
        session.queued_commands.push_back(raw);
        if session.queued_commands.len() > max_queued {
            let excess = session.queued_commands.len() - max_queued;
            for _ in 0..excess {
                session.queued_commands.pop_front();
            }
            warn!(id, max_queued, "dropped queued commands exceeding maxqueuedcommands");
        }
    }

    /// Process as many queued frames as `maxcommandspertimeperiod` allows
    /// right now; anything left over stays queued and is retried on the
    /// next frame arrival or tick (`hub.py::commandtimes`' per-period gate,
    /// "the user is skipped this tick" backpressure).
    fn drain_queue(&mut self, id: ConnId, now: Instant) {
        let period = Duration::from_secs(self.config.limits.timeperiod);
        let max_commands = self.config.limits.maxcommandspertimeperiod;
        loop {
            let frame = {
                let Some(session) = self.directory.get_mut(id) else { return };
                if session.windows.commands.would_exceed(now, period, max_commands) {
                    return;
                }
                match session.queued_commands.pop_front() {
                    Some(frame) => {
                        session.windows.commands.push(now);
                        frame
                    }
                    None => return,
                }
            };
            self.handle_frame(id, &frame);
        }
    }

    fn handle_frame(&mut self, id: ConnId, raw: &str) {
        let Some(session) = self.directory.get_mut(id) else { return };
        session.last_activity = Instant::now();
        let state = session.login.state();
        let is_op = session.op;

        let classified = match command::gate(raw, &self.config.limits, state, is_op) {
            Ok(c) => c,
            Err(CommandError::Malformed(_)) => {
                debug!(id, "malformed or forbidden-char frame");
                if state != LoginState::Active {
                    self.disconnect(id);
                }
                return;
            }
            Err(CommandError::Forbidden(name)) => {
                debug!(id, name, "command not permitted in current state");
                return;
            }
            Err(_) => return,
        };

        // Copy out of the borrow before re-borrowing mutably in handlers.
        let classified_owned = match classified {
            Classified::Chat(s) => Classified::Chat(s),
            Classified::PrivateMessage(s) => Classified::PrivateMessage(s),
            Classified::Named { name, args } => Classified::Named { name, args },
            Classified::Empty => Classified::Empty,
        };

        match classified_owned {
            Classified::Empty => {}
            Classified::Chat(raw) => self.on_chat_message(id, raw),
            Classified::PrivateMessage(args) => self.on_private_message(id, args),
            Classified::Named { name, args } => self.dispatch_named(id, name, args),
        }
    }

    fn dispatch_named(&mut self, id: ConnId, name: &str, args: &str) {
        match name {
            "Key" => {}
            "Supports" => self.on_supports(id, args),
            "ValidateNick" => self.on_validate_nick(id, args),
            "MyPass" => self.on_my_pass(id, args),
            "MyINFO" => self.on_my_info(id, args),
            "GetNickList" => self.on_get_nicklist(id),
            "GetINFO" => self.on_get_info(id, args),
            "UserIP" => self.on_user_ip(id, args),
            "Version" => {}
            "Search" => self.on_search(id, args),
            "SR" => self.on_sr(id, args),
            "ConnectToMe" => self.on_connect_to_me(id, args),
            "RevConnectToMe" => self.on_rev_connect_to_me(id, args),
            "Kick" => self.on_kick(id, args),
            "Close" => self.on_close(id, args),
            "OpForceMove" => self.on_op_force_move(id, args),
            "ReloadBots" => {
                // Dynamic bot/plugin loading is out of scope; acknowledge
                // the admin command as a no-op.
                debug!(id, "ReloadBots is a no-op in this build");
            }
            _ => debug!(id, name, "unhandled command"),
        }
    }

    fn on_supports(&mut self, id: ConnId, args: &str) {
        let accepted: Vec<String> = args
            .split_whitespace()
            .filter(|f| HUB_SUPPORTS.contains(f))
            .map(str::to_string)
            .collect();
        if let Some(session) = self.directory.get_mut(id) {
            session.supports = accepted;
            if !HUB_SUPPORTS.is_empty() {
                session.send(format!("$Supports {}", HUB_SUPPORTS.join(" ")));
            }
        }
    }

    /// `hub.py::checkValidateNick`/`gotValidateNick`. Non-account nicks are
    /// collision-checked and reserved in the directory immediately. Account
    /// nicks are never collision-checked here — `self.nicks` (this crate's
    /// `Directory` nick map) only gains an account nick once `$MyPass`
    /// succeeds, so a same-IP attacker can't evict an authenticated session
    /// just by naming its account.
    fn on_validate_nick(&mut self, id: ConnId, nick: &str) {
        if nick.is_empty()
            || nick.len() > self.config.limits.maxnicklength
            || nick.chars().any(command::is_bad_nick_char)
        {
            self.send_validate_denied(id);
            return;
        }

        let account = self.accounts.get(nick).cloned();

        let Some(account) = account else {
            if let Some(owner) = self.directory.nick_owner(nick) {
                if owner != id {
                    let same_ip = self
                        .directory
                        .get(owner)
                        .zip(self.directory.get(id))
                        .map(|(a, b)| a.ip == b.ip)
                        .unwrap_or(false);
                    if same_ip {
                        self.disconnect(owner);
                    } else {
                        if let Some(other) = self.directory.get(owner) {
                            other.send("");
                        }
                        self.send_validate_denied(id);
                        return;
                    }
                }
            }

            self.directory.reserve_nick(nick.to_string(), id);
            if let Some(session) = self.directory.get_mut(id) {
                let actions = session.login.accept_nick(nick.to_string(), false);
                apply_actions(session, actions);
            }
            return;
        };

        if account.password.is_empty() {
            // `gotValidateNick`'s `return self.gotMyPass(user, '')` shortcut.
            self.admit_account_nick(id, nick, account.op);
            if let Some(session) = self.directory.get_mut(id) {
                let actions = session.login.accept_nick(nick.to_string(), false);
                apply_actions(session, actions);
            }
            return;
        }

        if let Some(session) = self.directory.get_mut(id) {
            let actions = session.login.accept_nick(nick.to_string(), true);
            apply_actions(session, actions);
        }
    }

    /// `hub.py::checkMyPass`'s duplicate-login eviction plus `gotMyPass`'s
    /// `$LogedIn`: runs only once the account nick's identity is actually
    /// proven (no password configured, or the password just matched).
    fn admit_account_nick(&mut self, id: ConnId, nick: &str, is_op: bool) {
        if let Some(owner) = self.directory.nick_owner(nick) {
            if owner != id {
                self.disconnect(owner);
            }
        }
        self.directory.reserve_nick(nick.to_string(), id);
        if is_op {
            if let Some(session) = self.directory.get(id) {
                session.send(format!("$LogedIn {nick}"));
            }
        }
    }

    fn send_validate_denied(&mut self, id: ConnId) {
        if let Some(session) = self.directory.get_mut(id) {
            let nick = session.nick().unwrap_or_default().to_string();
            let actions = session.login.reject_nick(&nick);
            apply_actions(session, actions);
        }
        self.disconnect(id);
    }

    fn on_my_pass(&mut self, id: ConnId, password: &str) {
        let Some(session) = self.directory.get(id) else { return };
        let Some(nick) = session.nick().map(str::to_string) else { return };
        let Some(account) = self.accounts.get(&nick).cloned() else { return };

        if password != account.password {
            if let Some(session) = self.directory.get_mut(id) {
                let actions = session.login.reject_pass();
                apply_actions(session, actions);
            }
            self.disconnect(id);
            return;
        }

        self.admit_account_nick(id, &nick, account.op);
        if let Some(session) = self.directory.get_mut(id) {
            let actions = session.login.accept_pass();
            apply_actions(session, actions);
        }
        self.admit_if_ready(id);
    }

    fn on_my_info(&mut self, id: ConnId, args: &str) {
        let Some((nick, description, tag, speed, speedclass, email, sharesize)) = parse_myinfo(args) else {
            self.bad_my_info(id);
            return;
        };

        let own_nick_matches = self.directory.get(id).and_then(Session::nick) == Some(nick.as_str());
        if !own_nick_matches {
            self.bad_my_info(id);
            return;
        }

        let bad_chars = description.chars().chain(tag.chars()).chain(email.chars()).chain(speed.chars())
            .any(|c| command::is_badchar(c as u8) && (c as u32) < 256);
        if bad_chars || sharesize < self.config.limits.minsharesize {
            self.bad_my_info(id);
            return;
        }

        let now = Instant::now();
        let period = Duration::from_secs(self.config.limits.timeperiod);
        let max_myinfo = self.config.limits.maxmyinfopertimeperiod;
        let exceeded = self
            .directory
            .get_mut(id)
            .map(|s| s.windows.myinfo.would_exceed(now, period, max_myinfo))
            .unwrap_or(true);
        if exceeded {
            self.bad_my_info(id);
            return;
        }
        if let Some(session) = self.directory.get_mut(id) {
            session.windows.myinfo.push(now);
            session.description = description;
            session.tag = tag;
            session.speed = speed;
            session.speedclass = speedclass;
            session.email = email;
            session.sharesize = sharesize;
            session.myinfo_cache = format_myinfo(session, &self.config.limits);
        }

        let was_active = self.directory.get(id).map(|s| s.login.state() == LoginState::Active).unwrap_or(false);
        if was_active {
            let myinfo = self.directory.get(id).map(|s| s.myinfo_cache.clone()).unwrap_or_default();
            self.broadcast(myinfo);
        } else {
            self.admit_if_ready(id);
        }
    }

    /// `hub.py::badMyINFO`: any rejected `$MyINFO` (parse failure, nick
    /// mismatch, bad characters, or rate limit) removes the connection if
    /// it hasn't logged in yet; once active, a bad `MyINFO` is just dropped.
    fn bad_my_info(&mut self, id: ConnId) {
        if self.directory.get(id).map(|s| s.login.state() != LoginState::Active).unwrap_or(false) {
            self.disconnect(id);
        }
    }

    fn admit_if_ready(&mut self, id: ConnId) {
        let newly_admitted = if let Some(session) = self.directory.get_mut(id) {
            let actions = session.login.admit();
            !actions.is_empty()
        } else {
            false
        };
        if newly_admitted {
            self.login_user(id);
        }
    }

    /// `hub.py::loginuser`: full admission sequence once `$MyINFO` arrives.
    fn login_user(&mut self, id: ConnId) {
        if self.reject_if_hub_full(id) {
            return;
        }

        let nick = match self.directory.get(id).and_then(Session::nick) {
            Some(n) => n.to_string(),
            None => return,
        };

        self.broadcast(format!("$Hello {nick}"));

        let myinfo = self.directory.get(id).map(|s| s.myinfo_cache.clone()).unwrap_or_default();
        let all_myinfo: String = self
            .directory
            .active_sessions()
            .filter(|s| s.id != id)
            .map(|s| s.myinfo_cache.clone())
            .collect::<Vec<_>>()
            .join("");
        if let Some(session) = self.directory.get(id) {
            session.send(all_myinfo + &myinfo);
        }
        self.broadcast(myinfo);

        let should_send_nicklist = self.directory.get(id).map(|s| s.given_nicklist).unwrap_or(false);
        if should_send_nicklist {
            self.send_nicklist(id);
            self.send_oplist(id);
            if let Some(session) = self.directory.get_mut(id) {
                session.given_nicklist = false;
            }
        }

        if let Some(account) = self.accounts.get(&nick).cloned() {
            if account.op {
                self.directory.set_op(id, true);
                self.broadcast(self.oplist_message());
            }
        }
        if !self.directory.op_nicks().is_empty() {
            self.send_oplist(id);
        }

        let ip = self.directory.get(id).map(|s| s.ip);
        if let Some(ip) = ip {
            let lines = crate::welcome::greeting_lines(&nick, ip, &self.welcome);
            if let Some(session) = self.directory.get(id) {
                for line in lines {
                    session.send(line);
                }
            }
        }

        let is_op = self.directory.is_op(id);
        let account_name = self.directory.get(id).and_then(|_| Some(nick.clone()));
        let usercommand_menu = self.usercommands.all_for(true, is_op, account_name.as_deref(), &self.accounts);
        if let Some(session) = self.directory.get(id) {
            if session.supports.iter().any(|f| f == "UserCommand") {
                session.send(usercommand_menu);
            }
        }

        info!(id, nick, "user logged in");
    }

    fn oplist_message(&self) -> String {
        let ops = self.directory.op_nicks();
        if ops.is_empty() {
            "$OpList ".to_string()
        } else {
            format!("$OpList {}$$", ops.join("$$"))
        }
    }

    fn send_oplist(&self, id: ConnId) {
        if let Some(session) = self.directory.get(id) {
            session.send(self.oplist_message());
        }
    }

    fn send_nicklist(&self, id: ConnId) {
        let nicks = self.directory.active_nicks();
        let message = if nicks.is_empty() {
            "$NickList ".to_string()
        } else {
            format!("$NickList {}$$", nicks.join("$$"))
        };
        if let Some(session) = self.directory.get(id) {
            session.send(message);
        }
    }

    fn on_get_nicklist(&mut self, id: ConnId) {
        let active = self.directory.get(id).map(|s| s.login.state() == LoginState::Active).unwrap_or(false);
        if active {
            self.send_nicklist(id);
            if !self.directory.op_nicks().is_empty() {
                self.send_oplist(id);
            }
        } else if let Some(session) = self.directory.get_mut(id) {
            session.given_nicklist = true;
        }
    }

    fn on_get_info(&mut self, id: ConnId, args: &str) {
        let Some(target_nick) = args.split(' ').last().filter(|s| !s.is_empty()) else { return };
        let Some(target_id) = self.directory.nick_owner(target_nick) else { return };
        let myinfo = self.directory.get(target_id).map(|s| s.myinfo_cache.clone()).unwrap_or_default();
        self.broadcast(myinfo);
    }

    fn on_user_ip(&mut self, id: ConnId, nick: &str) {
        let Some(requestor) = self.directory.get(id) else { return };
        let is_op = requestor.op;
        let self_nick = requestor.nick().map(str::to_string);
        if !is_op && self_nick.as_deref() != Some(nick) {
            return;
        }
        let Some(target_id) = self.directory.nick_owner(nick) else { return };
        let ip = self.directory.get(target_id).map(|s| s.ip);
        if let (Some(session), Some(ip)) = (self.directory.get(id), ip) {
            session.send(format!("$UserIP {nick} {ip}$$"));
        }
    }

    fn on_search(&mut self, id: ConnId, args: &str) {
        if args.len() > self.config.limits.maxsearchsize {
            return;
        }
        let Some((host, rest)) = args.split_once(' ') else { return };
        let parts: Vec<&str> = rest.splitn(5, '?').collect();
        let (sizerestricted, isminimumsize, size, datatype, pattern) = match parts.as_slice() {
            [a, b, c, d, e] => (*a, *b, *c, *d, *e),
            _ => return,
        };
        if datatype.parse::<u8>().map(|d| d > 9).unwrap_or(true) {
            return;
        }
        if !matches!(sizerestricted, "F" | "T") || !matches!(isminimumsize, "F" | "T") {
            return;
        }
        if size.parse::<i64>().is_err() {
            return;
        }
        if pattern.contains(' ') {
            return;
        }

        let nick = self.directory.get(id).and_then(Session::nick).map(str::to_string);
        let is_self_host = host.strip_prefix("Hub:").map(|n| Some(n) == nick.as_deref()).unwrap_or(true);
        if host.starts_with("Hub:") && !is_self_host {
            return;
        }

        let now = Instant::now();
        let period = Duration::from_secs(self.config.limits.timeperiod);
        let max_searches = self.config.limits.maxsearchespertimeperiod;
        let exceeded = self
            .directory
            .get_mut(id)
            .map(|s| s.windows.searches.would_exceed(now, period, max_searches))
            .unwrap_or(true);
        if exceeded {
            return;
        }
        if let Some(session) = self.directory.get_mut(id) {
            session.windows.searches.push(now);
        }

        self.broadcast(format!("$Search {host} {sizerestricted}?{isminimumsize}?{size}?{datatype}?{pattern}"));
    }

    fn on_sr(&mut self, id: ConnId, args: &str) {
        let parts: Vec<&str> = args.split('\u{5}').collect();
        if parts.len() < 3 || parts.len() > 4 {
            return;
        }
        let Some((nick, path)) = parts[0].split_once(' ') else { return };
        let own_nick = self.directory.get(id).and_then(Session::nick);
        if own_nick != Some(nick) {
            return;
        }

        let (slots_segment_index, filesize, freeslots, totalslots) = if parts.len() == 4 {
            let Some((fs, rest)) = parts[1].split_once(' ') else { return };
            let Some((free, total)) = rest.split_once('/') else { return };
            let (Ok(fs), Ok(free), Ok(total)) = (fs.parse::<u64>(), free.parse::<u32>(), total.parse::<u32>()) else { return };
            (2usize, fs, free, total)
        } else {
            (1usize, 0, 0, 0)
        };

        let hub_segment = parts[slots_segment_index];
        let Some((hubname, hubhost_bracketed)) = hub_segment.rsplit_once(' ') else { return };
        if !hubhost_bracketed.starts_with('(') || !hubhost_bracketed.ends_with(')') {
            return;
        }
        let hubhost = &hubhost_bracketed[1..hubhost_bracketed.len() - 1];
        let requestor = parts[slots_segment_index + 1];

        let Some(requestor_id) = self.directory.nick_owner(requestor) else { return };
        let message = format!(
            "$SR {nick} {path}\u{5}{filesize} {freeslots}/{totalslots}\u{5}{hubname} ({hubhost})"
        );
        if let Some(session) = self.directory.get(requestor_id) {
            session.send(message);
        }
    }

    fn on_connect_to_me(&mut self, id: ConnId, args: &str) {
        let Some((nick, host)) = args.split_once(' ') else { return };
        let Some((ip, port)) = host.split_once(':') else { return };
        let Some(target_id) = self.directory.nick_owner(nick) else { return };
        let sender_nick = self.directory.get(id).and_then(Session::nick).map(str::to_string);
        let Some(sender_nick) = sender_nick else { return };
        if let Some(session) = self.directory.get(target_id) {
            session.send(format!("$ConnectToMe {nick} {ip}:{port}"));
        }
        let _ = sender_nick;
    }

    fn on_rev_connect_to_me(&mut self, id: ConnId, args: &str) {
        let Some((sender, receiver)) = args.split_once(' ') else { return };
        let own_nick = self.directory.get(id).and_then(Session::nick);
        if own_nick != Some(sender) {
            return;
        }
        let Some(receiver_id) = self.directory.nick_owner(receiver) else { return };
        if let Some(session) = self.directory.get(receiver_id) {
            session.send(format!("$RevConnectToMe {sender} {receiver}"));
        }
    }

    fn on_chat_message(&mut self, id: ConnId, raw: &str) {
        let Some(rest) = raw.strip_prefix('<') else { return };
        let Some((nick, message)) = rest.split_once("> ") else { return };
        let own_nick = self.directory.get(id).and_then(Session::nick);
        if own_nick != Some(nick) {
            return;
        }

        let limits = self.config.limits.clone();
        if message.len() > limits.maxmessagesize {
            return;
        }
        let newlines = message.matches('\n').count().max(message.matches('\r').count());
        if newlines > limits.maxnewlinespermessage {
            return;
        }

        let now = Instant::now();
        let period = Duration::from_secs(limits.timeperiod);
        let Some(session) = self.directory.get_mut(id) else { return };
        session.windows.messages.prune(now, period);
        session.windows.characters.prune(now, period);
        session.windows.newlines.prune(now, period);
        if session.windows.messages.len() >= limits.maxmessagespertimeperiod
            || session.windows.characters.len() + message.len() >= limits.maxcharacterspertimeperiod
            || session.windows.newlines.len() + newlines >= limits.maxnewlinespertimeperiod
        {
            return;
        }
        session.windows.messages.push(now);
        for _ in 0..message.len() {
            session.windows.characters.push(now);
        }
        for _ in 0..newlines {
            session.windows.newlines.push(now);
        }

        self.broadcast(format_chat_line(nick, message));
    }

    fn on_private_message(&mut self, id: ConnId, args: &str) {
        let Some((sentto, rest)) = args.split_once(" From: ") else { return };
        let Some((sentfrom, rest)) = rest.split_once(' ') else { return };
        let Some(message) = rest.strip_prefix('$').and_then(|r| r.split_once("> ")).map(|(_, m)| m) else { return };

        let own_nick = self.directory.get(id).and_then(Session::nick);
        if own_nick != Some(sentfrom) {
            return;
        }
        let Some(target_id) = self.directory.nick_owner(sentto) else { return };
        if let Some(session) = self.directory.get(target_id) {
            let body = format_chat_line(sentfrom, message);
            session.send(format!("$To: {sentto} From: {sentfrom} ${body}"));
        }
    }

    fn on_kick(&mut self, id: ConnId, nick: &str) {
        if !self.directory.is_op(id) {
            return;
        }
        if let Some(target_id) = self.directory.nick_owner(nick) {
            self.disconnect(target_id);
        }
    }

    fn on_close(&mut self, id: ConnId, nick: &str) {
        if !self.directory.is_op(id) {
            return;
        }
        if let Some(target_id) = self.directory.nick_owner(nick) {
            self.disconnect(target_id);
        }
    }

    fn on_op_force_move(&mut self, id: ConnId, args: &str) {
        if !self.directory.is_op(id) {
            return;
        }
        let parts: Vec<&str> = args.splitn(4, '$').collect();
        if parts.len() != 4 {
            return;
        }
        let nick = parts[1].trim_start_matches("Nick:");
        let where_to = parts[2].trim_start_matches("Where:");
        let message = parts[3].trim_start_matches("Msg:");

        let operator_nick = self.directory.get(id).and_then(Session::nick).map(str::to_string).unwrap_or_default();
        let Some(target_id) = self.directory.nick_owner(nick) else { return };
        if let Some(session) = self.directory.get(target_id) {
            session.send(format!(
                "$ForceMove {where_to}|$To: {nick} From: {operator_nick} $<{operator_nick}> You are being redirected to {where_to} because: {message}"
            ));
        }
        if let Some(session) = self.directory.get_mut(target_id) {
            session.ignoremessages = true;
        }
    }
}

/// `hub.py`'s `handleslashme` rewrite: a message starting with `/me` or
/// `+me` becomes an action line (`* nick rest`) instead of plain chat
/// (`<nick> message`), used identically for public and private messages.
fn format_chat_line(nick: &str, message: &str) -> String {
    if let Some(rest) = message.strip_prefix("/me").or_else(|| message.strip_prefix("+me")) {
        format!("* {nick}{rest}")
    } else {
        format!("<{nick}> {message}")
    }
}

fn apply_actions(session: &Session, actions: Vec<LoginAction>) {
    for action in actions {
        match action {
            LoginAction::Send(line) => session.send(line),
            LoginAction::Admit | LoginAction::Reject => {}
        }
    }
}

/// `$MyINFO $ALL nick description<tag>$ $speedSPEEDCLASS$email$sharesize$`
fn parse_myinfo(args: &str) -> Option<(String, String, String, String, u8, String, u64)> {
    let rest = args.strip_prefix("$ALL ")?;
    let (nick, rest) = rest.split_once(' ')?;
    let fields: Vec<&str> = rest.splitn(6, '$').collect();
    if fields.len() < 5 {
        return None;
    }
    let mut description = fields[0].to_string();
    let mut tag = String::new();
    if description.ends_with('>') {
        if let Some(start) = description.rfind('<') {
            tag = description[start..].to_string();
            description.truncate(start);
        }
    }
    let speed_field = fields[2];
    if speed_field.is_empty() {
        return None;
    }
    let speedclass = speed_field.as_bytes()[speed_field.len() - 1];
    let speed = speed_field[..speed_field.len() - 1].to_string();
    let email = fields[3].to_string();
    let sharesize: u64 = fields[4].parse().ok()?;

    Some((nick.to_string(), description, tag, speed, speedclass, email, sharesize))
}

/// `hub.py::formatMyINFO`, truncating tag/description/email to their
/// configured limits.
fn format_myinfo(session: &Session, limits: &crate::limits::Limits) -> String {
    let nick = session.nick().unwrap_or_default();
    let description: String = session.description.chars().take(limits.maxdescriptionlength).collect();
    let mut tag = session.tag.clone();
    if tag.len() > limits.maxtaglength {
        let truncated: String = tag.chars().take(limits.maxtaglength.saturating_sub(1)).collect();
        tag = format!("{truncated}>");
    }
    let email: String = session.email.chars().take(limits.maxemaillength).collect();
    format!(
        "$MyINFO $ALL {nick} {description}{tag}$ ${}{}${email}${}$",
        session.speed,
        session.speedclass as char,
        session.sharesize
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_hub() -> Hub {
        Hub::new(
            Config::default(),
            Accounts::new(),
            UserCommands::new(),
            String::new(),
            HubPaths {
                config: PathBuf::new(),
                accounts: PathBuf::new(),
                usercommands: PathBuf::new(),
                welcome: PathBuf::new(),
            },
        )
    }

    fn connect(hub: &mut Hub, ip: IpAddr) -> (ConnId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = hub.connect(ip, tx);
        (id, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            out.push(line);
        }
        out
    }

    #[test]
    fn parse_myinfo_extracts_tag_from_description() {
        let parsed = parse_myinfo("$ALL alice some desc<++ V:1.0>$ $5$me@example.com$1000$").unwrap();
        assert_eq!(parsed.0, "alice");
        assert_eq!(parsed.1, "some desc");
        assert_eq!(parsed.2, "<++ V:1.0>");
        assert_eq!(parsed.3, "");
        assert_eq!(parsed.4, b'5');
        assert_eq!(parsed.5, "me@example.com");
        assert_eq!(parsed.6, 1000);
    }

    #[test]
    fn full_login_flow_without_account_reaches_active() {
        use std::net::{IpAddr, Ipv4Addr};
        let mut hub = test_hub();
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let (id, mut rx) = connect(&mut hub, ip);
        drain(&mut rx);

        hub.handle_frame(id, "$ValidateNick alice");
        let sent = drain(&mut rx);
        assert!(sent.iter().any(|l| l == "$Hello alice"));

        hub.handle_frame(id, "$MyINFO $ALL alice desc$ $5$email$100$");
        let sent = drain(&mut rx);
        assert!(sent.iter().any(|l| l.starts_with("$Hello alice")));
        assert_eq!(hub.directory.get(id).unwrap().login.state(), LoginState::Active);
    }

    #[test]
    fn duplicate_nick_different_ip_is_denied() {
        use std::net::{IpAddr, Ipv4Addr};
        let mut hub = test_hub();
        let ip1 = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let ip2 = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2));
        let (id1, mut rx1) = connect(&mut hub, ip1);
        drain(&mut rx1);
        hub.handle_frame(id1, "$ValidateNick alice");
        drain(&mut rx1);

        let (id2, mut rx2) = connect(&mut hub, ip2);
        drain(&mut rx2);
        hub.handle_frame(id2, "$ValidateNick alice");
        let sent = drain(&mut rx2);
        assert!(sent.iter().any(|l| l.starts_with("$ValidateDenide")));
        assert!(hub.directory.get(id2).is_none());
    }

    #[test]
    fn duplicate_nick_same_ip_evicts_old_session() {
        use std::net::{IpAddr, Ipv4Addr};
        let mut hub = test_hub();
        hub.config.joinfloodtime = 0; // two connects from one IP are the point of this test
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let (id1, mut rx1) = connect(&mut hub, ip);
        drain(&mut rx1);
        hub.handle_frame(id1, "$ValidateNick alice");
        drain(&mut rx1);

        let (id2, mut rx2) = connect(&mut hub, ip);
        drain(&mut rx2);
        hub.handle_frame(id2, "$ValidateNick alice");
        drain(&mut rx2);

        assert!(hub.directory.get(id1).is_none());
        assert_eq!(hub.directory.nick_owner("alice"), Some(id2));
    }

    #[test]
    fn chat_message_broadcast_to_active_users() {
        use std::net::{IpAddr, Ipv4Addr};
        let mut hub = test_hub();
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let (id, mut rx) = connect(&mut hub, ip);
        drain(&mut rx);
        hub.handle_frame(id, "$ValidateNick alice");
        drain(&mut rx);
        hub.handle_frame(id, "$MyINFO $ALL alice desc$ $5$email$100$");
        drain(&mut rx);

        hub.handle_frame(id, "<alice> hello everyone");
        let sent = drain(&mut rx);
        assert!(sent.contains(&"<alice> hello everyone".to_string()));
    }

    #[test]
    fn rapid_reconnect_from_same_ip_is_join_flood_rejected() {
        use std::net::{IpAddr, Ipv4Addr};
        let mut hub = test_hub();
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

        let (_id1, mut rx1) = connect(&mut hub, ip);
        assert!(drain(&mut rx1).iter().any(|l| l.starts_with("$Lock")));

        let (id2, mut rx2) = connect(&mut hub, ip);
        assert!(drain(&mut rx2).is_empty());
        assert!(hub.directory.get(id2).is_none());
    }

    #[test]
    fn queued_frames_trim_to_max_queued_commands() {
        use std::net::{IpAddr, Ipv4Addr};
        let mut hub = test_hub();
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let (id, mut rx) = connect(&mut hub, ip);
        drain(&mut rx);

        let max_queued = hub.config.limits.maxqueuedcommands;
        for i in 0..max_queued + 5 {
            hub.enqueue_frame(id, format!("cmd{i}"));
        }

        let queued = &hub.directory.get(id).unwrap().queued_commands;
        assert_eq!(queued.len(), max_queued);
        assert_eq!(queued.front().unwrap(), "cmd5");
        assert_eq!(queued.back().unwrap(), &format!("cmd{}", max_queued + 4));
    }

    #[test]
    fn command_rate_limit_defers_excess_to_a_later_drain() {
        use std::net::{IpAddr, Ipv4Addr};
        let mut hub = test_hub();
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let (id, mut rx) = connect(&mut hub, ip);
        drain(&mut rx);

        let max_commands = hub.config.limits.maxcommandspertimeperiod;
        for i in 0..max_commands + 3 {
            hub.enqueue_frame(id, format!("$Version {i}"));
        }

        let now = Instant::now();
        hub.drain_queue(id, now);
        assert_eq!(hub.directory.get(id).unwrap().queued_commands.len(), 3);
        assert_eq!(hub.directory.get(id).unwrap().windows.commands.len(), max_commands);

        let later = now + Duration::from_secs(hub.config.limits.timeperiod + 1);
        hub.drain_queue(id, later);
        assert!(hub.directory.get(id).unwrap().queued_commands.is_empty());
    }

    #[test]
    fn kick_requires_op() {
        use std::net::{IpAddr, Ipv4Addr};
        let mut hub = test_hub();
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let (id, mut rx) = connect(&mut hub, ip);
        drain(&mut rx);
        hub.handle_frame(id, "$ValidateNick alice");
        drain(&mut rx);
        hub.handle_frame(id, "$MyINFO $ALL alice desc$ $5$email$100$");
        drain(&mut rx);

        hub.on_kick(id, "alice");
        assert!(hub.directory.get(id).is_some());
    }
}
