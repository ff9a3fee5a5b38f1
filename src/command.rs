//! Command classification, length/charset validation, and privilege gating.
//!
//! Three independent checks precede dispatch in `hub.py::processcommand`:
//! `badcommand` (length + forbidden bytes), `getcommandtype` (name/args
//! split), and `badprivileges` (name in the sender's `validcommands` set).
//! This module implements all three as free functions the `Hub` actor calls
//! before running a handler, keeping parsing/validation free of directory
//! side effects and independently testable.

use std::collections::HashSet;

use crate::error::CommandError;
use crate::limits::Limits;
use crate::session::LoginState;

/// Control bytes forbidden everywhere except inside the few commands that
/// are known to embed them on the wire (`$Key`, `$MyINFO`, `$SR`).
/// `chr(0..=8) + chr(11) + chr(12) + chr(14..=31) + chr(127)` from
/// `hub.py::setupdefaults`. Notably this *includes* byte 5 (`\x05`), the
/// separator `$SR` uses — `badsrchars` is this set with byte 5 removed.
pub fn is_badchar(b: u8) -> bool {
    matches!(b, 0..=8 | 11 | 12 | 14..=31 | 127)
}

pub fn is_bad_sr_char(b: u8) -> bool {
    b != 5 && is_badchar(b)
}

/// Characters forbidden in a nick: `$<>% \t\n\r`.
pub fn is_bad_nick_char(c: char) -> bool {
    matches!(c, '$' | '<' | '>' | '%' | ' ' | '\t' | '\n' | '\r')
}

/// Length and forbidden-byte validation, with `$Key`/`$MyINFO`/`$SR`
/// carve-outs exactly matching `hub.py::badcommand`.
pub fn badcommand(raw: &str, limits: &Limits) -> bool {
    if raw.len() > limits.maxcommandsize {
        return true;
    }
    if raw.starts_with("$Key ") {
        return false;
    }
    if raw.starts_with("$MyINFO $ALL ") {
        // One forbidden byte is tolerated (MyINFO's speedclass byte);
        // checkMyINFO rejects bad content in the parsed fields afterward.
        let mut seen_one = false;
        for &b in raw.as_bytes() {
            if is_badchar(b) {
                if seen_one {
                    return true;
                }
                seen_one = true;
            }
        }
        return false;
    }
    let checker: fn(u8) -> bool = if raw.starts_with("$SR ") {
        is_bad_sr_char
    } else {
        is_badchar
    };
    raw.bytes().any(checker)
}

/// A classified command frame, mirroring `getcommandtype`'s
/// name/argument split. Chat and private-message frames get their own
/// variants since they aren't `$Name`-shaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified<'a> {
    /// `<nick> message text`, the raw frame verbatim.
    Chat(&'a str),
    /// `$To: nick From: from $<from> message` — args after `$To: `.
    PrivateMessage(&'a str),
    /// `$Name arg1 arg2 ...` — name with leading `$` stripped, plus the
    /// remainder of the line after the first space (empty if none).
    Named { name: &'a str, args: &'a str },
    /// Empty frame (a bare `|`), which the hub treats as a keepalive ack.
    Empty,
}

pub fn classify(raw: &str) -> Classified<'_> {
    if raw.is_empty() {
        return Classified::Empty;
    }
    if !raw.starts_with('$') {
        if raw.starts_with('<') {
            return Classified::Chat(raw);
        }
        return Classified::Named { name: "", args: "" };
    }
    let rest = &raw[1..];
    let (name, args) = match rest.split_once(' ') {
        Some((n, a)) => (n, a),
        None => (rest, ""),
    };
    if name == "To:" {
        Classified::PrivateMessage(args)
    } else {
        Classified::Named { name, args }
    }
}

/// The set of command names a session may currently invoke, by login
/// phase, matching `DCHubClient.validcommands`'s successive reassignments
/// in `hub.py` (initial `{Key, Supports, ValidateNick}`, then
/// `{MyPass}` while awaiting a password, then `{Version, GetNickList,
/// MyINFO}` while awaiting `$MyINFO`, then the full logged-in set).
pub fn valid_commands(state: LoginState, is_op: bool) -> HashSet<&'static str> {
    let mut set: HashSet<&'static str> = match state {
        LoginState::New => ["Key", "Supports", "ValidateNick"].into_iter().collect(),
        LoginState::AwaitingPass => ["MyPass"].into_iter().collect(),
        LoginState::AwaitingMyInfo => ["Version", "GetNickList", "MyINFO"].into_iter().collect(),
        LoginState::Active => [
            "_ChatMessage",
            "_PrivateMessage",
            "MyINFO",
            "GetINFO",
            "GetNickList",
            "Search",
            "SR",
            "ConnectToMe",
            "RevConnectToMe",
            "UserIP",
        ]
        .into_iter()
        .collect(),
        LoginState::Closed => HashSet::new(),
    };
    if state == LoginState::Active && is_op {
        set.extend(["OpForceMove", "Kick", "Close", "ReloadBots"]);
    }
    set
}

/// `hub.py::badprivileges`: is `name` outside the sender's current
/// command set?
pub fn badprivileges(name: &str, state: LoginState, is_op: bool) -> bool {
    !valid_commands(state, is_op).contains(name)
}

/// Run the three pre-dispatch gates in order, producing the first
/// applicable [`CommandError`] if any fails.
pub fn gate<'a>(raw: &'a str, limits: &Limits, state: LoginState, is_op: bool) -> Result<Classified<'a>, CommandError> {
    if badcommand(raw, limits) {
        return Err(CommandError::Malformed(raw.to_string()));
    }
    let classified = classify(raw);
    let name = match &classified {
        Classified::Chat(_) => "_ChatMessage",
        Classified::PrivateMessage(_) => "_PrivateMessage",
        Classified::Named { name, .. } => name,
        Classified::Empty => return Ok(classified),
    };
    if badprivileges(name, state, is_op) {
        return Err(CommandError::Forbidden(leak_name(name)));
    }
    Ok(classified)
}

/// Privilege errors carry a `&'static str` command name for cheap cloning;
/// leak a small, bounded set of known names rather than threading a
/// lifetime through `CommandError`. Unknown names fall back to a shared
/// placeholder since they were already going to be rejected regardless.
fn leak_name(name: &str) -> &'static str {
    match name {
        "Key" => "Key",
        "Supports" => "Supports",
        "ValidateNick" => "ValidateNick",
        "MyPass" => "MyPass",
        "Version" => "Version",
        "GetNickList" => "GetNickList",
        "MyINFO" => "MyINFO",
        "GetINFO" => "GetINFO",
        "Search" => "Search",
        "SR" => "SR",
        "ConnectToMe" => "ConnectToMe",
        "RevConnectToMe" => "RevConnectToMe",
        "UserIP" => "UserIP",
        "OpForceMove" => "OpForceMove",
        "Kick" => "Kick",
        "Close" => "Close",
        "ReloadBots" => "ReloadBots",
        _ => "<command>",
    }
}
