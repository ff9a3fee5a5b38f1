//! User command menu entries: `[dchub-usercommands]`, one
//! `name = permission position type context command` line, straight from
//! `hub.py::loadusercommands`'s `value.split(' ', 4)` layout.

use std::collections::HashMap;
use std::path::Path;

use ini::Ini;

use crate::accounts::Accounts;
use crate::error::ConfigError;

/// Permission bit meanings, from `getusercommand`: bit 0 = any logged-in
/// user, bit 1 = ops only, bit 2 = account `args` must name the command,
/// bit 3 = bots only.
pub mod permission_bits {
    pub const ANY_USER: u32 = 1;
    pub const OP: u32 = 2;
    pub const ACCOUNT_ARGS: u32 = 4;
    pub const BOT: u32 = 8;
}

/// One entry from `[dchub-usercommands]`. `command` is the fully-formatted
/// `$UserCommand type context text|` payload, with `$` and `|` inside the
/// raw command text already escaped as `&#36;` / `&#124;`, exactly as
/// `loadusercommands` pre-renders it.
#[derive(Debug, Clone, PartialEq)]
pub struct UserCommand {
    pub name: String,
    pub permission: u32,
    pub position: f64,
    pub command: String,
}

/// The hub's user command menu.
#[derive(Debug, Clone, Default)]
pub struct UserCommands {
    by_name: HashMap<String, UserCommand>,
}

impl UserCommands {
    pub fn new() -> Self {
        UserCommands::default()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut commands = UserCommands::new();
        if !path.exists() {
            return Ok(commands);
        }

        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;

        if let Some(section) = ini.section(Some("dchub-usercommands")) {
            for (key, value) in section.iter() {
                let mut parts = value.splitn(5, ' ');
                let permission = parts.next();
                let position = parts.next();
                let cmd_type = parts.next();
                let context = parts.next();
                let text = parts.next();
                let (permission, position, cmd_type, context, text) =
                    match (permission, position, cmd_type, context, text) {
                        (Some(p), Some(pos), Some(t), Some(c), Some(text)) => (p, pos, t, c, text),
                        _ => {
                            tracing::warn!(key, "malformed usercommand entry, skipping");
                            continue;
                        }
                    };

                let permission: u32 = match permission.parse() {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                let position: f64 = position.parse().unwrap_or(0.0);

                let escaped = text.replace('$', "&#36;").replace('|', "&#124;");
                let command = format!("$UserCommand {cmd_type} {context} {escaped}|");

                commands.by_name.insert(
                    key.to_string(),
                    UserCommand {
                        name: key.to_string(),
                        permission,
                        position,
                        command,
                    },
                );
            }
        }

        Ok(commands)
    }

    /// One command's gated text for a given user, or empty if they lack the
    /// required permission bit. Mirrors `getusercommand`.
    pub fn command_for(
        &self,
        name: &str,
        is_logged_in: bool,
        is_op: bool,
        is_bot_name: bool,
        account: Option<&str>,
        accounts: &Accounts,
    ) -> String {
        let Some(cmd) = self.by_name.get(name) else {
            return String::new();
        };
        self.gate(cmd, is_logged_in, is_op, is_bot_name, account, accounts)
    }

    /// All commands concatenated as `$UserCommand 255 7 |` followed by each
    /// gated command's text, matching `getusercommands`.
    pub fn all_for(
        &self,
        is_logged_in: bool,
        is_op: bool,
        account: Option<&str>,
        accounts: &Accounts,
    ) -> String {
        let mut commands: Vec<&UserCommand> = self.by_name.values().collect();
        commands.sort_by(|a, b| a.position.partial_cmp(&b.position).unwrap_or(std::cmp::Ordering::Equal));

        let mut message = "$UserCommand 255 7 |".to_string();
        for cmd in commands {
            message.push_str(&self.gate(cmd, is_logged_in, is_op, false, account, accounts));
        }
        message
    }

    fn gate(
        &self,
        cmd: &UserCommand,
        is_logged_in: bool,
        is_op: bool,
        is_bot_name: bool,
        account: Option<&str>,
        accounts: &Accounts,
    ) -> String {
        use permission_bits::*;
        let name = cmd.name.split('$').next().unwrap_or(&cmd.name);

        if cmd.permission & BOT != 0 && !is_bot_name {
            return String::new();
        }
        if cmd.permission & ACCOUNT_ARGS != 0 {
            let allowed = account
                .and_then(|n| accounts.get(n))
                .map(|a| a.args.contains(name))
                .unwrap_or(false);
            if !allowed {
                return String::new();
            }
        }
        if cmd.permission & OP != 0 && !is_op {
            return String::new();
        }
        if cmd.permission & ANY_USER != 0 && !is_logged_in {
            return String::new();
        }
        cmd.command.clone()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
