//! Registered accounts: `[dchub-accounts]`, one `nick = password|op|args`
//! line per account, straight from `hub.py::loadaccounts`'s
//! `value.split('|', 2)` layout. `op` is truthy on `y`, `t`, or `1`
//! (case-insensitive), matching `truebools = 'yt1'`.

use std::collections::HashMap;
use std::path::Path;

use ini::Ini;

use crate::config::write_ini_atomically;
use crate::error::ConfigError;

/// One entry from `[dchub-accounts]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub password: String,
    pub op: bool,
    /// Raw `usercommand` permission-arg string, matched against command
    /// names the way `getusercommand`'s `args.find(name)` does.
    pub args: String,
}

/// All registered accounts, keyed by nick.
#[derive(Debug, Clone, Default)]
pub struct Accounts {
    by_nick: HashMap<String, Account>,
}

impl Accounts {
    pub fn new() -> Self {
        Accounts::default()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut accounts = Accounts::new();
        if !path.exists() {
            return Ok(accounts);
        }

        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;

        if let Some(section) = ini.section(Some("dchub-accounts")) {
            for (key, value) in section.iter() {
                let mut parts = value.splitn(3, '|');
                let password = parts.next().unwrap_or("").to_string();
                let op_raw = parts.next().unwrap_or("");
                let args = parts.next().unwrap_or("").to_string();
                let op = matches!(op_raw.to_lowercase().as_str(), "y" | "t" | "1");
                accounts.by_nick.insert(
                    key.to_string(),
                    Account {
                        name: key.to_string(),
                        password,
                        op,
                        args,
                    },
                );
            }
        }

        Ok(accounts)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let mut ini = if path.exists() {
            Ini::load_from_file(path).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                source: e,
            })?
        } else {
            Ini::new()
        };

        for (nick, account) in &self.by_nick {
            let op_flag = if account.op { "1" } else { "0" };
            let value = format!("{}|{}|{}", account.password, op_flag, account.args);
            ini.with_section(Some("dchub-accounts")).set(nick, value);
        }

        write_ini_atomically(&ini, path)
    }

    pub fn get(&self, nick: &str) -> Option<&Account> {
        self.by_nick.get(nick)
    }

    pub fn set(&mut self, account: Account) {
        self.by_nick.insert(account.name.clone(), account);
    }

    pub fn remove(&mut self, nick: &str) -> Option<Account> {
        self.by_nick.remove(nick)
    }

    pub fn len(&self) -> usize {
        self.by_nick.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_nick.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    #[test]
    fn missing_file_is_empty() {
        let accounts = Accounts::load(Path::new("/nonexistent/accounts")).unwrap();
        assert!(accounts.is_empty());
    }

    #[test]
    fn parses_password_op_args_layout() {
        let dir = std::env::temp_dir().join(format!("dchub-accounts-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("accounts");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[dchub-accounts]\nalice = secret|1|kick close\nbob = hunter2|0|"
        )
        .unwrap();

        let accounts = Accounts::load(&path).unwrap();
        let alice = accounts.get("alice").unwrap();
        assert_eq!(alice.password, "secret");
        assert!(alice.op);
        assert_eq!(alice.args, "kick close");

        let bob = accounts.get("bob").unwrap();
        assert!(!bob.op);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn op_truthiness_is_case_insensitive() {
        let dir = std::env::temp_dir().join(format!("dchub-accounts-test2-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("accounts");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "[dchub-accounts]\nalice = secret|Y|").unwrap();

        let accounts = Accounts::load(&path).unwrap();
        assert!(accounts.get("alice").unwrap().op);
        fs::remove_dir_all(dir).ok();
    }
}
