//! Hub configuration: `[dchub]` and `[dchub-userlimits]` sections.
//!
//! Loading and the atomic rewrite dance follow `hub.py::loadconfig` and
//! `writefile`: write to `<path>.new`, rename the existing file to
//! `<path>.old`, rename `<path>.new` into place, then drop `<path>.old`.

use std::fs;
use std::path::{Path, PathBuf};

use ini::Ini;

use crate::error::ConfigError;
use crate::limits::Limits;

/// Top-level `[dchub]` settings plus the `[dchub-userlimits]` overrides.
#[derive(Debug, Clone)]
pub struct Config {
    pub hubname: String,
    pub hubdescription: String,
    pub hubhost: String,
    pub port: u16,
    pub maxusers: usize,
    pub welcomefile: Option<PathBuf>,
    /// Redirect target sent as `$ForceMove` when the hub is full. Empty
    /// means send `$HubIsFull` instead, matching `hub.py`'s
    /// `hubredirectwhenfull = ''` default.
    pub hubredirectwhenfull: Option<String>,
    /// Seconds an (ip, time) pair in the join-flood history stays live.
    /// Matches `hub.py`'s `joinfloodtime = 60`. Zero disables the check.
    pub joinfloodtime: u64,
    pub limits: Limits,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            hubname: "Rust DC Hub".to_string(),
            hubdescription: String::new(),
            hubhost: String::new(),
            port: 411,
            maxusers: 0,
            welcomefile: None,
            hubredirectwhenfull: None,
            joinfloodtime: 60,
            limits: Limits::default(),
        }
    }
}

impl Config {
    /// Load `[dchub]` and `[dchub-userlimits]` from an INI file. A missing
    /// file yields the defaults, matching `hub.py`'s tolerance for a
    /// from-scratch first run.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        if !path.exists() {
            return Ok(config);
        }

        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;

        if let Some(section) = ini.section(Some("dchub")) {
            if let Some(v) = section.get("hubname") {
                config.hubname = v.to_string();
            }
            if let Some(v) = section.get("hubdescription") {
                config.hubdescription = v.to_string();
            }
            if let Some(v) = section.get("hubhost") {
                config.hubhost = v.to_string();
            }
            if let Some(v) = section.get("port") {
                config.port = parse_field(path, "port", v)?;
            }
            if let Some(v) = section.get("maxusers") {
                config.maxusers = parse_field(path, "maxusers", v)?;
            }
            if let Some(v) = section.get("welcomefile") {
                config.welcomefile = Some(PathBuf::from(v));
            }
            if let Some(v) = section.get("hubredirectwhenfull") {
                config.hubredirectwhenfull = if v.is_empty() { None } else { Some(v.to_string()) };
            }
            if let Some(v) = section.get("joinfloodtime") {
                config.joinfloodtime = parse_field(path, "joinfloodtime", v)?;
            }
        }

        if let Some(section) = ini.section(Some("dchub-userlimits")) {
            for (key, value) in section.iter() {
                if config.limits.set(key, value).is_err() {
                    tracing::warn!(key, value, "ignoring malformed userlimit override");
                }
            }
        }

        Ok(config)
    }

    /// Rewrite the file with this config's current values, preserving any
    /// other sections already in the document.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let mut ini = if path.exists() {
            Ini::load_from_file(path).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                source: e,
            })?
        } else {
            Ini::new()
        };

        ini.with_section(Some("dchub"))
            .set("hubname", &self.hubname)
            .set("hubdescription", &self.hubdescription)
            .set("hubhost", &self.hubhost)
            .set("port", self.port.to_string())
            .set("maxusers", self.maxusers.to_string())
            .set("joinfloodtime", self.joinfloodtime.to_string());
        if let Some(welcome) = &self.welcomefile {
            ini.with_section(Some("dchub"))
                .set("welcomefile", welcome.display().to_string());
        }
        ini.with_section(Some("dchub"))
            .set("hubredirectwhenfull", self.hubredirectwhenfull.clone().unwrap_or_default());

        write_ini_atomically(&ini, path)
    }
}

fn parse_field<T: std::str::FromStr>(path: &Path, key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        path: path.display().to_string(),
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// `<path>.new` -> rename existing to `<path>.old` -> rename `<path>.new`
/// into place -> remove `<path>.old`. Mirrors `hub.py::writefile`.
pub(crate) fn write_ini_atomically(ini: &Ini, path: &Path) -> Result<(), ConfigError> {
    let new_path = path.with_extension("new");
    let old_path = path.with_extension("old");

    ini.write_to_file(&new_path).map_err(|e| ConfigError::Io {
        path: new_path.display().to_string(),
        source: e,
    })?;

    if path.exists() {
        fs::rename(path, &old_path).map_err(|e| ConfigError::Io {
            path: old_path.display().to_string(),
            source: e,
        })?;
    }

    fs::rename(&new_path, path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    if old_path.exists() {
        let _ = fs::remove_file(&old_path);
    }

    Ok(())
}
