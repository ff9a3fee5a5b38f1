//! Command-line argument parsing.
//!
//! Deliberately not a `clap` derive: the surface is a dynamic
//! `--key=value` pass-through onto live config fields, the same shape as
//! `main.py::parseargs`, which a fixed struct of flags can't express
//! without duplicating every config key by hand.

use std::path::PathBuf;

use crate::config::Config;

pub struct Args {
    pub base_dir: PathBuf,
    pub overrides: Vec<(String, String)>,
    pub help: bool,
}

pub fn parse(argv: impl Iterator<Item = String>) -> Args {
    let mut base_dir = PathBuf::from(".");
    let mut overrides = Vec::new();
    let mut help = false;

    let mut iter = argv.skip(1).peekable();
    while let Some(arg) = iter.next() {
        if arg == "--help" || arg == "-h" {
            help = true;
        } else if let Some(rest) = arg.strip_prefix("--config-dir=") {
            base_dir = PathBuf::from(rest);
        } else if arg == "--config-dir" {
            if let Some(value) = iter.next() {
                base_dir = PathBuf::from(value);
            }
        } else if let Some(rest) = arg.strip_prefix("--") {
            if let Some((key, value)) = rest.split_once('=') {
                overrides.push((key.to_string(), value.to_string()));
            } else if let Some(value) = iter.next() {
                overrides.push((rest.to_string(), value));
            }
        }
    }

    Args { base_dir, overrides, help }
}

/// Apply `--key=value` overrides onto an already-loaded config, matching
/// `main.py`'s "command line overrides file" precedence.
pub fn apply_overrides(config: &mut Config, overrides: &[(String, String)]) {
    for (key, value) in overrides {
        match key.as_str() {
            "hubname" => config.hubname = value.clone(),
            "hubdescription" => config.hubdescription = value.clone(),
            "hubhost" => config.hubhost = value.clone(),
            "port" => {
                if let Ok(port) = value.parse() {
                    config.port = port;
                }
            }
            "maxusers" => {
                if let Ok(n) = value.parse() {
                    config.maxusers = n;
                }
            }
            "welcomefile" => config.welcomefile = Some(PathBuf::from(value)),
            _ => {
                if config.limits.set(key, value).is_err() {
                    tracing::warn!(key, value, "unrecognized command line override, ignoring");
                }
            }
        }
    }
}

pub const HELP_TEXT: &str = "\
dchub [--config-dir DIR] [--key=value ...]

  --config-dir DIR   Directory holding dchub.conf, dchub-accounts.conf,
                      dchub-usercommands.conf and welcome.txt (default: .)
  --key=value         Override any [dchub] or [dchub-userlimits] key
  --help              Show this message
";
