//! Per-session limits, with the hub-wide defaults table.
//!
//! Mirrors `hub.py::setupdefaults`'s constant block; field names match the
//! config key names so `config.rs` can apply overrides by name.

/// Size/rate limits applied to every session. Overridable per hub via
/// `[dchub-userlimits]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    pub maxcommandsize: usize,
    pub maxqueuedcommands: usize,
    pub maxcommandspertimeperiod: usize,
    pub maxmessagesize: usize,
    pub maxnewlinespermessage: usize,
    pub maxcharacterspertimeperiod: usize,
    pub maxmessagespertimeperiod: usize,
    pub maxnewlinespertimeperiod: usize,
    pub maxsearchespertimeperiod: usize,
    pub maxsearchsize: usize,
    pub maxmyinfopertimeperiod: usize,
    pub maxdescriptionlength: usize,
    pub maxtaglength: usize,
    pub maxnicklength: usize,
    pub maxemaillength: usize,
    pub minsharesize: u64,
    pub pingtime: u64,
    pub timeperiod: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            maxcommandsize: 25_000,
            maxqueuedcommands: 20,
            maxcommandspertimeperiod: 20,
            maxmessagesize: 500,
            maxnewlinespermessage: 5,
            maxcharacterspertimeperiod: 1_000,
            maxmessagespertimeperiod: 10,
            maxnewlinespertimeperiod: 10,
            maxsearchespertimeperiod: 10,
            maxsearchsize: 500,
            maxmyinfopertimeperiod: 3,
            maxdescriptionlength: 50,
            maxtaglength: 50,
            maxnicklength: 25,
            maxemaillength: 50,
            minsharesize: 0,
            pingtime: 300,
            timeperiod: 60,
        }
    }
}

impl Limits {
    /// Apply a single `key = value` override parsed from
    /// `[dchub-userlimits]`. Unknown keys are ignored by the caller, which
    /// logs a warning, matching `hub.py`'s tolerant config loading.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), std::num::ParseIntError> {
        macro_rules! int_field {
            ($($name:ident),* $(,)?) => {
                match key {
                    $(stringify!($name) => { self.$name = value.parse()?; return Ok(()); })*
                    _ => {}
                }
            };
        }
        int_field!(
            maxcommandsize,
            maxqueuedcommands,
            maxcommandspertimeperiod,
            maxmessagesize,
            maxnewlinespermessage,
            maxcharacterspertimeperiod,
            maxmessagespertimeperiod,
            maxnewlinespertimeperiod,
            maxsearchespertimeperiod,
            maxsearchsize,
            maxmyinfopertimeperiod,
            maxdescriptionlength,
            maxtaglength,
            maxnicklength,
            maxemaillength,
        );
        match key {
            "minsharesize" | "pingtime" | "timeperiod" => {
                let parsed: u64 = value.parse()?;
                match key {
                    "minsharesize" => self.minsharesize = parsed,
                    "pingtime" => self.pingtime = parsed,
                    "timeperiod" => self.timeperiod = parsed,
                    _ => unreachable!(),
                }
            }
            _ => {}
        }
        Ok(())
    }
}
