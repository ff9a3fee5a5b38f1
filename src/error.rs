//! Error types for the hub.
//!
//! Layered the way a dispatcher error should be: framing problems, config
//! file problems, and per-command problems are different failure domains
//! and get different enums rather than one grab-bag.

use thiserror::Error;

/// Errors raised while decoding or encoding `|`-delimited frames.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FrameError {
    /// I/O error on the underlying socket.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame exceeded the configured maximum command size.
    #[error("frame too long: {0} bytes")]
    TooLong(usize),
}

/// Errors raised while loading or writing persisted hub files.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// I/O error reading or writing a config-family file.
    #[error("io error on {path}: {source}")]
    Io {
        /// Path being read or written.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The INI document could not be parsed.
    #[error("malformed ini in {path}: {source}")]
    Parse {
        /// Path being parsed.
        path: String,
        /// Underlying parse error.
        #[source]
        source: ini::Error,
    },

    /// A required key was missing from a section.
    #[error("missing key `{key}` in section [{section}] of {path}")]
    MissingKey {
        /// Path of the offending file.
        path: String,
        /// Section name.
        section: String,
        /// Key name.
        key: String,
    },

    /// A value could not be coerced to the expected type.
    #[error("invalid value for `{key}` in {path}: {value:?}")]
    InvalidValue {
        /// Path of the offending file.
        path: String,
        /// Key name.
        key: String,
        /// Raw string value that failed to parse.
        value: String,
    },
}

/// The four failure kinds a command can fall into (see spec's Error
/// Handling Design): malformed frame, privilege denial, rate/size
/// violation, and semantic rejection by a handler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CommandError {
    /// The frame was not a recognizable command at all.
    #[error("unparseable command: {0:?}")]
    Malformed(String),

    /// The sender lacked the privilege required for this command.
    #[error("insufficient privilege for {0}")]
    Forbidden(&'static str),

    /// A rate or size limit was exceeded.
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    /// The command failed a semantic check specific to its handler.
    #[error("rejected: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_error_display() {
        let err = FrameError::TooLong(99999);
        assert_eq!(format!("{err}"), "frame too long: 99999 bytes");
    }

    #[test]
    fn command_error_display() {
        let err = CommandError::Forbidden("$Kick");
        assert_eq!(format!("{err}"), "insufficient privilege for $Kick");
    }

    #[test]
    fn config_error_missing_key() {
        let err = ConfigError::MissingKey {
            path: "dchub.conf".into(),
            section: "dchub".into(),
            key: "hubname".into(),
        };
        assert_eq!(
            format!("{err}"),
            "missing key `hubname` in section [dchub] of dchub.conf"
        );
    }

    #[test]
    fn frame_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let err: FrameError = io_err.into();
        matches!(err, FrameError::Io(_));
    }
}
