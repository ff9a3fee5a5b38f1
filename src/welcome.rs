//! Welcome message file: plain text, sent verbatim on login.
//!
//! Mirrors `hub.py::loadwelcome`/`give_WelcomeMessage`.

use std::fs;
use std::path::Path;

/// Load the welcome file's contents, or an empty string if it doesn't
/// exist yet (a hub with no welcome file configured still starts fine).
pub fn load(path: &Path) -> String {
    if !path.exists() {
        return String::new();
    }
    fs::read_to_string(path).unwrap_or_default()
}

/// The three-line greeting sent to every newly logged-in user:
/// `<Hub-Security>`, `<User-Details>`, then `<Welcome>` with the file
/// contents, matching `give_WelcomeMessage`.
pub fn greeting_lines(nick: &str, ip: std::net::IpAddr, welcome: &str) -> Vec<String> {
    vec![
        "<Hub-Security> This hub was built with Rust. Rust kicks butt!".to_string(),
        format!("<User-Details> {nick} [ {ip} ] "),
        format!("<Welcome> {welcome}"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn missing_file_yields_empty_welcome() {
        assert_eq!(load(Path::new("/nonexistent/welcome")), "");
    }

    #[test]
    fn greeting_has_three_lines_in_order() {
        let lines = greeting_lines("alice", IpAddr::V4(Ipv4Addr::LOCALHOST), "hi");
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("<Hub-Security>"));
        assert!(lines[1].starts_with("<User-Details> alice"));
        assert_eq!(lines[2], "<Welcome> hi");
    }
}
