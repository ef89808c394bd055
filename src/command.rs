//! Control messages recognized by the relay.
//!
//! A message starting with [`COMMAND_PREFIX`] is interpreted instead of being
//! broadcast. The prefix is stripped and the remainder matched
//! case-insensitively; unrecognized names are still commands, reported back
//! to the sender rather than fanned out.

/// Marker distinguishing commands from broadcast payloads: the two-character
/// sequence `\\`. A single backslash does not start a command.
pub const COMMAND_PREFIX: &str = "\\\\";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Close the issuing connection.
    Exit,
    /// Reply with the display identities currently registered.
    Clients,
    /// Keepalive marker, no effect.
    Ping,
    /// Anything else; carries the lower-cased name for the reply.
    Unknown(String),
}

impl Command {
    /// Returns `None` when the message is ordinary broadcast traffic.
    pub fn parse(message: &str) -> Option<Self> {
        let name = message.strip_prefix(COMMAND_PREFIX)?.to_lowercase();
        Some(match name.as_str() {
            "exit" => Command::Exit,
            "clients" => Command::Clients,
            "ping" => Command::Ping,
            _ => Command::Unknown(name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_known_commands() {
        assert_eq!(Command::parse("\\\\exit"), Some(Command::Exit));
        assert_eq!(Command::parse("\\\\clients"), Some(Command::Clients));
        assert_eq!(Command::parse("\\\\ping"), Some(Command::Ping));
    }

    #[test]
    fn command_names_are_case_insensitive() {
        assert_eq!(Command::parse("\\\\EXIT"), Some(Command::Exit));
        assert_eq!(Command::parse("\\\\Ping"), Some(Command::Ping));
        assert_eq!(Command::parse("\\\\CLIENTS"), Some(Command::Clients));
    }

    #[test]
    fn plain_traffic_is_not_a_command() {
        assert_eq!(Command::parse("hello everyone"), None);
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("exit"), None);
    }

    #[test]
    fn single_backslash_is_not_a_command() {
        assert_eq!(Command::parse("\\exit"), None);
        assert_eq!(Command::parse("\\"), None);
    }

    #[test]
    fn unknown_names_carry_the_name() {
        assert_eq!(
            Command::parse("\\\\foo"),
            Some(Command::Unknown("foo".to_string()))
        );
        assert_eq!(
            Command::parse("\\\\Shutdown"),
            Some(Command::Unknown("shutdown".to_string()))
        );
    }
}
