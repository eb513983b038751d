//! Command line and interactive commands

use dispatch_core::{CallId, Coordinate};
use std::str::FromStr;

use crate::error::{ConsoleError, ConsoleResult};

pub const USAGE: &str = "\
usage: dispatch-console <command>

commands:
  follow <call-id>   follow a call and print distance and ETA
  resume             follow the call stored as active
  login <token>      store the access token from the login flow
  logout             forget the access token and active call";

pub const HELP: &str = "\
  arrived            confirm arrival at the patient
  complete           close the call as attended
  cancel             close the call without completion
  pos <lat,lng>      report the responder position from this device
  status             show distance, ETA and status
  quit               stop following (the call stays open)";

/// Top-level invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Follow(CallId),
    Resume,
    Login(String),
    Logout,
}

impl Command {
    pub fn parse<I>(args: I) -> ConsoleResult<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let name = args.next().ok_or_else(|| ConsoleError::usage(USAGE))?;

        let command = match name.as_str() {
            "follow" => {
                let raw = args
                    .next()
                    .ok_or_else(|| ConsoleError::usage("follow needs a call id"))?;
                let id = raw
                    .parse()
                    .map_err(|_| ConsoleError::usage(format!("not a call id: {}", raw)))?;
                Command::Follow(id)
            }
            "resume" => Command::Resume,
            "login" => {
                let token = args
                    .next()
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| ConsoleError::usage("login needs a token"))?;
                Command::Login(token)
            }
            "logout" => Command::Logout,
            _ => return Err(ConsoleError::usage(USAGE)),
        };

        if let Some(extra) = args.next() {
            return Err(ConsoleError::usage(format!("unexpected argument: {}", extra)));
        }
        Ok(command)
    }
}

/// A line typed while following a call
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Arrived,
    Complete,
    Cancel,
    Position(Coordinate),
    Status,
    Help,
    Quit,
}

impl FromStr for SessionCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

        match word.to_ascii_lowercase().as_str() {
            "arrived" => Ok(Self::Arrived),
            "complete" | "done" => Ok(Self::Complete),
            "cancel" => Ok(Self::Cancel),
            "pos" | "position" => rest
                .trim()
                .parse::<Coordinate>()
                .map(Self::Position)
                .map_err(|e| e.to_string()),
            "status" | "" => Ok(Self::Status),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(format!("unknown command '{}', type help", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_follow() {
        let id = CallId::new();
        let command = Command::parse(args(&["follow", &id.to_string()])).unwrap();
        assert_eq!(command, Command::Follow(id));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Command::parse(args(&[])).is_err());
        assert!(Command::parse(args(&["follow"])).is_err());
        assert!(Command::parse(args(&["follow", "nope"])).is_err());
        assert!(Command::parse(args(&["login", " "])).is_err());
        assert!(Command::parse(args(&["logout", "now"])).is_err());
        assert!(Command::parse(args(&["teleport"])).is_err());
    }

    #[test]
    fn test_parse_session_commands() {
        assert_eq!("arrived".parse::<SessionCommand>(), Ok(SessionCommand::Arrived));
        assert_eq!(" Complete ".parse::<SessionCommand>(), Ok(SessionCommand::Complete));
        assert_eq!("".parse::<SessionCommand>(), Ok(SessionCommand::Status));
        assert_eq!(
            "pos -25.4284,-49.2733".parse::<SessionCommand>(),
            Ok(SessionCommand::Position(Coordinate::new(-25.4284, -49.2733)))
        );
        assert!("pos nowhere".parse::<SessionCommand>().is_err());
        assert!("fly".parse::<SessionCommand>().is_err());
    }
}
