//! Line-oriented text protocol
//!
//! One request per line, one reply block per request. This is the text
//! form of the registry API, shaped after the character-device commands
//! (`SET <sec> <msg>`, `RESET`, `SETMAX <n>`):
//!
//! | Request            | Reply                                             |
//! |--------------------|---------------------------------------------------|
//! | `SET <sec> <key…>` | `CREATED`, `UPDATED`, `ERR EINVAL …`, `ERR ENOSPC <limit>` |
//! | `LIST`             | `OK <n>` then n lines of `<key> <seconds>`        |
//! | `RESET`            | `CLEARED <n>`, every timer removed                |
//! | `RESET <key…>`     | `CLEARED <n>`, only the timer named `key`         |
//! | `SETMAX <n>`       | `OK`, `ERR ERANGE <max>`, `ERR EBUSY <active>`    |
//! | `GETMAX`           | `MAX <n>`                                         |
//! | `STATUS`           | status block                                      |
//!
//! Clearing everything is the bare `RESET`. Any argument is a key, so
//! `RESET all` removes only a timer whose message is literally `all`.
//!
//! Lines that are not valid UTF-8 or exceed [`MAX_LINE_LEN`] get
//! `ERR EINVAL <reason>`. Hosts may add session verbs of their own; the
//! `ktimerd` loop ends the session on `QUIT` without a reply.

use std::fmt;

use ktimer_types::{ResetTarget, SetOutcome, TimerEntry};

use crate::error::{ProtocolError, RegistryError};
use crate::registry::Registry;
use crate::status::StatusReport;

/// Longest request line accepted, terminator included.
pub const MAX_LINE_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set { secs: u64, key: String },
    List,
    Reset(ResetTarget),
    SetMax(usize),
    GetMax,
    Status,
}

fn split_word(s: &str) -> (&str, &str) {
    match s.split_once([' ', '\t']) {
        Some((word, rest)) => (word, rest.trim_start_matches([' ', '\t'])),
        None => (s, ""),
    }
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        if line.len() > MAX_LINE_LEN {
            return Err(ProtocolError::LineTooLong { max: MAX_LINE_LEN });
        }
        let line = line.trim_end_matches(['\n', '\r']);
        let (verb, rest) = split_word(line.trim_start_matches([' ', '\t']));

        match verb {
            "" => Err(ProtocolError::Empty),
            "SET" => {
                let (secs, key) = split_word(rest);
                if secs.is_empty() {
                    return Err(ProtocolError::MissingArgument {
                        command: "SET",
                        argument: "a duration",
                    });
                }
                if key.is_empty() {
                    return Err(ProtocolError::MissingArgument {
                        command: "SET",
                        argument: "a message",
                    });
                }
                let secs = secs.parse().map_err(|_| ProtocolError::InvalidNumber {
                    what: "duration",
                    value: secs.to_string(),
                })?;
                Ok(Command::Set {
                    secs,
                    key: key.to_string(),
                })
            }
            "LIST" => Ok(Command::List),
            "RESET" if rest.is_empty() => Ok(Command::Reset(ResetTarget::All)),
            "RESET" => Ok(Command::Reset(ResetTarget::key(rest))),
            "SETMAX" => {
                let (n, _) = split_word(rest);
                if n.is_empty() {
                    return Err(ProtocolError::MissingArgument {
                        command: "SETMAX",
                        argument: "a count",
                    });
                }
                n.parse()
                    .map(Command::SetMax)
                    .map_err(|_| ProtocolError::InvalidNumber {
                        what: "count",
                        value: n.to_string(),
                    })
            }
            "GETMAX" => Ok(Command::GetMax),
            "STATUS" => Ok(Command::Status),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Set(SetOutcome),
    Timers(Vec<TimerEntry>),
    Cleared(usize),
    Ok,
    Capacity(usize),
    Status(StatusReport),
    Rejected(RegistryError),
    Malformed(ProtocolError),
}

impl Response {
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Rejected(_) | Response::Malformed(_))
    }
}

impl From<RegistryError> for Response {
    fn from(e: RegistryError) -> Self {
        Response::Rejected(e)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Set(SetOutcome::Created) => writeln!(f, "CREATED"),
            Response::Set(SetOutcome::Updated) => writeln!(f, "UPDATED"),
            Response::Timers(entries) => {
                writeln!(f, "OK {}", entries.len())?;
                for entry in entries {
                    writeln!(f, "{} {}", entry.key, entry.seconds_remaining)?;
                }
                Ok(())
            }
            Response::Cleared(n) => writeln!(f, "CLEARED {n}"),
            Response::Ok => writeln!(f, "OK"),
            Response::Capacity(n) => writeln!(f, "MAX {n}"),
            Response::Status(report) => write!(f, "{report}"),
            Response::Rejected(e) => match e {
                RegistryError::InvalidArgument { reason } => writeln!(f, "ERR EINVAL {reason}"),
                RegistryError::CapacityExceeded { limit } => writeln!(f, "ERR ENOSPC {limit}"),
                RegistryError::OutOfRange { max, .. } => writeln!(f, "ERR ERANGE {max}"),
                RegistryError::BelowActiveCount { active, .. } => {
                    writeln!(f, "ERR EBUSY {active}")
                }
                RegistryError::ClockUnavailable | RegistryError::Closed => {
                    writeln!(f, "ERR ECLOSED")
                }
            },
            Response::Malformed(e) => writeln!(f, "ERR EINVAL {e}"),
        }
    }
}

/// Run one decoded command against the registry.
pub async fn execute(registry: &Registry, command: Command) -> Response {
    let result = match command {
        Command::Set { secs, key } => registry.set(key, secs).await.map(Response::Set),
        Command::List => registry.list().await.map(Response::Timers),
        Command::Reset(target) => registry.reset(target).await.map(Response::Cleared),
        Command::SetMax(n) => registry.set_capacity(n).await.map(|()| Response::Ok),
        Command::GetMax => registry.capacity().await.map(Response::Capacity),
        Command::Status => registry.status().await.map(Response::Status),
    };
    result.unwrap_or_else(Response::from)
}

/// Decode and run one request line.
pub async fn serve_line(registry: &Registry, line: &str) -> Response {
    match Command::parse(line) {
        Ok(command) => execute(registry, command).await,
        Err(e) => Response::Malformed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ktimer_types::RegistryConfig;
    use std::time::Duration;

    #[test]
    fn parse_set_joins_message_words() {
        assert_eq!(
            Command::parse("SET 5 lunch with  friends\n"),
            Ok(Command::Set {
                secs: 5,
                key: "lunch with  friends".to_string()
            })
        );
    }

    #[test]
    fn parse_set_requires_both_arguments() {
        assert!(matches!(
            Command::parse("SET"),
            Err(ProtocolError::MissingArgument { argument: "a duration", .. })
        ));
        assert!(matches!(
            Command::parse("SET 5"),
            Err(ProtocolError::MissingArgument { argument: "a message", .. })
        ));
        assert!(matches!(
            Command::parse("SET five lunch"),
            Err(ProtocolError::InvalidNumber { what: "duration", .. })
        ));
    }

    #[test]
    fn parse_reset_variants() {
        assert_eq!(Command::parse("RESET\r\n"), Ok(Command::Reset(ResetTarget::All)));
        assert_eq!(
            Command::parse("RESET lunch"),
            Ok(Command::Reset(ResetTarget::key("lunch")))
        );
        assert_eq!(
            Command::parse("RESET all"),
            Ok(Command::Reset(ResetTarget::key("all")))
        );
    }

    #[test]
    fn parse_capacity_commands() {
        assert_eq!(Command::parse("SETMAX 3"), Ok(Command::SetMax(3)));
        assert!(matches!(
            Command::parse("SETMAX -1"),
            Err(ProtocolError::InvalidNumber { what: "count", .. })
        ));
        assert!(Command::parse("SETMAX").is_err());
        assert_eq!(Command::parse("GETMAX"), Ok(Command::GetMax));
        assert_eq!(Command::parse("LIST"), Ok(Command::List));
        assert_eq!(Command::parse("STATUS"), Ok(Command::Status));
    }

    #[test]
    fn parse_rejects_noise() {
        assert_eq!(Command::parse("\n"), Err(ProtocolError::Empty));
        assert_eq!(
            Command::parse("set 5 lunch"),
            Err(ProtocolError::UnknownCommand("set".to_string()))
        );
        let long = format!("SET 5 {}", "x".repeat(MAX_LINE_LEN));
        assert_eq!(
            Command::parse(&long),
            Err(ProtocolError::LineTooLong { max: MAX_LINE_LEN })
        );
    }

    #[test]
    fn render_replies() {
        assert_eq!(Response::Set(SetOutcome::Created).to_string(), "CREATED\n");
        assert_eq!(Response::Set(SetOutcome::Updated).to_string(), "UPDATED\n");
        assert_eq!(Response::Timers(vec![]).to_string(), "OK 0\n");
        assert_eq!(
            Response::Timers(vec![TimerEntry {
                key: "lunch".to_string(),
                seconds_remaining: 4
            }])
            .to_string(),
            "OK 1\nlunch 4\n"
        );
        assert_eq!(
            Response::from(RegistryError::CapacityExceeded { limit: 1 }).to_string(),
            "ERR ENOSPC 1\n"
        );
        assert_eq!(
            Response::from(RegistryError::BelowActiveCount {
                requested: 1,
                active: 2
            })
            .to_string(),
            "ERR EBUSY 2\n"
        );
        assert_eq!(Response::Cleared(0).to_string(), "CLEARED 0\n");
    }

    #[tokio::test(start_paused = true)]
    async fn serve_lines_against_registry() {
        let (registry, _task) = Registry::spawn(RegistryConfig::default()).expect("registry");

        assert_eq!(
            serve_line(&registry, "SET 5 lunch").await,
            Response::Set(SetOutcome::Created)
        );
        assert_eq!(
            serve_line(&registry, "SET 20 lunch").await,
            Response::Set(SetOutcome::Updated)
        );
        assert_eq!(
            serve_line(&registry, "SET 5 dinner").await.to_string(),
            "ERR ENOSPC 1\n"
        );
        assert_eq!(
            serve_line(&registry, "LIST").await.to_string(),
            "OK 1\nlunch 20\n"
        );
        assert_eq!(serve_line(&registry, "GETMAX").await, Response::Capacity(1));
        assert_eq!(
            serve_line(&registry, "SETMAX 0").await.to_string(),
            "ERR ERANGE 5\n"
        );
        assert_eq!(serve_line(&registry, "SETMAX 2").await, Response::Ok);
        assert_eq!(
            serve_line(&registry, "SET 0 tea").await.to_string(),
            "ERR EINVAL duration 0s outside 1..=86400\n"
        );
        assert_eq!(serve_line(&registry, "RESET lunch").await, Response::Cleared(1));
        assert_eq!(serve_line(&registry, "RESET").await, Response::Cleared(0));

        serve_line(&registry, "SET 5 all").await;
        serve_line(&registry, "SET 5 tea").await;
        assert_eq!(serve_line(&registry, "RESET all").await, Response::Cleared(1));
        assert_eq!(serve_line(&registry, "LIST").await.to_string(), "OK 1\ntea 5\n");
        assert_eq!(serve_line(&registry, "RESET").await, Response::Cleared(1));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let status = serve_line(&registry, "STATUS").await.to_string();
        assert!(status.starts_with("[MODULE_NAME]: mytimer\n[MSEC]: "));
    }

    #[tokio::test]
    async fn closed_registry_replies_eclosed() {
        let (registry, task) = Registry::spawn(RegistryConfig::default()).expect("registry");
        registry.shutdown().await.expect("shutdown");
        task.await.expect("actor task");

        assert_eq!(serve_line(&registry, "LIST").await.to_string(), "ERR ECLOSED\n");
    }
}
