//! Inbound command grammar.
//!
//! ```text
//! accidents <location>   events <location>
//! alerts <filter|all>    weather <location>
//! ```
//!
//! Keywords are case-insensitive and the argument is the trimmed rest of the
//! line. Anything else is ordinary channel chatter and parses to
//! [`ParsedCommand::NoCommand`].

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Accidents,
    Events,
    Alerts,
    Weather,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Accidents => "accidents",
            CommandKind::Events => "events",
            CommandKind::Alerts => "alerts",
            CommandKind::Weather => "weather",
        }
    }
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(word: &str) -> Result<Self, Self::Err> {
        match word.trim().to_ascii_lowercase().as_str() {
            "accidents" => Ok(CommandKind::Accidents),
            "events" => Ok(CommandKind::Events),
            "alerts" => Ok(CommandKind::Alerts),
            "weather" => Ok(CommandKind::Weather),
            other => Err(format!(
                "unknown command '{}' (expected accidents, events, alerts or weather)",
                other
            )),
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    /// Normalized argument, never empty.
    pub argument: String,
}

impl Command {
    /// `None` when the argument is `all`.
    pub fn location_filter(&self) -> Option<&str> {
        if self.argument.eq_ignore_ascii_case("all") {
            None
        } else {
            Some(self.argument.as_str())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    Command(Command),
    NoCommand,
}

fn command_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(accidents|events|alerts|weather)\s+(.+?)\s*$")
            .expect("static command regex")
    })
}

fn interstate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[Ii]-?(\d+)\b").expect("static interstate regex"))
}

pub fn parse_command(text: &str) -> ParsedCommand {
    let Some(caps) = command_re().captures(text) else {
        return ParsedCommand::NoCommand;
    };
    let (Some(keyword), Some(arg)) = (caps.get(1), caps.get(2)) else {
        return ParsedCommand::NoCommand;
    };
    let Ok(kind) = keyword.as_str().parse::<CommandKind>() else {
        return ParsedCommand::NoCommand;
    };
    let argument = normalize_interstate(arg.as_str().trim());
    if argument.is_empty() {
        return ParsedCommand::NoCommand;
    }
    ParsedCommand::Command(Command { kind, argument })
}

/// Rewrite `I10`, `i10`, `i-10` to `I-10` anywhere in `s`.
pub fn normalize_interstate(s: &str) -> String {
    interstate_re().replace_all(s, "I-$1").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_case_and_padding() {
        match parse_command("  EVENTS   Flagstaff  ") {
            ParsedCommand::Command(cmd) => {
                assert_eq!(cmd.kind, CommandKind::Events);
                assert_eq!(cmd.argument, "Flagstaff");
            }
            other => panic!("expected command, got {:?}", other),
        }
    }

    #[test]
    fn bare_keyword_is_not_a_command() {
        assert_eq!(parse_command("alerts"), ParsedCommand::NoCommand);
        assert_eq!(parse_command("alerts   "), ParsedCommand::NoCommand);
    }

    #[test]
    fn keyword_must_be_whole_word() {
        assert_eq!(parse_command("accidentsI10"), ParsedCommand::NoCommand);
    }

    #[test]
    fn all_means_no_filter() {
        match parse_command("alerts ALL") {
            ParsedCommand::Command(cmd) => assert_eq!(cmd.location_filter(), None),
            other => panic!("expected command, got {:?}", other),
        }
    }

    #[test]
    fn interstate_inside_words_untouched() {
        assert_eq!(normalize_interstate("Mi10 Hi-5"), "Mi10 Hi-5");
        assert_eq!(normalize_interstate("i10/i17"), "I-10/I-17");
    }
}
