//! Command tokens and the inline-button callback codec.
//!
//! Text commands and button payloads share one closed [`Command`] enum, so the
//! text path and the callback path cannot drift apart. Button payloads have the
//! shape `"<command> <n1>[,<n2>...]"`.

use crate::storage::RowId;
use std::num::ParseIntError;
use thiserror::Error;

/// Commands understood by the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Greeting, same as help
    Start,
    /// Usage text
    Help,
    /// Begin creating a TOTP
    New,
    /// List TOTP names
    List,
    /// Pick a TOTP to delete
    Delete,
    /// Pick a TOTP to generate a code for
    Otp,
    /// Abort a dialog or a selection
    Cancel,
    /// Privacy policy pointer
    Privacy,
}

impl Command {
    /// Every command
    pub const ALL: [Self; 8] = [
        Self::Start,
        Self::Help,
        Self::New,
        Self::List,
        Self::Delete,
        Self::Otp,
        Self::Cancel,
        Self::Privacy,
    ];

    /// Commands advertised in the menu and help, in display order
    pub const MENU: [Self; 6] = [
        Self::Otp,
        Self::New,
        Self::List,
        Self::Delete,
        Self::Privacy,
        Self::Help,
    ];

    /// Literal token, including the leading slash
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Start => "/start",
            Self::Help => "/help",
            Self::New => "/new",
            Self::List => "/list",
            Self::Delete => "/del",
            Self::Otp => "/otp",
            Self::Cancel => "/cancel",
            Self::Privacy => "/privacy",
        }
    }

    /// One-line description for menus and help
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Start => "Start the bot.",
            Self::Help => "Display help message.",
            Self::New => "Create a new TOTP.",
            Self::List => "List all your TOTPs.",
            Self::Delete => "Delete your TOTP.",
            Self::Otp => "Generate a TOTP code.",
            Self::Cancel => "Cancel creating a TOTP.",
            Self::Privacy => "Display privacy policy.",
        }
    }

    /// Parse a bare token such as `/otp`.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.token() == token)
    }
}

/// Classification of an inbound text message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextInput<'a> {
    /// A known command
    Command(Command),
    /// Slash-prefixed text that is not a command
    UnknownCommand(&'a str),
    /// Anything else, possibly dialog input
    FreeText(&'a str),
    /// A command of the form `/cmd@other_bot`, meant for another bot in the
    /// same group chat
    ForOtherBot,
}

impl<'a> TextInput<'a> {
    /// Decide once how a text message should be treated.
    ///
    /// A `/cmd@name` suffix is honoured only when `name` matches
    /// `bot_username` (case-insensitively). With no known username every
    /// suffix is accepted.
    ///
    /// # Examples
    ///
    /// ```
    /// use totp_bot_core::command::{Command, TextInput};
    ///
    /// let me = Some("totp_bot");
    /// assert_eq!(TextInput::classify("/otp@TOTP_bot", me), TextInput::Command(Command::Otp));
    /// assert_eq!(TextInput::classify("/otp@other_bot", me), TextInput::ForOtherBot);
    /// ```
    #[must_use]
    pub fn classify(text: &'a str, bot_username: Option<&str>) -> Self {
        if !text.starts_with('/') {
            return Self::FreeText(text);
        }
        let token = text.split_whitespace().next().unwrap_or(text);
        let bare = match (token.split_once('@'), bot_username) {
            (Some((_, mention)), Some(me)) if !mention.eq_ignore_ascii_case(me) => {
                return Self::ForOtherBot;
            }
            (Some((bare, _)), _) => bare,
            (None, _) => token,
        };
        Command::from_token(bare).map_or(Self::UnknownCommand(text), Self::Command)
    }
}

/// Numbers parsed from a payload, with the first parse failure if any
///
/// Tokens that fail to parse are kept as `0` so positions stay stable; callers
/// must check `error` before trusting the ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedIds {
    /// One number per comma-separated token
    pub ids: Vec<u64>,
    /// Last parse failure, if any token was malformed
    pub error: Option<ParseIntError>,
}

/// Parse `"<command> n1,n2,..."` into its numbers.
///
/// The command literal is removed once and the rest trimmed before splitting.
///
/// # Examples
///
/// ```
/// use totp_bot_core::command::parse_callback_ids;
///
/// let parsed = parse_callback_ids("/del", "/del 7,9");
/// assert_eq!(parsed.ids, vec![7, 9]);
/// assert!(parsed.error.is_none());
/// ```
#[must_use]
pub fn parse_callback_ids(command: &str, data: &str) -> ParsedIds {
    let rest = data.replacen(command, "", 1);
    let mut parsed = ParsedIds {
        ids: Vec::new(),
        error: None,
    };

    for token in rest.trim().split(',') {
        match token.trim().parse::<u64>() {
            Ok(n) => parsed.ids.push(n),
            Err(e) => {
                parsed.ids.push(0);
                parsed.error = Some(e);
            }
        }
    }
    parsed
}

/// Handle id embedded in button payloads
pub type HandleId = RowId;

/// Errors decoding a button payload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    /// Leading token is not a callback command
    #[error("unknown callback command in {0:?}")]
    UnknownCommand(String),
    /// A number failed to parse
    #[error("malformed callback data {data:?}: {source}")]
    Malformed {
        /// Raw payload
        data: String,
        /// Parse failure
        #[source]
        source: ParseIntError,
    },
    /// Wrong number of ids for the command
    #[error("callback data {data:?} has {got} ids, expected {expected}")]
    Arity {
        /// Raw payload
        data: String,
        /// Ids required by the command
        expected: usize,
        /// Ids present
        got: usize,
    },
    /// An id does not fit a row id
    #[error("id out of range in callback data {0:?}")]
    OutOfRange(String),
}

/// Intent carried by an inline button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    /// Delete an entry, then update the selection message
    Delete {
        /// Entry to delete
        entry_id: RowId,
        /// Selection message handle
        handle: HandleId,
    },
    /// Generate a code, then show it in the selection message
    Generate {
        /// Entry to generate for
        entry_id: RowId,
        /// Selection message handle
        handle: HandleId,
    },
    /// Close the selection message
    Cancel {
        /// Selection message handle
        handle: HandleId,
    },
    /// Send the help text
    Help,
}

impl CallbackAction {
    /// Payload text for this action.
    #[must_use]
    pub fn encode(&self) -> String {
        match *self {
            Self::Delete { entry_id, handle } => {
                format!("{} {entry_id},{handle}", Command::Delete.token())
            }
            Self::Generate { entry_id, handle } => {
                format!("{} {entry_id},{handle}", Command::Otp.token())
            }
            Self::Cancel { handle } => format!("{} {handle}", Command::Cancel.token()),
            Self::Help => Command::Help.token().to_string(),
        }
    }

    /// Decode a payload, enforcing the id count of each command.
    ///
    /// # Errors
    ///
    /// Returns a `CallbackError` for unknown commands, malformed numbers or a
    /// wrong number of ids.
    pub fn decode(data: &str) -> Result<Self, CallbackError> {
        let token = data.split_whitespace().next().unwrap_or_default();
        let command = Command::from_token(token)
            .ok_or_else(|| CallbackError::UnknownCommand(data.to_string()))?;

        let expected = match command {
            Command::Delete | Command::Otp => 2,
            Command::Cancel => 1,
            Command::Help => return Ok(Self::Help),
            _ => return Err(CallbackError::UnknownCommand(data.to_string())),
        };

        let ids = decode_ids(command, data, expected)?;
        Ok(match command {
            Command::Delete => Self::Delete {
                entry_id: ids[0],
                handle: ids[1],
            },
            Command::Otp => Self::Generate {
                entry_id: ids[0],
                handle: ids[1],
            },
            _ => Self::Cancel { handle: ids[0] },
        })
    }
}

fn decode_ids(command: Command, data: &str, expected: usize) -> Result<Vec<RowId>, CallbackError> {
    let parsed = parse_callback_ids(command.token(), data);
    if let Some(source) = parsed.error {
        return Err(CallbackError::Malformed {
            data: data.to_string(),
            source,
        });
    }
    if parsed.ids.len() != expected {
        return Err(CallbackError::Arity {
            data: data.to_string(),
            expected,
            got: parsed.ids.len(),
        });
    }
    parsed
        .ids
        .into_iter()
        .map(|id| RowId::try_from(id).map_err(|_| CallbackError::OutOfRange(data.to_string())))
        .collect()
}
