//! Commands and the messages that carry them.

use std::fmt;

use crate::Value;

/// Command names used by Worldlink clients and servers.
///
/// Names are case-insensitive on the wire; these are the normalized forms.
pub mod commands {
    // client → server
    pub const JOIN: &str = "JOIN";
    pub const LEAVE: &str = "LEAVE";
    pub const SNAPSHOT: &str = "SNAPSHOT";
    pub const BROADCAST: &str = "BROADCAST";

    // server → client
    pub const INIT_LEVELS: &str = "INIT_LEVELS";
    pub const INIT_ENTITIES: &str = "INIT_ENTITIES";
    pub const RNG: &str = "RNG";
    pub const DELTA: &str = "DELTA";
    pub const EVENT: &str = "EVENT";
    pub const GOT_BROADCAST: &str = "GOT_BROADCAST";
    pub const ERR: &str = "ERR";
}

/// A case-normalized command name.
///
/// Two names that differ only in ASCII case compare equal, because both
/// are folded to upper case on construction. Surrounding whitespace is
/// dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandName(String);

impl CommandName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommandName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl PartialEq<str> for CommandName {
    fn eq(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl PartialEq<&str> for CommandName {
    fn eq(&self, other: &&str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

/// One command plus its ordered arguments.
///
/// Built right before sending; decoded messages are handed to exactly one
/// dispatch call and then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub command: CommandName,
    pub args: Vec<Value>,
}

impl Message {
    pub fn new(command: impl Into<CommandName>, args: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// A message with no arguments, e.g. `LEAVE` or `SNAPSHOT`.
    pub fn bare(command: impl Into<CommandName>) -> Self {
        Self::new(command, Vec::new())
    }
}
