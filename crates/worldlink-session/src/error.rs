//! Error types for the session layer.
//!
//! Two directions, two types:
//!
//! - [`CommandError`] is produced *locally* when a handler can't fulfil a
//!   request. The server turns it into an `ERR(code, message, extra*)`
//!   reply.
//! - [`RemoteError`] is what a client builds from an `ERR` it *received*.
//!   Its [`category`](RemoteError::category) tells the application how to
//!   react.
//!
//! Status codes are grouped by hundreds, see [`codes`] and
//! [`ErrorCategory`].

use std::fmt;

use worldlink_protocol::{FromValue, IntoValue, Message, Value, commands};

/// Status codes carried in `ERR` replies.
pub mod codes {
    /// A command's arguments had the wrong number or types.
    pub const MALFORMED_ARGS: i32 = 101;
    /// The byte stream could not be decoded; the connection is closed.
    pub const MALFORMED_FRAME: i32 = 102;
    /// JOIN on a session that already joined.
    pub const ALREADY_JOINED: i32 = 201;
    /// LEAVE (or a command that needs a player) before JOIN.
    pub const NOT_JOINED: i32 = 202;
    /// JOIN with a display name another joined session uses.
    pub const NAME_TAKEN: i32 = 203;
    /// BROADCAST naming an entity the server doesn't have.
    pub const UNKNOWN_ENTITY: i32 = 204;
    /// The server failed to carry out a well-formed request.
    pub const INTERNAL: i32 = 500;
}

/// How a status code should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 100–199: the peer broke the protocol. Usually fatal to the session.
    Protocol,
    /// 200–299: a request was refused. The client can recover by reacting
    /// to the specific code.
    User,
    /// Anything else.
    Generic,
}

impl ErrorCategory {
    pub fn from_code(code: i32) -> Self {
        match code {
            100..=199 => Self::Protocol,
            200..=299 => Self::User,
            _ => Self::Generic,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Protocol => "protocol error",
            Self::User => "user error",
            Self::Generic => "error",
        })
    }
}

/// A handler refused a command.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("status code {code}: {message}")]
pub struct CommandError {
    pub code: i32,
    pub message: String,
    /// Extra human-readable detail, sent after the message.
    pub extra: Vec<String>,
}

impl CommandError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            extra: Vec::new(),
        }
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra.push(extra.into());
        self
    }

    pub fn malformed_args(message: impl Into<String>) -> Self {
        Self::new(codes::MALFORMED_ARGS, message)
    }

    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from_code(self.code)
    }

    /// The `ERR` message that reports this error to the peer.
    pub fn to_message(&self) -> Message {
        let mut args = vec![self.code.into_value(), self.message.as_str().into_value()];
        args.extend(self.extra.iter().map(|e| e.as_str().into_value()));
        Message::new(commands::ERR, args)
    }
}

/// An `ERR` received from the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub code: i32,
    pub message: String,
    pub extra: Vec<Value>,
}

impl RemoteError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from_code(self.code)
    }

    /// Builds the error from the arguments of an `ERR` message.
    ///
    /// The code may arrive as either integer width.
    ///
    /// # Errors
    /// Returns a 101 [`CommandError`] if the code or message is missing
    /// or has the wrong type.
    pub fn from_args(args: Vec<Value>) -> Result<Self, CommandError> {
        let mut args = args.into_iter();
        let code = match args.next() {
            Some(Value::Int32(code)) => code,
            Some(Value::UInt32(code)) => i32::try_from(code)
                .map_err(|_| CommandError::malformed_args("ERR: code out of range"))?,
            _ => return Err(CommandError::malformed_args("ERR: missing status code")),
        };
        let message = args
            .next()
            .map(String::from_value)
            .transpose()
            .map_err(|e| CommandError::malformed_args(format!("ERR: message: {e}")))?
            .unwrap_or_default();
        Ok(Self {
            code,
            message,
            extra: args.collect(),
        })
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: status code {}: {}", self.category(), self.code, self.message)
    }
}

impl std::error::Error for RemoteError {}

/// Why a session-state request was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// JOIN from a session that already has a player.
    #[error("already joined")]
    AlreadyJoined,

    /// A request that needs a player, from a session without one.
    #[error("not joined")]
    NotJoined,

    /// Another joined session uses this display name.
    #[error("name taken")]
    NameTaken(String),

    /// No session is registered under this connection.
    #[error("no session for {0}")]
    UnknownSession(worldlink_transport::ConnectionId),
}

impl From<SessionError> for CommandError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::AlreadyJoined => CommandError::new(codes::ALREADY_JOINED, "already joined"),
            SessionError::NotJoined => CommandError::new(
                codes::NOT_JOINED,
                "tried to leave a game the client is not connected to",
            )
            .with_extra("join first, then leave"),
            SessionError::NameTaken(_) => CommandError::new(codes::NAME_TAKEN, "name taken"),
            SessionError::UnknownSession(id) => {
                CommandError::new(codes::NOT_JOINED, format!("no session for {id}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code_categorizes_by_hundreds() {
        assert_eq!(ErrorCategory::from_code(101), ErrorCategory::Protocol);
        assert_eq!(ErrorCategory::from_code(204), ErrorCategory::User);
        assert_eq!(ErrorCategory::from_code(999), ErrorCategory::Generic);
        assert_eq!(ErrorCategory::from_code(99), ErrorCategory::Generic);
        assert_eq!(ErrorCategory::from_code(300), ErrorCategory::Generic);
    }

    #[test]
    fn test_to_message_carries_code_message_and_extras() {
        let msg = CommandError::new(202, "not joined").with_extra("hint").to_message();
        assert_eq!(msg.command, commands::ERR);
        assert_eq!(
            msg.args,
            vec![
                Value::Int32(202),
                Value::String("not joined".into()),
                Value::String("hint".into()),
            ]
        );
    }

    #[test]
    fn test_remote_error_from_args_round_trips_command_error() {
        let sent = CommandError::new(203, "name taken");
        let received = RemoteError::from_args(sent.to_message().args).unwrap();
        assert_eq!(received.code, 203);
        assert_eq!(received.message, "name taken");
        assert_eq!(received.category(), ErrorCategory::User);
        assert!(received.extra.is_empty());
    }

    #[test]
    fn test_remote_error_from_args_missing_code_is_101() {
        let err = RemoteError::from_args(vec![Value::String("x".into())]).unwrap_err();
        assert_eq!(err.code, codes::MALFORMED_ARGS);
    }

    #[test]
    fn test_session_error_maps_to_user_codes() {
        assert_eq!(CommandError::from(SessionError::AlreadyJoined).code, 201);
        assert_eq!(CommandError::from(SessionError::NotJoined).code, 202);
        let taken = CommandError::from(SessionError::NameTaken("Alice".into()));
        assert_eq!((taken.code, taken.message.as_str()), (203, "name taken"));
    }

    #[test]
    fn test_remote_error_display_names_category() {
        let err = RemoteError {
            code: 101,
            message: "bad".into(),
            extra: vec![],
        };
        assert_eq!(err.to_string(), "protocol error: status code 101: bad");
    }
}
