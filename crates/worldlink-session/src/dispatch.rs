//! Command dispatch: command name → handler.
//!
//! The same table type is used on both ends of a connection. The context
//! type `C` is whatever a handler needs: the server passes its per-session
//! state, the client its mirror state.
//!
//! ```rust
//! use worldlink_protocol::{Message, values};
//! use worldlink_session::{Dispatch, DispatchTable};
//!
//! let mut table: DispatchTable<Vec<String>> = DispatchTable::new();
//! table.register("join", |seen, mut args| {
//!     let name: String = args.next()?;
//!     seen.push(name);
//!     Ok(())
//! });
//!
//! let mut seen = Vec::new();
//! let outcome = table.dispatch(&mut seen, Message::new("JOIN", values!["Alice"]));
//! assert_eq!(outcome, Ok(Dispatch::Handled));
//! assert_eq!(seen, ["Alice"]);
//! ```

use std::collections::HashMap;

use worldlink_protocol::{CommandName, FromValue, Message, Value};

use crate::CommandError;

/// The positional arguments of one message, taken in order.
#[derive(Debug)]
pub struct Args {
    command: CommandName,
    values: std::vec::IntoIter<Value>,
    position: usize,
}

impl Args {
    pub fn new(command: CommandName, values: Vec<Value>) -> Self {
        Self {
            command,
            values: values.into_iter(),
            position: 0,
        }
    }

    pub fn command(&self) -> &CommandName {
        &self.command
    }

    /// How many arguments have not been taken yet.
    pub fn remaining(&self) -> usize {
        self.values.len()
    }

    /// Takes the next argument as `T`.
    ///
    /// # Errors
    /// A 101 [`CommandError`] if there is no next argument or it has the
    /// wrong type.
    pub fn next<T: FromValue>(&mut self) -> Result<T, CommandError> {
        self.optional()?.ok_or_else(|| {
            CommandError::malformed_args(format!(
                "{}: missing argument {}",
                self.command, self.position
            ))
        })
    }

    /// Takes the next argument as `T` if there is one.
    ///
    /// # Errors
    /// A 101 [`CommandError`] if the argument has the wrong type.
    pub fn optional<T: FromValue>(&mut self) -> Result<Option<T>, CommandError> {
        self.position += 1;
        let Some(value) = self.values.next() else {
            return Ok(None);
        };
        T::from_value(value).map(Some).map_err(|e| {
            CommandError::malformed_args(format!(
                "{}: argument {}: {e}",
                self.command, self.position
            ))
        })
    }

    /// Takes every remaining argument as `T`.
    ///
    /// # Errors
    /// A 101 [`CommandError`] naming the first argument of the wrong type.
    pub fn rest<T: FromValue>(&mut self) -> Result<Vec<T>, CommandError> {
        let mut out = Vec::with_capacity(self.remaining());
        while let Some(value) = self.optional()? {
            out.push(value);
        }
        Ok(out)
    }
}

/// What [`DispatchTable::dispatch`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Exactly one handler ran and succeeded.
    Handled,
    /// No handler is registered for the command. Not an error: peers may
    /// speak a newer protocol.
    Ignored,
}

type Handler<C> = Box<dyn Fn(&mut C, Args) -> Result<(), CommandError> + Send + Sync>;

/// Command name → handler, filled in once when a connection is set up.
pub struct DispatchTable<C> {
    handlers: HashMap<CommandName, Handler<C>>,
}

impl<C> Default for DispatchTable<C> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<C> DispatchTable<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `name` (case-insensitive). A later
    /// registration for the same name replaces the earlier one.
    pub fn register<F>(&mut self, name: impl Into<CommandName>, handler: F) -> &mut Self
    where
        F: Fn(&mut C, Args) -> Result<(), CommandError> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(&CommandName::new(name))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Routes `message` to its handler.
    ///
    /// # Errors
    /// Whatever the handler returned.
    pub fn dispatch(&self, ctx: &mut C, message: Message) -> Result<Dispatch, CommandError> {
        let Some(handler) = self.handlers.get(&message.command) else {
            tracing::debug!(command = %message.command, "ignoring unknown command");
            return Ok(Dispatch::Ignored);
        };
        tracing::trace!(command = %message.command, args = message.args.len(), "dispatch");
        handler(ctx, Args::new(message.command, message.args))?;
        Ok(Dispatch::Handled)
    }
}

impl<C> std::fmt::Debug for DispatchTable<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().map(CommandName::as_str).collect();
        names.sort_unstable();
        f.debug_struct("DispatchTable").field("commands", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use worldlink_protocol::{EntityId, values};

    use super::*;

    #[derive(Default)]
    struct Calls {
        joins: Vec<(String, String)>,
        leaves: usize,
    }

    fn table() -> DispatchTable<Calls> {
        let mut table = DispatchTable::new();
        table
            .register("JOIN", |calls: &mut Calls, mut args| {
                let local: String = args.next()?;
                let name: String = args.next()?;
                calls.joins.push((local, name));
                Ok(())
            })
            .register("leave", |calls: &mut Calls, _args| {
                calls.leaves += 1;
                Ok(())
            });
        table
    }

    #[test]
    fn test_dispatch_unregistered_command_is_ignored() {
        let mut calls = Calls::default();
        let outcome = table().dispatch(&mut calls, Message::bare("DANCE"));
        assert_eq!(outcome, Ok(Dispatch::Ignored));
        assert!(calls.joins.is_empty());
        assert_eq!(calls.leaves, 0);
    }

    #[test]
    fn test_dispatch_invokes_exactly_one_handler_with_ordered_args() {
        let mut calls = Calls::default();
        let outcome = table().dispatch(&mut calls, Message::new("join", values!["local-1", "Alice"]));
        assert_eq!(outcome, Ok(Dispatch::Handled));
        assert_eq!(calls.joins, vec![("local-1".to_string(), "Alice".to_string())]);
        assert_eq!(calls.leaves, 0);
    }

    #[test]
    fn test_dispatch_wrong_argument_type_is_101() {
        let mut calls = Calls::default();
        let err = table()
            .dispatch(&mut calls, Message::new("JOIN", values![1_i32, "Alice"]))
            .unwrap_err();
        assert_eq!(err.code, 101);
        assert!(err.message.contains("argument 1"), "{}", err.message);
    }

    #[test]
    fn test_dispatch_missing_argument_is_101() {
        let mut calls = Calls::default();
        let err = table()
            .dispatch(&mut calls, Message::new("JOIN", values!["local-1"]))
            .unwrap_err();
        assert_eq!(err.code, 101);
        assert!(err.message.contains("missing argument 2"), "{}", err.message);
    }

    #[test]
    fn test_contains_ignores_case() {
        let table = table();
        assert!(table.contains("Join"));
        assert!(!table.contains("snapshot"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_rest_collects_remaining_typed_args() {
        let mut args = Args::new(
            CommandName::new("DELTA"),
            values![EntityId::from("a"), EntityId::from("b")],
        );
        let ids: Vec<EntityId> = args.rest().unwrap();
        assert_eq!(ids, vec![EntityId::from("a"), EntityId::from("b")]);
        assert_eq!(args.remaining(), 0);
    }

    #[test]
    fn test_optional_past_end_is_none() {
        let mut args = Args::new(CommandName::new("X"), values![]);
        assert_eq!(args.optional::<i32>().unwrap(), None);
    }
}
