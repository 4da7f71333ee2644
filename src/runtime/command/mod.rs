//! Command table
//!
//! Modules register named commands; input lines are split on whitespace and
//! dispatched to the first command whose name matches exactly. Commands
//! added later shadow earlier ones with the same name.

use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use thiserror::Error;

use crate::runtime::list::{LinkArena, LinkKey, ListHead};
use crate::runtime::module::LiveModule;
use crate::runtime::toy::Context;

#[cfg(test)]
mod tests;

/// Most arguments (including the command name) a line may carry.
pub const MAX_ARGS: usize = 11;

/// Arguments of one command line; `args[0]` is the command name.
pub type Args<'a> = SmallVec<[&'a str; MAX_ARGS]>;

/// Command handler.
pub type CommandHandler = Rc<dyn Fn(&Context, &[&str]) -> anyhow::Result<()>>;

/// Command errors
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("more than {max} arguments for command, so it has been ignored")]
    TooManyArguments { max: usize },

    #[error("{0}, so command has been ignored")]
    Ignored(&'static str),

    #[error("Awful command or file name: '{0}'")]
    Unrecognized(String),

    #[error("command '{name}' failed: {source:#}")]
    Failed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A named command owned by a live module
pub struct Command {
    name: String,
    handler: CommandHandler,
    owner: Weak<LiveModule>,
}

impl fmt::Debug for Command {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("owner", &self.owner_name())
            .finish()
    }
}

impl Command {
    pub fn new(
        name: impl Into<String>,
        owner: &Rc<LiveModule>,
        handler: impl Fn(&Context, &[&str]) -> anyhow::Result<()> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            handler: Rc::new(handler),
            owner: Rc::downgrade(owner),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the owning module, if it is still alive.
    pub fn owner_name(&self) -> Option<String> {
        self.owner.upgrade().map(|module| module.name().to_string())
    }
}

/// Handle to a registered command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId(LinkKey);

/// A command picked for a line, detached from the table for the call.
pub struct Resolved {
    pub handler: CommandHandler,
    pub owner: Weak<LiveModule>,
}

/// Registered commands, newest first
pub struct CommandTable {
    entries: LinkArena<Command>,
    list: ListHead,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommandTable {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl CommandTable {
    pub fn new() -> Self {
        let mut entries = LinkArena::new();
        let list = entries.new_list();
        Self { entries, list }
    }

    /// Register a command ahead of every existing one.
    pub fn add(
        &mut self,
        command: Command,
    ) -> CommandId {
        let key = self.entries.insert(command);
        let _ = self.entries.push_front(self.list, key);
        CommandId(key)
    }

    /// Unregister a command.
    pub fn remove(
        &mut self,
        id: CommandId,
    ) -> Option<Command> {
        if self.entries.is_linked(id.0) {
            self.entries.remove(id.0).ok()?;
        }
        self.entries.free(id.0).ok()
    }

    /// First command named `name`.
    pub fn resolve(
        &self,
        name: &str,
    ) -> Option<Resolved> {
        self.iter()
            .find(|command| command.name == name)
            .map(|command| Resolved {
                handler: Rc::clone(&command.handler),
                owner: command.owner.clone(),
            })
    }

    /// Commands in lookup order.
    pub fn iter(&self) -> impl Iterator<Item = &Command> + '_ {
        self.entries
            .iter(self.list)
            .filter_map(|key| self.entries.get(key))
    }

    pub fn len(&self) -> usize {
        self.entries.len(self.list)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty(self.list)
    }
}

/// Split a line on whitespace into at most [`MAX_ARGS`] arguments.
pub fn split_line(line: &str) -> Result<Args<'_>, CommandError> {
    let mut args = Args::new();
    for word in line.split_whitespace() {
        if args.len() == MAX_ARGS {
            return Err(CommandError::TooManyArguments { max: MAX_ARGS });
        }
        args.push(word);
    }
    Ok(args)
}
