//! `cmd_help`: the `help` command

use std::rc::Rc;

use crate::runtime::module::{LiveModule, ModuleDescriptor, ModuleEvent};
use crate::runtime::Context;

use super::CommandFn;

pub static MODULE: ModuleDescriptor = ModuleDescriptor::new("cmd_help", *b"2024120200", event);

const COMMANDS: [(&str, CommandFn); 1] = [("help", help)];

fn event(
    module: &Rc<LiveModule>,
    event: ModuleEvent<'_>,
) -> anyhow::Result<()> {
    match event {
        ModuleEvent::ThreadStarted(context) => {
            super::register(context, &COMMANDS)?;
            Ok(())
        }
        ModuleEvent::Unload => {
            super::release(module);
            Ok(())
        }
        _ => Ok(()),
    }
}

/// List every command with the module it belongs to.
fn help(
    context: &Context,
    _args: &[&str],
) -> anyhow::Result<()> {
    context.print("Available commands are:")?;
    for (name, module) in context.toy().command_listing() {
        context.print(&format!("  '{}' from the '{}' module", name, module))?;
    }
    Ok(())
}
