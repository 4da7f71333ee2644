//! `cmd_exit`: the `exit` command

use std::rc::Rc;

use crate::runtime::module::{LiveModule, ModuleDescriptor, ModuleEvent};
use crate::runtime::Context;

use super::CommandFn;

pub static MODULE: ModuleDescriptor = ModuleDescriptor::new("cmd_exit", *b"2024120200", event);

const COMMANDS: [(&str, CommandFn); 1] = [("exit", exit)];

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

fn exit(
    context: &Context,
    _args: &[&str],
) -> anyhow::Result<()> {
    context.print("The program is exiting.  Good day to you.")?;
    context.toy().request_shutdown();
    Ok(())
}
