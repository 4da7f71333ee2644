//! `get_user_input`: reads command lines from the console
//!
//! The input work item re-schedules itself at the tail before reading, so
//! work produced by a command runs before the next line is read. At the end
//! of input it takes itself off the queue.

use std::rc::Rc;

use tracing::{debug, error, warn};

use crate::runtime::command::CommandError;
use crate::runtime::module::{LiveModule, ModuleDescriptor, ModuleEvent};
use crate::runtime::scheduler::{WorkKey, WorkResult};
use crate::runtime::Context;

pub static MODULE: ModuleDescriptor =
    ModuleDescriptor::new("get_user_input", *b"2024120200", event);

fn event(
    module: &Rc<LiveModule>,
    event: ModuleEvent<'_>,
) -> anyhow::Result<()> {
    match event {
        ModuleEvent::ThreadStarted(context) => {
            let registered = super::register(context, &[])?;
            super::register_work(context, &registered, "get_user_input", get_user_input)?;
            Ok(())
        }
        ModuleEvent::Unload => {
            super::release(module);
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Strip one trailing line ending (`\n`, `\r\n` or `\r`).
fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

fn get_user_input(
    context: &Context,
    own: WorkKey,
) -> WorkResult {
    let toy = context.toy();
    if toy.shutdown_requested() {
        return Ok(());
    }
    context.schedule_last(own)?;

    let settings = &toy.config().runtime;
    let raw = match toy.console().read_line(&settings.prompt) {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            debug!("end of input");
            toy.cancel_work(own);
            return Ok(());
        }
        Err(err) => {
            error!("Error reading input stream, so command has been ignored: {}", err);
            toy.cancel_work(own);
            return Err(err.into());
        }
    };

    let line = strip_line_ending(&raw);
    if line.contains('\0') {
        let err = CommandError::Ignored("Null character found in input stream");
        warn!("{}", err);
        return Err(err.into());
    }
    if line.len() > settings.max_line_length {
        let err = CommandError::Ignored("Command too long");
        warn!("{}", err);
        return Err(err.into());
    }

    if let Err(err) = toy.dispatch_line(line) {
        context.print(&err.to_string())?;
        return Err(err.into());
    }
    Ok(())
}
