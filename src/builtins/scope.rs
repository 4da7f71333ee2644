//! `cmd_scope`: identifier commands over a scope chain
//!
//! The chain lives in slot 1 of the module and is dropped with it.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{anyhow, bail};

use crate::runtime::module::{LiveModule, ModuleDescriptor, ModuleEvent};
use crate::runtime::scope::{Identifier, ScopeChain};
use crate::runtime::Context;

use super::CommandFn;

pub static MODULE: ModuleDescriptor = ModuleDescriptor::new("cmd_scope", *b"2024120200", event);

const CHAIN_SLOT: usize = 1;

type SharedChain = Rc<RefCell<ScopeChain>>;

const COMMANDS: [(&str, CommandFn); 6] = [
    ("make_identifier", make_identifier),
    ("find_identifier", find_identifier),
    ("delete_identifier", delete_identifier),
    ("list_identifiers", list_identifiers),
    ("push_scope", push_scope),
    ("pop_scope", pop_scope),
];

fn event(
    module: &Rc<LiveModule>,
    event: ModuleEvent<'_>,
) -> anyhow::Result<()> {
    match event {
        ModuleEvent::Loaded => {
            let chain: SharedChain = Rc::new(RefCell::new(ScopeChain::new()));
            module.set_slot(CHAIN_SLOT, chain)?;
            Ok(())
        }
        ModuleEvent::ThreadStarted(context) => {
            super::register(context, &COMMANDS)?;
            Ok(())
        }
        ModuleEvent::Unload => {
            super::release(module);
            module.take_slot::<SharedChain>(CHAIN_SLOT);
            Ok(())
        }
        _ => Ok(()),
    }
}

fn chain(context: &Context) -> anyhow::Result<SharedChain> {
    context
        .module()
        .slot::<SharedChain>(CHAIN_SLOT)
        .ok_or_else(|| anyhow!("scope chain is not available"))
}

fn usage(
    args: &[&str],
    expected: usize,
    text: &str,
) -> anyhow::Result<()> {
    if args.len() != expected {
        bail!("Usage: {}", text);
    }
    Ok(())
}

fn make_identifier(
    context: &Context,
    args: &[&str],
) -> anyhow::Result<()> {
    usage(args, 3, "make_identifier NAME VALUE")?;
    let identifier = Identifier::new(args[1], args[2])?;
    let displaced = chain(context)?.borrow_mut().define(identifier)?;
    match displaced {
        Some(old) => context.print(&format!(
            "Identifier '{}' replaced (was '{}')",
            old.name, old.value
        ))?,
        None => context.print(&format!("Identifier '{}' created", args[1]))?,
    }
    Ok(())
}

fn find_identifier(
    context: &Context,
    args: &[&str],
) -> anyhow::Result<()> {
    usage(args, 2, "find_identifier NAME")?;
    let chain = chain(context)?;
    let chain = chain.borrow();
    let (depth, identifier) = chain
        .find(args[1])
        .ok_or_else(|| anyhow!("Identifier '{}' not found", args[1]))?;
    context.print(&format!(
        "Identifier '{}' is '{}' in scope #{}",
        identifier.name, identifier.value, depth
    ))?;
    Ok(())
}

fn delete_identifier(
    context: &Context,
    args: &[&str],
) -> anyhow::Result<()> {
    usage(args, 2, "delete_identifier NAME")?;
    let removed = chain(context)?.borrow_mut().remove(args[1])?;
    context.print(&format!("Identifier '{}' deleted", removed.name))?;
    Ok(())
}

fn list_identifiers(
    context: &Context,
    args: &[&str],
) -> anyhow::Result<()> {
    usage(args, 1, "list_identifiers")?;
    let chain = chain(context)?;
    let chain = chain.borrow();
    for identifier in chain.innermost().iter() {
        context.print(&format!("{} = {}", identifier.name, identifier.value))?;
    }
    Ok(())
}

fn push_scope(
    context: &Context,
    args: &[&str],
) -> anyhow::Result<()> {
    usage(args, 1, "push_scope")?;
    let chain = chain(context)?;
    chain.borrow_mut().push();
    let depth = chain.borrow().depth();
    context.print(&format!("Scope depth is now {}", depth))?;
    Ok(())
}

fn pop_scope(
    context: &Context,
    args: &[&str],
) -> anyhow::Result<()> {
    usage(args, 1, "pop_scope")?;
    let chain = chain(context)?;
    let popped = chain.borrow_mut().pop()?;
    let depth = chain.borrow().depth();
    context.print(&format!(
        "Scope with {} identifier(s) popped, depth is now {}",
        popped.len(),
        depth
    ))?;
    Ok(())
}
