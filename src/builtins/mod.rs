//! Built-in modules
//!
//! Modules compiled into the binary and loaded by the start-up work item.
//! They are held together by an aggregate dependency: each built-in wants
//! the aggregate until its own module has been torn down, so the aggregate
//! drains only after every built-in is gone.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, error, info, warn};

use crate::runtime::command::{Command, CommandId};
use crate::runtime::depend::{Dependency, Notice, Observe, Observer, RegistrationId, Signal, Want};
use crate::runtime::module::{LiveModule, ModuleDescriptor, ModuleManager};
use crate::runtime::scheduler::WorkKey;
use crate::runtime::{Context, Toy, ToyError, WeakToy};

pub mod exit;
pub mod help;
pub mod input;
pub mod loader;
pub mod scope;


/// Every built-in module, in start-up order.
pub static BUILTINS: [&ModuleDescriptor; 5] = [
    &exit::MODULE,
    &help::MODULE,
    &loader::MODULE,
    &scope::MODULE,
    &input::MODULE,
];

/// Look a built-in descriptor up by name.
pub fn descriptor(name: &str) -> Option<&'static ModuleDescriptor> {
    BUILTINS
        .iter()
        .copied()
        .find(|descriptor| descriptor.nice_name == name)
}

/// Command handler of a built-in.
pub type CommandFn = fn(&Context, &[&str]) -> anyhow::Result<()>;

/// What a built-in registered while its thread ran, kept in slot 0.
pub(crate) struct Registered {
    toy: WeakToy,
    commands: RefCell<Vec<CommandId>>,
    work: Cell<Option<WorkKey>>,
}

impl Registered {
    /// Slot holding the registration record.
    pub(crate) const SLOT: usize = 0;
}

/// Register `commands` for the module `context` is bound to.
pub(crate) fn register(
    context: &Context,
    commands: &[(&'static str, CommandFn)],
) -> anyhow::Result<Rc<Registered>> {
    let module = context.module();
    let registered = Rc::new(Registered {
        toy: context.toy().downgrade(),
        commands: RefCell::new(Vec::with_capacity(commands.len())),
        work: Cell::new(None),
    });
    for &(name, handler) in commands {
        let id = context.toy().add_command(Command::new(name, module, handler));
        registered.commands.borrow_mut().push(id);
    }
    if let Err(err) = module.set_slot(Registered::SLOT, Rc::clone(&registered)) {
        withdraw(&registered);
        return Err(err.into());
    }
    Ok(registered)
}

/// Create a work item for the module `context` is bound to and schedule it
/// at the tail.
pub(crate) fn register_work(
    context: &Context,
    registered: &Registered,
    label: &'static str,
    work: fn(&Context, WorkKey) -> crate::runtime::scheduler::WorkResult,
) -> anyhow::Result<WorkKey> {
    let key = context.toy().create_work(label, work);
    registered.work.set(Some(key));
    context.schedule_last(key)?;
    Ok(key)
}

fn withdraw(registered: &Registered) {
    let Some(toy) = registered.toy.upgrade() else {
        return;
    };
    for id in registered.commands.borrow_mut().drain(..) {
        toy.remove_command(id);
    }
    if let Some(key) = registered.work.take() {
        if let Err(err) = toy.destroy_work(key) {
            warn!("work item could not be released: {}", err);
        }
    }
}

/// Undo what [`register`] and [`register_work`] did for `module`.
pub(crate) fn release(module: &Rc<LiveModule>) {
    if let Some(registered) = module.take_slot::<Rc<Registered>>(Registered::SLOT) {
        withdraw(&registered);
    }
}

/// The aggregate resource every built-in wants.
struct Aggregate {
    dependency: Dependency,
}

/// Reports once every built-in has been released.
struct AggregateCleanup;

impl Observer for AggregateCleanup {
    fn notify(
        &self,
        _dependency: &Dependency,
        own: RegistrationId,
        notice: Notice,
    ) {
        if notice.is_departure_of(own) {
            info!("All built-in modules have been released");
        }
    }
}

#[derive(Default)]
struct BuiltinTokens {
    aggregate_want: Option<Want>,
    module_want: Option<Want>,
}

/// Observer a built-in start-up keeps on each built-in live module.
struct BuiltinCleanup {
    aggregate: Rc<Aggregate>,
    tokens: RefCell<BuiltinTokens>,
}

impl Observer for BuiltinCleanup {
    fn notify(
        &self,
        dependency: &Dependency,
        own: RegistrationId,
        notice: Notice,
    ) {
        match notice.signal {
            Signal::GoingAway => {
                let want = self.tokens.borrow_mut().module_want.take();
                if let Some(want) = want {
                    if let Err(err) = dependency.unwant(want) {
                        warn!("built-in module want could not be withdrawn: {}", err);
                    }
                }
            }
            Signal::ObserverDeparted if notice.is_departure_of(own) => {
                let want = self.tokens.borrow_mut().aggregate_want.take();
                if let Some(want) = want {
                    if let Err(err) = self.aggregate.dependency.unwant(want) {
                        warn!("built-in aggregate want could not be withdrawn: {}", err);
                    }
                }
            }
            _ => {}
        }
    }
}

struct Staged {
    module: Rc<LiveModule>,
    cleanup: Rc<BuiltinCleanup>,
    observe: Option<Observe>,
}

/// Load the configured built-in modules.
///
/// On failure every completed step is undone in reverse order and shutdown
/// is requested.
pub fn startup(toy: &Toy) -> Result<(), ToyError> {
    let mut selected: Vec<&'static ModuleDescriptor> = Vec::new();
    for name in &toy.config().modules.builtins {
        match descriptor(name) {
            Some(found) if selected.iter().any(|seen| std::ptr::eq(*seen, found)) => {
                warn!("built-in module '{}' listed twice", name);
            }
            Some(found) => selected.push(found),
            None => warn!("unknown built-in module '{}' ignored", name),
        }
    }
    if selected.is_empty() {
        return Ok(());
    }

    let result = acquire(toy.modules(), &selected);
    if let Err(err) = &result {
        error!("built-in modules failed to start: {}", err);
        toy.request_shutdown();
    }
    result
}

fn acquire(
    modules: &ModuleManager,
    selected: &[&'static ModuleDescriptor],
) -> Result<(), ToyError> {
    let aggregate = Rc::new(Aggregate {
        dependency: Dependency::new(),
    });
    let temp_want = aggregate.dependency.want()?;
    if let Err(err) = aggregate.dependency.observe(Rc::new(AggregateCleanup)) {
        if let Err(unwant) = aggregate.dependency.unwant(temp_want) {
            warn!("aggregate want could not be withdrawn: {}", unwant);
        }
        return Err(err.into());
    }

    let mut aggregate_wants = Vec::with_capacity(selected.len());
    for _ in selected {
        match aggregate.dependency.want() {
            Ok(want) => aggregate_wants.push(want),
            Err(err) => {
                unwind(modules, &aggregate, Vec::new(), aggregate_wants, temp_want);
                return Err(err.into());
            }
        }
    }

    let mut staged = Vec::with_capacity(selected.len());
    let mut spare = aggregate_wants.into_iter();
    for &wanted in selected {
        match modules.live_module_from_module(wanted) {
            Ok((module, module_want)) => {
                let cleanup = Rc::new(BuiltinCleanup {
                    aggregate: Rc::clone(&aggregate),
                    tokens: RefCell::new(BuiltinTokens {
                        aggregate_want: spare.next(),
                        module_want: Some(module_want),
                    }),
                });
                staged.push(Staged {
                    module,
                    cleanup,
                    observe: None,
                });
            }
            Err(err) => {
                unwind(modules, &aggregate, staged, spare.collect(), temp_want);
                return Err(err.into());
            }
        }
    }

    for index in 0..staged.len() {
        let cleanup: Rc<dyn Observer> = staged[index].cleanup.clone();
        let observed = staged[index].module.dependency().observe(cleanup);
        match observed {
            Ok(observe) => staged[index].observe = Some(observe),
            Err(err) => {
                unwind(modules, &aggregate, staged, Vec::new(), temp_want);
                return Err(err.into());
            }
        }
    }

    for index in 0..staged.len() {
        let loaded = modules.load(&staged[index].module);
        if let Err(err) = loaded {
            unwind(modules, &aggregate, staged, Vec::new(), temp_want);
            return Err(err.into());
        }
    }

    // the built-ins now hold the aggregate
    aggregate.dependency.unwant(temp_want)?;
    debug!("{} built-in module(s) loaded", staged.len());
    Ok(())
}

fn unwind(
    modules: &ModuleManager,
    aggregate: &Aggregate,
    staged: Vec<Staged>,
    spare: Vec<Want>,
    temp_want: Want,
) {
    for entry in staged.into_iter().rev() {
        if entry.module.is_loaded() {
            // its cleanup observer withdraws both wants
            modules.unload(&entry.module);
            continue;
        }
        if let Some(observe) = entry.observe {
            if let Err(err) = entry.module.dependency().unobserve(observe) {
                warn!("cleanup observer on '{}' could not be removed: {}", entry.module.name(), err);
            }
        }
        let tokens = std::mem::take(&mut *entry.cleanup.tokens.borrow_mut());
        if let Some(want) = tokens.module_want {
            if let Err(err) = entry.module.dependency().unwant(want) {
                warn!("want on '{}' could not be withdrawn: {}", entry.module.name(), err);
            }
        }
        if let Some(want) = tokens.aggregate_want {
            release_aggregate(aggregate, want);
        }
    }
    for want in spare.into_iter().rev() {
        release_aggregate(aggregate, want);
    }
    release_aggregate(aggregate, temp_want);
}

fn release_aggregate(
    aggregate: &Aggregate,
    want: Want,
) {
    if let Err(err) = aggregate.dependency.unwant(want) {
        warn!("aggregate want could not be withdrawn: {}", err);
    }
}
