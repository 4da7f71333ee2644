//! The toy runtime handle
//!
//! [`Toy`] ties the work queue, module registry, command table and console
//! together. Work items and commands run with a [`Context`]: the runtime plus
//! the live module they are bound to.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::io;
use std::rc::{Rc, Weak};

use tracing::{debug, error, info, warn};

use crate::builtins;
use crate::runtime::command::{split_line, Command, CommandError, CommandId, CommandTable};
use crate::runtime::console::Console;
use crate::runtime::module::{LiveModule, ModuleDescriptor, ModuleEvent, ModuleManager};
use crate::runtime::process::Process;
use crate::runtime::scheduler::{self, Dispatch, WorkError, WorkKey, WorkQueue, WorkResult};
use crate::util::config::ToyConfig;

fn host_event(
    _module: &Rc<LiveModule>,
    event: ModuleEvent<'_>,
) -> anyhow::Result<()> {
    anyhow::bail!("the host module does not handle '{}'", event.name())
}

/// Descriptor of the module the runtime's own work is bound to.
pub static HOST_MODULE: ModuleDescriptor = ModuleDescriptor::new("toy", *b"2024120200", host_event);

struct Shared {
    config: ToyConfig,
    host: Rc<LiveModule>,
    queue: RefCell<WorkQueue>,
    modules: ModuleManager,
    commands: RefCell<CommandTable>,
    console: Console,
    shutdown_requested: Cell<bool>,
}

/// Shared handle to the runtime
#[derive(Clone)]
pub struct Toy(Rc<Shared>);

/// Non-owning runtime handle, for state kept inside modules.
#[derive(Clone)]
pub struct WeakToy(Weak<Shared>);

impl WeakToy {
    pub fn upgrade(&self) -> Option<Toy> {
        self.0.upgrade().map(Toy)
    }
}

impl fmt::Debug for WeakToy {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str("WeakToy")
    }
}

impl fmt::Debug for Toy {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Toy")
            .field("queue", &*self.0.queue.borrow())
            .field("modules", &self.0.modules)
            .field("shutdown_requested", &self.0.shutdown_requested.get())
            .finish()
    }
}

impl Toy {
    pub fn new(
        config: ToyConfig,
        console: Console,
    ) -> Self {
        Self(Rc::new(Shared {
            config,
            host: LiveModule::host(&HOST_MODULE),
            queue: RefCell::new(WorkQueue::new()),
            modules: ModuleManager::new(),
            commands: RefCell::new(CommandTable::new()),
            console,
            shutdown_requested: Cell::new(false),
        }))
    }

    #[inline]
    pub fn config(&self) -> &ToyConfig {
        &self.0.config
    }

    /// The host module runtime work is bound to.
    #[inline]
    pub fn host(&self) -> &Rc<LiveModule> {
        &self.0.host
    }

    #[inline]
    pub fn modules(&self) -> &ModuleManager {
        &self.0.modules
    }

    #[inline]
    pub fn console(&self) -> &Console {
        &self.0.console
    }

    pub fn downgrade(&self) -> WeakToy {
        WeakToy(Rc::downgrade(&self.0))
    }

    // ========== Work ==========

    /// Store an unscheduled work item.
    pub fn create_work(
        &self,
        label: &'static str,
        work: impl Fn(&Context, WorkKey) -> WorkResult + 'static,
    ) -> WorkKey {
        self.0.queue.borrow_mut().create(label, Rc::new(work))
    }

    /// Append a work item, bound to `module`.
    pub fn schedule_last(
        &self,
        module: &Rc<LiveModule>,
        key: WorkKey,
    ) -> Result<(), WorkError> {
        self.0.queue.borrow_mut().schedule_last(module, key)
    }

    /// Prepend a work item, bound to `module`.
    pub fn schedule_next(
        &self,
        module: &Rc<LiveModule>,
        key: WorkKey,
    ) -> Result<(), WorkError> {
        self.0.queue.borrow_mut().schedule_next(module, key)
    }

    pub fn is_scheduled(
        &self,
        key: WorkKey,
    ) -> bool {
        self.0.queue.borrow().is_scheduled(key)
    }

    /// Take a work item off the queue without forgetting it.
    pub fn cancel_work(
        &self,
        key: WorkKey,
    ) -> bool {
        self.0.queue.borrow_mut().cancel(key)
    }

    /// Cancel and forget a work item.
    pub fn destroy_work(
        &self,
        key: WorkKey,
    ) -> Result<(), WorkError> {
        self.0.queue.borrow_mut().destroy(key)
    }

    /// Number of scheduled work items.
    pub fn pending_work(&self) -> usize {
        self.0.queue.borrow().len()
    }

    pub(crate) fn pop_work(&self) -> Option<Dispatch> {
        self.0.queue.borrow_mut().pop()
    }

    // ========== Shutdown ==========

    /// Ask every module to wind down. Only the first call has an effect.
    pub fn request_shutdown(&self) {
        if self.0.shutdown_requested.replace(true) {
            return;
        }
        info!("Shutdown requested");
        self.0.modules.request_shutdown();
    }

    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.0.shutdown_requested.get()
    }

    // ========== Commands ==========

    pub fn add_command(
        &self,
        command: Command,
    ) -> CommandId {
        debug!("command '{}' registered", command.name());
        self.0.commands.borrow_mut().add(command)
    }

    pub fn remove_command(
        &self,
        id: CommandId,
    ) -> Option<Command> {
        self.0.commands.borrow_mut().remove(id)
    }

    /// Every command with the name of its owning module, in lookup order.
    pub fn command_listing(&self) -> Vec<(String, String)> {
        self.0
            .commands
            .borrow()
            .iter()
            .map(|command| {
                let owner = command.owner_name().unwrap_or_else(|| "?".to_string());
                (command.name().to_string(), owner)
            })
            .collect()
    }

    /// Split a line and run the first command matching its first word.
    ///
    /// Blank lines succeed without running anything.
    pub fn dispatch_line(
        &self,
        line: &str,
    ) -> Result<(), CommandError> {
        let args = split_line(line)?;
        let Some(&name) = args.first() else {
            return Ok(());
        };
        let resolved = self
            .0
            .commands
            .borrow()
            .resolve(name)
            .ok_or_else(|| CommandError::Unrecognized(name.to_string()))?;
        let module = resolved
            .owner
            .upgrade()
            .unwrap_or_else(|| Rc::clone(self.host()));
        let context = Context::new(self.clone(), module);
        (resolved.handler)(&context, &args).map_err(|source| CommandError::Failed {
            name: name.to_string(),
            source,
        })
    }

    // ========== Run ==========

    /// Run the toy until no work remains.
    ///
    /// Start-up and the shutdown checker are scheduled first; the process
    /// is needed for as long as the loop runs.
    pub fn run(&self) -> WorkResult {
        let process = Process::initialize()?;
        let need = process.need()?;

        let host = Rc::clone(self.host());
        let startup = self.create_work("startup", startup);
        let checker = self.create_work("shutdown_checker", scheduler::shutdown_checker);
        self.schedule_last(&host, startup)?;
        self.schedule_last(&host, checker)?;

        let outcome = scheduler::run(self);

        for key in [startup, checker] {
            if let Err(err) = self.destroy_work(key) {
                debug!("runtime work item already gone: {}", err);
            }
        }
        process.release();
        process.unneed(need)?;
        outcome
    }
}

/// First work item: load the built-in modules, start them, then load the
/// configured plugin images.
fn startup(
    context: &Context,
    _own: WorkKey,
) -> WorkResult {
    let toy = context.toy();
    builtins::startup(toy)?;

    if let Err(err) = toy.modules().start_thread(toy) {
        error!("{}", err);
        toy.request_shutdown();
        return Err(err.into());
    }

    for path in &toy.config().modules.autoload {
        if let Err(err) = builtins::loader::autoload(toy, path) {
            warn!("could not load '{}': {}", path.display(), err);
        }
    }
    Ok(())
}

/// What a work item or command runs with
#[derive(Clone)]
pub struct Context {
    toy: Toy,
    module: Rc<LiveModule>,
}

impl fmt::Debug for Context {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Context")
            .field("module", &self.module.name())
            .finish()
    }
}

impl Context {
    pub fn new(
        toy: Toy,
        module: Rc<LiveModule>,
    ) -> Self {
        Self { toy, module }
    }

    #[inline]
    pub fn toy(&self) -> &Toy {
        &self.toy
    }

    /// The live module this context is bound to.
    #[inline]
    pub fn module(&self) -> &Rc<LiveModule> {
        &self.module
    }

    /// Append a work item bound to this context's module.
    pub fn schedule_last(
        &self,
        key: WorkKey,
    ) -> Result<(), WorkError> {
        self.toy.schedule_last(&self.module, key)
    }

    /// Prepend a work item bound to this context's module.
    pub fn schedule_next(
        &self,
        key: WorkKey,
    ) -> Result<(), WorkError> {
        self.toy.schedule_next(&self.module, key)
    }

    /// Write a line to the console.
    pub fn print(
        &self,
        line: &str,
    ) -> io::Result<()> {
        self.toy.console().write_line(line)
    }
}
