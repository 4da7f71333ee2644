//! Live-module manager
//!
//! Wraps module descriptors as reference-counted [`LiveModule`]s whose
//! lifetime is governed by an embedded [`Dependency`]. Requesting a module
//! whose descriptor already has a live instance shares that instance.
//!
//! A live module is finalized by its own cleanup observer: when its
//! dependency drains, the observer delivers the `unload` event and unlinks
//! the module from the registry.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::path::PathBuf;
use std::rc::{Rc, Weak};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::runtime::depend::{DependError, Dependency, Notice, Observer, RegistrationId, Want};
use crate::runtime::list::{LinkArena, LinkKey, ListHead};
use crate::runtime::toy::{Context, Toy};

pub mod descriptor;
pub mod dynamic;

pub use descriptor::{
    EventHandler, ModuleDescriptor, ModuleEvent, MODULE_API_VERSION, MODULE_SIGNATURE,
    MODULE_SLOTS, MODULE_SYMBOL, SERIAL_LEN,
};
pub use dynamic::PluginImage;


/// Module errors
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("invalid signature for a module")]
    InvalidSignature,

    #[error("unsupported API version {0} for a module")]
    UnsupportedApiVersion(u32),

    #[error("far too many live modules have been created, so could not create one for '{0}'")]
    OrdinalExhausted(String),

    #[error("module '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("module '{name}' failed its {event} event: {reason}")]
    EventFailed {
        name: String,
        event: &'static str,
        reason: String,
    },

    #[error("dependency refused for module '{name}': {source}")]
    Dependency {
        name: String,
        #[source]
        source: DependError,
    },

    #[error("module '{0}' is not loaded")]
    NotLoaded(String),

    #[error("module slot {0} does not exist")]
    SlotOutOfRange(usize),

    #[error("could not open plugin image '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("plugin image '{path}' exports no module descriptor: {source}")]
    MissingSymbol {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
}

/// Identity of the descriptor a live module was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleOrigin(usize);

impl ModuleOrigin {
    #[inline]
    pub fn of(descriptor: &'static ModuleDescriptor) -> Self {
        Self(descriptor as *const ModuleDescriptor as usize)
    }
}

/// Manager bookkeeping kept beside the public part of a live module.
struct ModulePrivate {
    ordinal: Option<u64>,
    registry_key: Cell<Option<LinkKey>>,
}

/// A loaded, reference-counted module instance
pub struct LiveModule {
    descriptor: ModuleDescriptor,
    origin: ModuleOrigin,
    dependency: Dependency,
    loaded: Cell<bool>,
    slots: RefCell<[Option<Box<dyn Any>>; MODULE_SLOTS]>,
    private: ModulePrivate,
}

impl fmt::Debug for LiveModule {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("LiveModule")
            .field("name", &self.name())
            .field("ordinal", &self.private.ordinal)
            .field("loaded", &self.loaded.get())
            .field("dependency", &self.dependency)
            .finish()
    }
}

impl LiveModule {
    fn new(
        descriptor: &'static ModuleDescriptor,
        ordinal: Option<u64>,
    ) -> Self {
        Self {
            descriptor: *descriptor,
            origin: ModuleOrigin::of(descriptor),
            dependency: Dependency::new(),
            loaded: Cell::new(false),
            slots: RefCell::new(Default::default()),
            private: ModulePrivate {
                ordinal,
                registry_key: Cell::new(None),
            },
        }
    }

    /// A module that lives outside the registry and counts as loaded from
    /// the start. The runtime binds its own work to one.
    pub fn host(descriptor: &'static ModuleDescriptor) -> Rc<Self> {
        let module = Self::new(descriptor, None);
        module.loaded.set(true);
        Rc::new(module)
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.descriptor.nice_name
    }

    #[inline]
    pub fn serial(&self) -> &str {
        self.descriptor.serial()
    }

    #[inline]
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    #[inline]
    pub fn origin(&self) -> ModuleOrigin {
        self.origin
    }

    #[inline]
    pub fn dependency(&self) -> &Dependency {
        &self.dependency
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.loaded.get()
    }

    /// Registry ordinal; `None` for host modules.
    #[inline]
    pub fn ordinal(&self) -> Option<u64> {
        self.private.ordinal
    }

    /// Whether the module is still listed in the registry.
    #[inline]
    pub fn is_registered(&self) -> bool {
        self.private.registry_key.get().is_some()
    }

    /// Store a value in a private slot, replacing what was there.
    pub fn set_slot<T: Any>(
        &self,
        index: usize,
        value: T,
    ) -> Result<(), ModuleError> {
        let mut slots = self.slots.borrow_mut();
        let slot = slots
            .get_mut(index)
            .ok_or(ModuleError::SlotOutOfRange(index))?;
        *slot = Some(Box::new(value));
        Ok(())
    }

    /// Clone a value out of a private slot.
    pub fn slot<T: Any + Clone>(
        &self,
        index: usize,
    ) -> Option<T> {
        let slots = self.slots.borrow();
        slots.get(index)?.as_ref()?.downcast_ref::<T>().cloned()
    }

    /// Take a value out of a private slot.
    pub fn take_slot<T: Any>(
        &self,
        index: usize,
    ) -> Option<T> {
        let mut slots = self.slots.borrow_mut();
        let slot = slots.get_mut(index)?;
        match slot.take()?.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                *slot = Some(other);
                None
            }
        }
    }

    // Slot values may have been created by code inside a plugin image, so
    // they must be gone before the image can be closed.
    fn clear_slots(&self) {
        let taken: Vec<_> = self
            .slots
            .borrow_mut()
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        drop(taken);
    }

    fn deliver(
        self: &Rc<Self>,
        event: ModuleEvent<'_>,
    ) -> Result<(), ModuleError> {
        debug!("module '{}' <- {}", self.name(), event.name());
        (self.descriptor.event)(self, event).map_err(|err| ModuleError::EventFailed {
            name: self.name().to_string(),
            event: event.name(),
            reason: format!("{:#}", err),
        })
    }
}

struct Registry {
    modules: RefCell<LinkArena<Rc<LiveModule>>>,
    list: ListHead,
    next_ordinal: Cell<u64>,
}

impl Registry {
    fn new(first_ordinal: u64) -> Self {
        let mut modules = LinkArena::new();
        let list = modules.new_list();
        Self {
            modules: RefCell::new(modules),
            list,
            next_ordinal: Cell::new(first_ordinal),
        }
    }

    fn snapshot(&self) -> Vec<Rc<LiveModule>> {
        let modules = self.modules.borrow();
        modules
            .iter(self.list)
            .filter_map(|key| modules.get(key).cloned())
            .collect()
    }

    fn unlink(
        &self,
        module: &LiveModule,
    ) {
        let Some(key) = module.private.registry_key.take() else {
            return;
        };
        let released = {
            let mut modules = self.modules.borrow_mut();
            if modules.is_linked(key) {
                if let Err(err) = modules.remove(key) {
                    warn!("module '{}' could not be unlinked: {}", module.name(), err);
                }
            }
            modules.free(key)
        };
        if let Err(err) = released {
            warn!("module '{}' registry slot was not released: {}", module.name(), err);
        }
    }
}

/// Terminal observer every live module keeps on its own dependency.
struct ModuleCleanup {
    registry: Weak<Registry>,
    module: Weak<LiveModule>,
}

impl Observer for ModuleCleanup {
    fn notify(
        &self,
        _dependency: &Dependency,
        own: RegistrationId,
        notice: Notice,
    ) {
        if !notice.is_departure_of(own) {
            return;
        }
        let Some(module) = self.module.upgrade() else {
            return;
        };
        if module.is_loaded() {
            match module.deliver(ModuleEvent::Unload) {
                Ok(()) => info!("Module '{}' was unloaded", module.name()),
                // it is unlinked regardless
                Err(err) => warn!("{}", err),
            }
        }
        module.loaded.set(false);
        module.clear_slots();
        if let Some(registry) = self.registry.upgrade() {
            registry.unlink(&module);
        }
    }
}

/// Registry of live modules
#[derive(Clone)]
pub struct ModuleManager {
    registry: Rc<Registry>,
}

impl Default for ModuleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ModuleManager {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ModuleManager")
            .field("modules", &self.len())
            .field("next_ordinal", &self.registry.next_ordinal.get())
            .finish()
    }
}

impl ModuleManager {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            registry: Rc::new(Registry::new(0)),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_first_ordinal(ordinal: u64) -> Self {
        Self {
            registry: Rc::new(Registry::new(ordinal)),
        }
    }

    /// Registered modules in registration order.
    pub fn modules(&self) -> Vec<Rc<LiveModule>> {
        self.registry.snapshot()
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        let modules = self.registry.modules.borrow();
        modules.len(self.registry.list)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.registry.modules.borrow().is_empty(self.registry.list)
    }

    /// Look a registered module up by ordinal.
    pub fn find_by_ordinal(
        &self,
        ordinal: u64,
    ) -> Option<Rc<LiveModule>> {
        self.modules()
            .into_iter()
            .find(|module| module.ordinal() == Some(ordinal))
    }

    /// Look a registered module up by display name.
    pub fn find_by_name(
        &self,
        name: &str,
    ) -> Option<Rc<LiveModule>> {
        self.modules()
            .into_iter()
            .find(|module| module.name() == name)
    }

    fn find_by_origin(
        &self,
        origin: ModuleOrigin,
    ) -> Option<Rc<LiveModule>> {
        self.modules()
            .into_iter()
            .find(|module| module.origin() == origin)
    }

    /// Get the live module for a descriptor, creating it on first request.
    ///
    /// The caller receives a want on the module either way.
    pub fn live_module_from_module(
        &self,
        descriptor: &'static ModuleDescriptor,
    ) -> Result<(Rc<LiveModule>, Want), ModuleError> {
        if let Err(err) = descriptor.validate() {
            warn!("{}", err);
            return Err(err);
        }
        let name = descriptor.nice_name;

        if let Some(existing) = self.find_by_origin(ModuleOrigin::of(descriptor)) {
            let want = existing
                .dependency
                .want()
                .map_err(|source| ModuleError::Dependency {
                    name: name.to_string(),
                    source,
                })?;
            debug!("module '{}' shared", name);
            return Ok((existing, want));
        }

        let ordinal = self.registry.next_ordinal.get();
        if ordinal == u64::MAX {
            error!("far too many live modules have been created, so could not create one for '{}'", name);
            return Err(ModuleError::OrdinalExhausted(name.to_string()));
        }
        self.registry.next_ordinal.set(ordinal + 1);

        let module = Rc::new(LiveModule::new(descriptor, Some(ordinal)));
        let refused = |source| ModuleError::Dependency {
            name: name.to_string(),
            source,
        };
        let want = module.dependency.want().map_err(refused)?;
        let cleanup = Rc::new(ModuleCleanup {
            registry: Rc::downgrade(&self.registry),
            module: Rc::downgrade(&module),
        });
        match module.dependency.observe(cleanup) {
            // the observer is drained at teardown
            Ok(_cleanup) => {}
            Err(source) => {
                if let Err(err) = module.dependency.unwant(want) {
                    warn!("module '{}' want could not be withdrawn: {}", name, err);
                }
                return Err(refused(source));
            }
        }

        let key = {
            let mut modules = self.registry.modules.borrow_mut();
            let key = modules.insert(Rc::clone(&module));
            if let Err(err) = modules.push_back(self.registry.list, key) {
                warn!("module '{}' could not be registered: {}", name, err);
            }
            key
        };
        module.private.registry_key.set(Some(key));
        debug!("module '{}' created as #{}", name, ordinal);
        Ok((module, want))
    }

    /// Deliver `loaded` and mark the module loaded.
    pub fn load(
        &self,
        module: &Rc<LiveModule>,
    ) -> Result<(), ModuleError> {
        if module.is_loaded() {
            warn!("module '{}' already loaded", module.name());
            return Err(ModuleError::AlreadyLoaded(module.name().to_string()));
        }
        module.deliver(ModuleEvent::Loaded).inspect_err(|err| {
            warn!("{}", err);
        })?;
        module.loaded.set(true);
        Ok(())
    }

    /// Deliver `thread_started` with the module's execution context.
    pub fn thread_started(
        &self,
        module: &Rc<LiveModule>,
        context: &Context,
    ) -> Result<(), ModuleError> {
        module
            .deliver(ModuleEvent::ThreadStarted(context))
            .inspect_err(|err| {
                warn!("{}", err);
            })
    }

    /// Start tearing a loaded module down.
    ///
    /// The module finalizes once every holder has released its want.
    pub fn unload(
        &self,
        module: &Rc<LiveModule>,
    ) {
        if !module.is_loaded() {
            return;
        }
        debug!("module '{}' unload requested", module.name());
        module.dependency.go_away();
    }

    /// Unload every registered module.
    ///
    /// The registry is moved aside first and entries are put back one at a
    /// time before each is unloaded, so teardown unlinking modules cannot
    /// disturb the walk.
    pub fn unload_all(&self) {
        let list = self.registry.list;
        let swap = {
            let mut modules = self.registry.modules.borrow_mut();
            let swap = modules.new_list();
            if let Err(err) = modules.splice_back(list, swap) {
                error!("could not move the module registry aside: {}", err);
                return;
            }
            swap
        };

        loop {
            let module = {
                let mut modules = self.registry.modules.borrow_mut();
                let Some(key) = modules.pop_front(swap) else {
                    break;
                };
                if let Err(err) = modules.push_back(list, key) {
                    // leaking the entry is better than corrupting the registry
                    error!("module registry entry lost during unload: {}", err);
                    continue;
                }
                modules.get(key).cloned()
            };
            if let Some(module) = module {
                self.unload(&module);
            }
        }

        self.registry.modules.borrow_mut().drop_list(swap);
    }

    /// Offer every registered module `unload_requested`.
    pub fn request_shutdown(&self) {
        for module in self.modules() {
            if let Err(err) = module.deliver(ModuleEvent::UnloadRequested) {
                warn!("{}", err);
            }
        }
    }

    /// Deliver `thread_started` to every registered module.
    pub fn start_thread(
        &self,
        toy: &Toy,
    ) -> Result<(), ModuleError> {
        for module in self.modules() {
            let context = Context::new(toy.clone(), Rc::clone(&module));
            self.thread_started(&module, &context)?;
        }
        Ok(())
    }
}
