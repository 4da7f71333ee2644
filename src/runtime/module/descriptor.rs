//! Module descriptor contract
//!
//! A descriptor is the static record a module hands to the host: signature,
//! serial, API version, event callback and display name. Plugin images
//! export one under [`MODULE_SYMBOL`] with [`export_module!`].

use std::fmt;
use std::rc::Rc;

use crate::runtime::toy::Context;

use super::{LiveModule, ModuleError};

/// Leading bytes of every descriptor.
pub const MODULE_SIGNATURE: [u8; 6] = *b"MoDuLe";

/// Length of the serial field.
pub const SERIAL_LEN: usize = 10;

/// Lowest API version the host understands.
pub const MODULE_API_VERSION: u32 = 1;

/// Number of private per-module slots on a live module.
pub const MODULE_SLOTS: usize = 4;

/// Exported symbol name of a plugin image's descriptor.
pub const MODULE_SYMBOL: &[u8] = b"TOY_MODULE";

/// Lifecycle events delivered to a module's callback
#[derive(Clone, Copy)]
pub enum ModuleEvent<'a> {
    /// The live module exists and may set up its slots.
    Loaded,
    /// The scheduler is running; the module may register commands and work.
    ThreadStarted(&'a Context),
    ThreadStopRequested,
    ThreadStopped,
    /// Shutdown has been requested; the module may release what it holds.
    UnloadRequested,
    /// Final event; everything the module owns must be released.
    Unload,
}

impl ModuleEvent<'_> {
    /// Event name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ModuleEvent::Loaded => "loaded",
            ModuleEvent::ThreadStarted(_) => "thread_started",
            ModuleEvent::ThreadStopRequested => "thread_stop_requested",
            ModuleEvent::ThreadStopped => "thread_stopped",
            ModuleEvent::UnloadRequested => "unload_requested",
            ModuleEvent::Unload => "unload",
        }
    }
}

impl fmt::Debug for ModuleEvent<'_> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Module event callback.
pub type EventHandler = fn(&Rc<LiveModule>, ModuleEvent<'_>) -> anyhow::Result<()>;

/// Static description of a module
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ModuleDescriptor {
    pub signature: [u8; 6],
    pub serial: [u8; SERIAL_LEN],
    pub api_version: u32,
    pub event: EventHandler,
    pub nice_name: &'static str,
}

impl ModuleDescriptor {
    /// Descriptor with the current signature and API version.
    pub const fn new(
        nice_name: &'static str,
        serial: [u8; SERIAL_LEN],
        event: EventHandler,
    ) -> Self {
        Self {
            signature: MODULE_SIGNATURE,
            serial,
            api_version: MODULE_API_VERSION,
            event,
            nice_name,
        }
    }

    /// Serial as text.
    pub fn serial(&self) -> &str {
        std::str::from_utf8(&self.serial)
            .unwrap_or("??????????")
            .trim_end_matches('\0')
    }

    /// Reject descriptors the host cannot drive.
    pub fn validate(&self) -> Result<(), ModuleError> {
        if self.signature != MODULE_SIGNATURE {
            return Err(ModuleError::InvalidSignature);
        }
        if self.api_version < MODULE_API_VERSION {
            return Err(ModuleError::UnsupportedApiVersion(self.api_version));
        }
        Ok(())
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("nice_name", &self.nice_name)
            .field("serial", &self.serial())
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// Export a descriptor from a plugin image.
///
/// ```ignore
/// cmdtoy::export_module!("hello", *b"2024120200", hello_event);
/// ```
#[macro_export]
macro_rules! export_module {
    ($name:expr, $serial:expr, $event:expr) => {
        #[no_mangle]
        pub static TOY_MODULE: $crate::runtime::module::ModuleDescriptor =
            $crate::runtime::module::ModuleDescriptor::new($name, $serial, $event);
    };
}
