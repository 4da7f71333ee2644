//! `cmd_load`: module listing and plugin images
//!
//! `load PATH` opens a plugin image and loads the module it exports. The
//! loader pins its own module once per image, and a cleanup observer on the
//! loaded module closes the image only after that module has been torn down.

use std::cell::RefCell;
use std::path::Path;
use std::rc::{Rc, Weak};

use anyhow::{anyhow, bail, Context as _};
use tracing::{debug, error, info, warn};

use crate::runtime::depend::{Dependency, Notice, Observer, RegistrationId, Signal, Want};
use crate::runtime::module::{LiveModule, ModuleDescriptor, ModuleError, ModuleEvent, PluginImage};
use crate::runtime::{Context, Toy, ToyError, WeakToy};

use super::CommandFn;

pub static MODULE: ModuleDescriptor = ModuleDescriptor::new("cmd_load", *b"2024120200", event);

const COMMANDS: [(&str, CommandFn); 3] = [
    ("list_modules", list_modules),
    ("load", load),
    ("unload", unload),
];

const USAGE: &str = "Usage:\n  list_modules         List loaded modules\n  load FILENAME        Load a module\n  unload MODULENUMBER  Unload a module";

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

fn list_modules(
    context: &Context,
    args: &[&str],
) -> anyhow::Result<()> {
    if args.len() != 1 {
        bail!(USAGE);
    }
    for module in context.toy().modules().modules() {
        let ordinal = module.ordinal().unwrap_or_default();
        context.print(&format!(
            "Module #{} with serial '{}' is named '{}'",
            ordinal,
            module.serial(),
            module.name()
        ))?;
    }
    Ok(())
}

fn load(
    context: &Context,
    args: &[&str],
) -> anyhow::Result<()> {
    if args.len() != 2 {
        bail!(USAGE);
    }
    let module = load_plugin(context, Path::new(args[1]))?;
    context.print(&format!("Module '{}' loaded", module.name()))?;
    Ok(())
}

fn unload(
    context: &Context,
    args: &[&str],
) -> anyhow::Result<()> {
    if args.len() != 2 {
        bail!(USAGE);
    }
    let ordinal: u64 = parse_ordinal(args[1])
        .with_context(|| format!("Specified module-number '{}' is not a valid number", args[1]))?;
    let modules = context.toy().modules();
    let module = modules
        .find_by_ordinal(ordinal)
        .ok_or_else(|| anyhow!("Could not find loaded module #{}", ordinal))?;
    modules.unload(&module);
    context.print("Requested module to be unloaded")?;
    Ok(())
}

/// Decimal, `0x` hexadecimal or leading-zero octal.
fn parse_ordinal(text: &str) -> Result<u64, std::num::ParseIntError> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        u64::from_str_radix(&text[1..], 8)
    } else {
        text.parse()
    }
}

/// Load the plugin image at `path` on behalf of the loader module.
pub fn autoload(
    toy: &Toy,
    path: &Path,
) -> Result<Rc<LiveModule>, ToyError> {
    let loader = toy
        .modules()
        .find_by_name(MODULE.nice_name)
        .filter(|module| module.is_loaded())
        .ok_or_else(|| ModuleError::NotLoaded(MODULE.nice_name.to_string()))?;
    let context = Context::new(toy.clone(), loader);
    let module = load_plugin(&context, path)?;
    info!("Module '{}' loaded from '{}'", module.name(), path.display());
    Ok(module)
}

#[derive(Default)]
struct CleanupTokens {
    want: Option<Want>,
    pin: Option<Want>,
    image: Option<PluginImage>,
}

/// Observer kept on a module loaded from a plugin image.
struct PluginCleanup {
    toy: WeakToy,
    loader: Weak<LiveModule>,
    tokens: RefCell<CleanupTokens>,
}

impl PluginCleanup {
    fn take(&self) -> CleanupTokens {
        std::mem::take(&mut *self.tokens.borrow_mut())
    }

    /// Schedule the closer on the loader; it runs right after the current work.
    fn schedule_closer(&self) {
        let CleanupTokens { pin, image, .. } = self.take();
        let (Some(toy), Some(loader)) = (self.toy.upgrade(), self.loader.upgrade()) else {
            error!("Unable to clean up loaded module, so it's been leaked");
            std::mem::forget(image);
            return;
        };
        let held = RefCell::new(Some((image, pin)));
        let closer = toy.create_work("plugin_closer", move |context, own| {
            let Some((image, pin)) = held.borrow_mut().take() else {
                return Ok(());
            };
            if let Some(image) = image {
                let path = image.path().display().to_string();
                match image.close() {
                    Ok(()) => info!("plugin image '{}' closed", path),
                    Err(err) => warn!("A module was unloaded, but closing '{}' failed: {}", path, err),
                }
            }
            if let Some(pin) = pin {
                context.module().dependency().unwant(pin)?;
            }
            context.toy().destroy_work(own)?;
            Ok(())
        });
        if let Err(err) = toy.schedule_next(&loader, closer) {
            error!("Unable to clean up loaded module, so it's been leaked: {}", err);
        }
    }
}

impl Observer for PluginCleanup {
    fn notify(
        &self,
        dependency: &Dependency,
        own: RegistrationId,
        notice: Notice,
    ) {
        match notice.signal {
            Signal::GoingAway => {
                let want = self.tokens.borrow_mut().want.take();
                if let Some(want) = want {
                    if let Err(err) = dependency.unwant(want) {
                        warn!("loaded module want could not be withdrawn: {}", err);
                    }
                }
            }
            Signal::ObserverDeparted if notice.is_departure_of(own) => self.schedule_closer(),
            _ => {}
        }
    }
}

/// Open `path`, load the module it exports and start its thread.
///
/// `context` must be bound to the loader module, which stays pinned until
/// the image has been closed.
fn load_plugin(
    context: &Context,
    path: &Path,
) -> Result<Rc<LiveModule>, ToyError> {
    let image = PluginImage::open(path)?;
    let descriptor = image.descriptor();
    load_exported(context, descriptor, Some(image))
}

/// Load the module `descriptor` describes and start its thread.
///
/// `image`, when given, is closed by the loader once the module has been
/// torn down.
pub(super) fn load_exported(
    context: &Context,
    descriptor: &'static ModuleDescriptor,
    image: Option<PluginImage>,
) -> Result<Rc<LiveModule>, ToyError> {
    let toy = context.toy();
    let loader = context.module();
    let modules = toy.modules();

    let (module, want) = modules.live_module_from_module(descriptor)?;

    let pin = match loader.dependency().want() {
        Ok(pin) => pin,
        Err(err) => {
            if let Err(unwant) = module.dependency().unwant(want) {
                warn!("want on '{}' could not be withdrawn: {}", module.name(), unwant);
            }
            drop(module);
            return Err(err.into());
        }
    };

    let cleanup = Rc::new(PluginCleanup {
        toy: toy.downgrade(),
        loader: Rc::downgrade(loader),
        tokens: RefCell::new(CleanupTokens {
            want: Some(want),
            pin: Some(pin),
            image,
        }),
    });
    let observe = match module.dependency().observe(cleanup.clone()) {
        Ok(observe) => observe,
        Err(err) => {
            let image = release_tokens(loader, &module, cleanup.take());
            drop(module);
            drop(image);
            return Err(err.into());
        }
    };

    // From here on the cleanup observer owns the image and both wants.
    if let Err(err) = modules.load(&module) {
        if let Err(unobserve) = module.dependency().unobserve(observe) {
            warn!("plugin cleanup on '{}' could not be removed: {}", module.name(), unobserve);
        }
        let image = release_tokens(loader, &module, cleanup.take());
        drop(module);
        drop(image);
        return Err(err.into());
    }

    let started = Context::new(toy.clone(), Rc::clone(&module));
    if let Err(err) = modules.thread_started(&module, &started) {
        modules.unload(&module);
        return Err(err.into());
    }
    debug!("plugin module '{}' started", module.name());
    Ok(module)
}

/// Withdraw both wants of a plugin module that never loaded. The image is
/// handed back so it can be closed after the last module handle is gone.
fn release_tokens(
    loader: &Rc<LiveModule>,
    module: &Rc<LiveModule>,
    tokens: CleanupTokens,
) -> Option<PluginImage> {
    let CleanupTokens { want, pin, image } = tokens;
    if let Some(want) = want {
        if let Err(err) = module.dependency().unwant(want) {
            warn!("want on '{}' could not be withdrawn: {}", module.name(), err);
        }
    }
    if let Some(pin) = pin {
        if let Err(err) = loader.dependency().unwant(pin) {
            warn!("loader pin could not be withdrawn: {}", err);
        }
    }
    image
}
