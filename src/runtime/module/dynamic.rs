//! Plugin images loaded with `libloading`

use std::fmt;
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use tracing::{debug, warn};

use super::{ModuleDescriptor, ModuleError, MODULE_SYMBOL};

/// An opened plugin image and the descriptor it exports
pub struct PluginImage {
    path: PathBuf,
    library: Option<Library>,
    descriptor: &'static ModuleDescriptor,
}

impl fmt::Debug for PluginImage {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("PluginImage")
            .field("path", &self.path)
            .field("open", &self.library.is_some())
            .field("descriptor", self.descriptor)
            .finish()
    }
}

impl PluginImage {
    /// Open the image at `path` and resolve its exported descriptor.
    pub fn open(path: &Path) -> Result<Self, ModuleError> {
        // SAFETY: opening an image runs its initialisers. Plugin images are
        // host extensions built against this crate.
        let library = unsafe { Library::new(path) }.map_err(|source| ModuleError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        // SAFETY: `TOY_MODULE` is a `ModuleDescriptor` static (see
        // `export_module!`). The reference is only valid while the image is
        // open; the loader keeps it open until the module has been torn down.
        let descriptor: &'static ModuleDescriptor = unsafe {
            let symbol: Symbol<'_, *const ModuleDescriptor> =
                library
                    .get(MODULE_SYMBOL)
                    .map_err(|source| ModuleError::MissingSymbol {
                        path: path.to_path_buf(),
                        source,
                    })?;
            let exported: *const ModuleDescriptor = *symbol;
            &*exported
        };
        debug!(
            "plugin image '{}' exports module '{}'",
            path.display(),
            descriptor.nice_name
        );

        Ok(Self {
            path: path.to_path_buf(),
            library: Some(library),
            descriptor,
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The exported descriptor.
    #[inline]
    pub fn descriptor(&self) -> &'static ModuleDescriptor {
        self.descriptor
    }

    /// Close the image. Nothing derived from it may run afterwards.
    pub fn close(mut self) -> Result<(), libloading::Error> {
        match self.library.take() {
            Some(library) => library.close(),
            None => Ok(()),
        }
    }
}

impl Drop for PluginImage {
    fn drop(&mut self) {
        if let Some(library) = self.library.take() {
            if let Err(err) = library.close() {
                warn!("plugin image '{}' did not close: {}", self.path.display(), err);
            }
        }
    }
}
