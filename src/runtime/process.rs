//! Process resource
//!
//! The process is itself a dependency: it wants, provides for and readies
//! itself at start-up, and the run loop holds a need on it while running.
//! Releasing it sends it away; it is gone once the last need is withdrawn.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::runtime::depend::{
    DependError, Dependency, Need, Notice, Observer, Provide, Ready, RegistrationId, Signal, Want,
};

/// Process errors
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("process initialization failed at '{step}': {source}")]
    Initialize {
        step: &'static str,
        #[source]
        source: DependError,
    },

    #[error("process need refused: {0}")]
    Need(#[source] DependError),
}

#[derive(Default)]
struct Tokens {
    want: Option<Want>,
    provide: Option<Provide>,
    ready: Option<Ready>,
}

/// The running process
pub struct Process {
    dependency: Dependency,
    tokens: RefCell<Tokens>,
    released: Cell<bool>,
}

impl fmt::Debug for Process {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Process")
            .field("dependency", &self.dependency)
            .field("released", &self.released.get())
            .finish()
    }
}

impl Process {
    /// Create the process and bring it to the ready state.
    ///
    /// Completed steps are undone in reverse order if a later one fails.
    pub fn initialize() -> Result<Rc<Process>, ProcessError> {
        let process = Rc::new(Process {
            dependency: Dependency::new(),
            tokens: RefCell::new(Tokens::default()),
            released: Cell::new(false),
        });
        let dependency = &process.dependency;
        let failed = |step| move |source| ProcessError::Initialize { step, source };

        let want = dependency.want().map_err(failed("want"))?;

        let provide = match dependency.provide() {
            Ok(provide) => provide,
            Err(source) => {
                process.unwind(None, None, want);
                return Err(failed("provide")(source));
            }
        };

        let ready = match dependency.ready() {
            Ok(ready) => ready,
            Err(source) => {
                process.unwind(None, Some(provide), want);
                return Err(failed("ready")(source));
            }
        };

        let observer = Rc::new(ProcessObserver {
            process: Rc::downgrade(&process),
        });
        if let Err(source) = dependency.observe(observer) {
            process.unwind(Some(ready), Some(provide), want);
            return Err(failed("observe")(source));
        }

        *process.tokens.borrow_mut() = Tokens {
            want: Some(want),
            provide: Some(provide),
            ready: Some(ready),
        };
        debug!("process initialized");
        Ok(process)
    }

    fn unwind(
        &self,
        ready: Option<Ready>,
        provide: Option<Provide>,
        want: Want,
    ) {
        if let Some(ready) = ready {
            if let Err(err) = self.dependency.unready(ready) {
                warn!("process readiness could not be withdrawn: {}", err);
            }
        }
        if let Some(provide) = provide {
            if let Err(err) = self.dependency.unprovide(provide) {
                warn!("process provider could not be withdrawn: {}", err);
            }
        }
        if let Err(err) = self.dependency.unwant(want) {
            warn!("process want could not be withdrawn: {}", err);
        }
    }

    #[inline]
    pub fn dependency(&self) -> &Dependency {
        &self.dependency
    }

    /// Register a need; the process stays provided for until it is withdrawn.
    pub fn need(&self) -> Result<Need, ProcessError> {
        self.dependency.need().map_err(ProcessError::Need)
    }

    pub fn unneed(
        &self,
        need: Need,
    ) -> Result<(), DependError> {
        self.dependency.unneed(need)
    }

    /// Send the process away.
    pub fn release(&self) {
        self.dependency.go_away();
    }

    /// Whether the process has been torn down.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.released.get()
    }
}

struct ProcessObserver {
    process: Weak<Process>,
}

impl Observer for ProcessObserver {
    fn notify(
        &self,
        dependency: &Dependency,
        own: RegistrationId,
        notice: Notice,
    ) {
        let Some(process) = self.process.upgrade() else {
            return;
        };
        match notice.signal {
            Signal::GoingAway => {
                let (ready, want, provide) = {
                    let mut tokens = process.tokens.borrow_mut();
                    let provide = if dependency.populations().need == 0 {
                        tokens.provide.take()
                    } else {
                        None
                    };
                    (tokens.ready.take(), tokens.want.take(), provide)
                };
                if let Some(ready) = ready {
                    if let Err(err) = dependency.unready(ready) {
                        warn!("process readiness could not be withdrawn: {}", err);
                    }
                }
                if let Some(want) = want {
                    if let Err(err) = dependency.unwant(want) {
                        warn!("process want could not be withdrawn: {}", err);
                    }
                }
                if let Some(provide) = provide {
                    if let Err(err) = dependency.unprovide(provide) {
                        warn!("process provider could not be withdrawn: {}", err);
                    }
                }
            }
            Signal::NotNeeded => {
                // a ready process may still be needed again
                if dependency.is_ready().is_ok() {
                    return;
                }
                let provide = process.tokens.borrow_mut().provide.take();
                if let Some(provide) = provide {
                    if let Err(err) = dependency.unprovide(provide) {
                        warn!("process provider could not be withdrawn: {}", err);
                    }
                }
            }
            Signal::ObserverDeparted if notice.is_departure_of(own) => {
                process.released.set(true);
                info!("process released");
            }
            _ => {}
        }
    }
}
