//! Dependency lifecycle engine
//!
//! A [`Dependency`] is embedded in the resource it guards and tracks five
//! registration sets:
//!
//! - `want`: claims keeping the resource alive
//! - `need`: outstanding to-dos gating readiness
//! - `provide`: active fulfillers
//! - `ready`: fulfillers confirmed operational
//! - `observe`: lifecycle subscribers, notified newest first
//!
//! plus a going-away flag. The resource is ready iff it is not going away and
//! `provide`, `ready` and `want` are all populated. Once going away with
//! `need`, `provide`, `ready` and `want` all drained, every observer receives
//! its own departure and is dropped; that is the resource's teardown.
//!
//! Notifications are delivered synchronously and observers may call back
//! into the dependency. Each broadcast pins the `want` set with a sentinel
//! entry for its duration, so teardown cannot fire under a running walk; it
//! is re-checked when the pin is removed.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::runtime::list::{LinkArena, LinkKey, ListHead};

mod registration;

pub use registration::{
    DependencyId, Need, Notice, Observe, Observer, Provide, Ready, RegistrationId, Signal, Want,
};

#[cfg(test)]
mod tests;

/// Dependency errors
///
/// All of them are precondition failures: nothing was changed and the call
/// may be retried once the state allows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DependError {
    #[error("registration does not belong to this dependency")]
    InvalidRegistration,

    #[error("dependency is going away")]
    GoingAway,

    #[error("dependency is gone")]
    Gone,

    #[error("dependency is not ready")]
    NotReady,

    #[error("dependency is not wanted")]
    NotWanted,

    #[error("dependency is not yet provided")]
    NotYetProvided,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Pin,
    Want,
    Need,
    Provide,
    Ready,
    Observe,
}

enum Entry {
    Pin,
    Want,
    Need,
    Provide,
    Ready,
    Observe(Rc<dyn Observer>),
}

impl Entry {
    fn kind(&self) -> Kind {
        match self {
            Entry::Pin => Kind::Pin,
            Entry::Want => Kind::Want,
            Entry::Need => Kind::Need,
            Entry::Provide => Kind::Provide,
            Entry::Ready => Kind::Ready,
            Entry::Observe(_) => Kind::Observe,
        }
    }
}

struct State {
    links: LinkArena<Entry>,
    want: ListHead,
    need: ListHead,
    provide: ListHead,
    ready: ListHead,
    observe: ListHead,
    /// Wants excluding broadcast pins.
    wants: usize,
    going_away: bool,
    /// Nesting depth of `go_away` broadcasts; teardown waits for zero.
    departing: usize,
}

impl State {
    fn new() -> Self {
        let mut links = LinkArena::new();
        let want = links.new_list();
        let need = links.new_list();
        let provide = links.new_list();
        let ready = links.new_list();
        let observe = links.new_list();
        Self {
            links,
            want,
            need,
            provide,
            ready,
            observe,
            wants: 0,
            going_away: false,
            departing: 0,
        }
    }

    fn list(
        &self,
        kind: Kind,
    ) -> ListHead {
        match kind {
            Kind::Pin | Kind::Want => self.want,
            Kind::Need => self.need,
            Kind::Provide => self.provide,
            Kind::Ready => self.ready,
            Kind::Observe => self.observe,
        }
    }

    #[inline]
    fn has(
        &self,
        kind: Kind,
    ) -> bool {
        match kind {
            Kind::Want => self.wants > 0,
            other => !self.links.is_empty(self.list(other)),
        }
    }

    fn admit(
        &mut self,
        entry: Entry,
    ) -> LinkKey {
        let kind = entry.kind();
        let list = self.list(kind);
        let key = self.links.insert(entry);
        let linked = match kind {
            Kind::Observe => self.links.push_front(list, key),
            _ => self.links.push_back(list, key),
        };
        debug_assert!(linked.is_ok());
        if kind == Kind::Want {
            self.wants += 1;
        }
        key
    }

    fn withdraw(
        &mut self,
        key: LinkKey,
        kind: Kind,
    ) -> Result<Entry, DependError> {
        match self.links.get(key) {
            Some(entry) if entry.kind() == kind => {}
            _ => return Err(DependError::InvalidRegistration),
        }
        if self.links.is_linked(key) {
            self.links
                .remove(key)
                .map_err(|_| DependError::InvalidRegistration)?;
        }
        let entry = self
            .links
            .free(key)
            .map_err(|_| DependError::InvalidRegistration)?;
        if kind == Kind::Want {
            self.wants -= 1;
        }
        Ok(entry)
    }

    fn is_releasable(&self) -> bool {
        self.going_away
            && self.departing == 0
            && self.links.is_empty(self.need)
            && self.links.is_empty(self.provide)
            && self.links.is_empty(self.ready)
            && self.links.is_empty(self.want)
    }
}

static NEXT_DEPENDENCY: AtomicU64 = AtomicU64::new(1);

/// Registration counts of a dependency, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Populations {
    pub want: usize,
    pub need: usize,
    pub provide: usize,
    pub ready: usize,
    pub observe: usize,
    pub going_away: bool,
}

/// Lifecycle state of one shared resource
pub struct Dependency {
    id: DependencyId,
    state: RefCell<State>,
}

impl Default for Dependency {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dependency {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("id", &self.id.0)
            .field("populations", &self.populations())
            .finish()
    }
}

impl Dependency {
    /// Create a dependency with every set empty.
    pub fn new() -> Self {
        Self {
            id: DependencyId(NEXT_DEPENDENCY.fetch_add(1, Ordering::Relaxed)),
            state: RefCell::new(State::new()),
        }
    }

    #[inline]
    pub fn id(&self) -> DependencyId {
        self.id
    }

    #[inline]
    fn registration(
        &self,
        key: LinkKey,
    ) -> RegistrationId {
        RegistrationId {
            dependency: self.id,
            key,
        }
    }

    fn own(
        &self,
        id: RegistrationId,
    ) -> Result<LinkKey, DependError> {
        if id.dependency == self.id {
            Ok(id.key)
        } else {
            Err(DependError::InvalidRegistration)
        }
    }

    fn admit(
        &self,
        entry: Entry,
    ) -> RegistrationId {
        let key = self.state.borrow_mut().admit(entry);
        self.registration(key)
    }

    fn withdraw(
        &self,
        id: RegistrationId,
        kind: Kind,
    ) -> Result<Entry, DependError> {
        let key = self.own(id)?;
        self.state.borrow_mut().withdraw(key, kind)
    }

    #[inline]
    fn has(
        &self,
        kind: Kind,
    ) -> bool {
        self.state.borrow().has(kind)
    }

    /// Whether `go_away` has been called.
    #[inline]
    pub fn is_going_away(&self) -> bool {
        self.state.borrow().going_away
    }

    /// Current registration counts.
    pub fn populations(&self) -> Populations {
        let state = self.state.borrow();
        Populations {
            want: state.wants,
            need: state.links.len(state.need),
            provide: state.links.len(state.provide),
            ready: state.links.len(state.ready),
            observe: state.links.len(state.observe),
            going_away: state.going_away,
        }
    }

    /// Report readiness, or the most specific reason it is lacking.
    pub fn is_ready(&self) -> Result<(), DependError> {
        let state = self.state.borrow();
        if state.going_away {
            Err(DependError::GoingAway)
        } else if !state.has(Kind::Provide) {
            Err(DependError::NotYetProvided)
        } else if !state.has(Kind::Ready) {
            Err(DependError::NotReady)
        } else if !state.has(Kind::Want) {
            Err(DependError::NotWanted)
        } else {
            Ok(())
        }
    }

    /// Whether some provider is still registered.
    pub fn meets_needs(&self) -> Result<(), DependError> {
        if self.has(Kind::Provide) {
            Ok(())
        } else {
            Err(DependError::Gone)
        }
    }

    /// Register a claim keeping the resource alive.
    pub fn want(&self) -> Result<Want, DependError> {
        if self.is_going_away() {
            return Err(DependError::GoingAway);
        }
        let id = self.admit(Entry::Want);
        self.broadcast(Signal::WantArrived, Some(id));
        Ok(Want(id))
    }

    /// Withdraw a want; the last one sends the resource away.
    pub fn unwant(
        &self,
        want: Want,
    ) -> Result<(), DependError> {
        self.withdraw(want.0, Kind::Want)?;
        self.broadcast(Signal::WantDeparted, Some(want.0));
        if !self.has(Kind::Want) {
            self.go_away();
        }
        Ok(())
    }

    /// Register an outstanding need; only a ready resource accepts one.
    pub fn need(&self) -> Result<Need, DependError> {
        self.is_ready()?;
        let id = self.admit(Entry::Need);
        self.broadcast(Signal::NeedArrived, Some(id));
        Ok(Need(id))
    }

    /// Withdraw a need.
    pub fn unneed(
        &self,
        need: Need,
    ) -> Result<(), DependError> {
        self.withdraw(need.0, Kind::Need)?;
        self.broadcast(Signal::NeedDeparted, Some(need.0));
        if !self.has(Kind::Need) {
            self.broadcast(Signal::NotNeeded, None);
        }
        self.check_release();
        Ok(())
    }

    /// Register a provider. A going-away resource only accepts one while
    /// needs are outstanding.
    pub fn provide(&self) -> Result<Provide, DependError> {
        {
            let state = self.state.borrow();
            if state.going_away && !state.has(Kind::Need) {
                return Err(DependError::Gone);
            }
        }
        let id = self.admit(Entry::Provide);
        self.broadcast(Signal::ProviderArrived, Some(id));
        Ok(Provide(id))
    }

    /// Withdraw a provider; the last one sends the resource away.
    pub fn unprovide(
        &self,
        provide: Provide,
    ) -> Result<(), DependError> {
        self.withdraw(provide.0, Kind::Provide)?;
        self.broadcast(Signal::ProviderDeparted, Some(provide.0));
        if !self.has(Kind::Provide) {
            self.go_away();
        }
        Ok(())
    }

    /// Confirm a provider is operational.
    pub fn ready(&self) -> Result<Ready, DependError> {
        let was_ready = {
            let state = self.state.borrow();
            if state.going_away {
                return Err(DependError::GoingAway);
            }
            if !state.has(Kind::Provide) {
                return Err(DependError::NotYetProvided);
            }
            if !state.has(Kind::Want) {
                return Err(DependError::NotWanted);
            }
            state.has(Kind::Ready)
        };
        let id = self.admit(Entry::Ready);
        self.broadcast(Signal::ReadinessProviderArrived, Some(id));
        if !was_ready {
            self.broadcast(Signal::NowReady, None);
        }
        Ok(Ready(id))
    }

    /// Withdraw a readiness confirmation.
    pub fn unready(
        &self,
        ready: Ready,
    ) -> Result<(), DependError> {
        self.withdraw(ready.0, Kind::Ready)?;
        self.broadcast(Signal::ReadinessProviderDeparted, Some(ready.0));
        let lost_readiness = {
            let state = self.state.borrow();
            !state.has(Kind::Ready)
                && !state.going_away
                && state.has(Kind::Provide)
                && state.has(Kind::Want)
        };
        if lost_readiness {
            self.broadcast(Signal::NotReady, None);
        }
        Ok(())
    }

    /// Subscribe to lifecycle notifications.
    pub fn observe(
        &self,
        observer: Rc<dyn Observer>,
    ) -> Result<Observe, DependError> {
        {
            let state = self.state.borrow();
            if state.going_away {
                return Err(DependError::GoingAway);
            }
            if !state.has(Kind::Want) {
                return Err(DependError::NotWanted);
            }
        }
        let id = self.admit(Entry::Observe(observer));
        self.broadcast(Signal::ObserverArrived, Some(id));
        Ok(Observe(id))
    }

    /// Cancel a subscription. The departing observer is not told.
    pub fn unobserve(
        &self,
        observe: Observe,
    ) -> Result<(), DependError> {
        self.withdraw(observe.0, Kind::Observe)?;
        self.broadcast(Signal::ObserverDeparted, Some(observe.0));
        Ok(())
    }

    /// Start shutting the resource down. Idempotent.
    pub fn go_away(&self) {
        let was_ready = {
            let mut state = self.state.borrow_mut();
            if state.going_away {
                None
            } else {
                state.going_away = true;
                state.departing += 1;
                Some(state.has(Kind::Provide) && state.has(Kind::Ready) && state.has(Kind::Want))
            }
        };
        if let Some(was_ready) = was_ready {
            debug!("dependency #{} going away", self.id.0);
            if was_ready {
                self.broadcast(Signal::NotReady, None);
            }
            self.broadcast(Signal::GoingAway, None);
            self.state.borrow_mut().departing -= 1;
        }
        self.check_release();
    }

    /// Tear down once going away with every set but `observe` drained.
    fn check_release(&self) {
        let holder = {
            let mut state = self.state.borrow_mut();
            if !state.is_releasable() {
                return;
            }
            if state.links.is_empty(state.observe) {
                trace!("dependency #{} released with no observers", self.id.0);
                return;
            }
            let holder = state.links.new_list();
            let observe = state.observe;
            if let Err(err) = state.links.splice_back(observe, holder) {
                warn!("dependency #{} could not detach observers: {}", self.id.0, err);
                return;
            }
            holder
        };

        debug!("dependency #{} releasing observers", self.id.0);
        loop {
            let (key, entry) = {
                let mut state = self.state.borrow_mut();
                let Some(key) = state.links.pop_front(holder) else {
                    break;
                };
                (key, state.links.free(key))
            };
            if let Ok(Entry::Observe(observer)) = entry {
                let id = self.registration(key);
                observer.notify(
                    self,
                    id,
                    Notice {
                        signal: Signal::ObserverDeparted,
                        subject: Some(id),
                    },
                );
            }
        }
        self.state.borrow_mut().links.drop_list(holder);
    }

    /// Deliver a notification to every observer, newest first.
    fn broadcast(
        &self,
        signal: Signal,
        subject: Option<RegistrationId>,
    ) {
        let (pin, observers) = {
            let mut state = self.state.borrow_mut();
            let pin = state.admit(Entry::Pin);
            let observers: SmallVec<[LinkKey; 8]> = state.links.iter(state.observe).collect();
            (pin, observers)
        };
        trace!(
            "dependency #{} broadcasting {:?} to {} observer(s)",
            self.id.0,
            signal,
            observers.len()
        );

        for key in observers {
            // skip observers withdrawn earlier in this walk
            let observer = {
                let state = self.state.borrow();
                match state.links.get(key) {
                    Some(Entry::Observe(observer)) if state.links.is_linked(key) => {
                        Rc::clone(observer)
                    }
                    _ => continue,
                }
            };
            observer.notify(self, self.registration(key), Notice { signal, subject });
        }

        let going_away = {
            let mut state = self.state.borrow_mut();
            if let Err(err) = state.withdraw(pin, Kind::Pin) {
                warn!("dependency #{} lost its broadcast pin: {}", self.id.0, err);
            }
            state.going_away
        };
        if going_away {
            self.check_release();
        }
    }
}
