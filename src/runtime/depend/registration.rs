//! Registration tokens, notifications and the observer seam

use std::fmt;

use crate::runtime::list::LinkKey;

use super::Dependency;

/// Identity of a dependency instance; tokens remember which one issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependencyId(pub(super) u64);

/// Identity of a single registration on a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId {
    pub(super) dependency: DependencyId,
    pub(super) key: LinkKey,
}

impl fmt::Display for RegistrationId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "#{}.{}", self.dependency.0, self.key.index())
    }
}

macro_rules! registration_token {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, PartialEq, Eq)]
        #[must_use = "dropping a registration token leaves the registration in place with no way to withdraw it"]
        pub struct $name(pub(super) RegistrationId);

        impl $name {
            #[inline]
            pub fn id(&self) -> RegistrationId {
                self.0
            }
        }
    };
}

registration_token!(
    /// A claim keeping a dependency alive.
    Want
);
registration_token!(
    /// An outstanding to-do gating readiness.
    Need
);
registration_token!(
    /// An active fulfiller.
    Provide
);
registration_token!(
    /// Confirmation that a provider is operational.
    Ready
);
registration_token!(
    /// A lifecycle subscription.
    Observe
);

/// Lifecycle notifications broadcast to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    WantArrived,
    WantDeparted,
    NeedArrived,
    NeedDeparted,
    NotNeeded,
    ProviderArrived,
    ProviderDeparted,
    ReadinessProviderArrived,
    ReadinessProviderDeparted,
    NowReady,
    NotReady,
    GoingAway,
    ObserverArrived,
    ObserverDeparted,
}

/// One delivered notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notice {
    pub signal: Signal,
    /// The registration the notification is about, when there is one.
    pub subject: Option<RegistrationId>,
}

impl Notice {
    /// Whether this is the departure of the observer registered as `own`.
    #[inline]
    pub fn is_departure_of(
        &self,
        own: RegistrationId,
    ) -> bool {
        self.signal == Signal::ObserverDeparted && self.subject == Some(own)
    }
}

/// A lifecycle subscriber.
///
/// `own` is the id of the observer's registration on `dependency`. After the
/// observer receives its own departure it is never called again, and the
/// dependency drops its handle to it.
pub trait Observer {
    fn notify(
        &self,
        dependency: &Dependency,
        own: RegistrationId,
        notice: Notice,
    );
}

impl<F> Observer for F
where
    F: Fn(&Dependency, RegistrationId, Notice),
{
    fn notify(
        &self,
        dependency: &Dependency,
        own: RegistrationId,
        notice: Notice,
    ) {
        self(dependency, own, notice)
    }
}
