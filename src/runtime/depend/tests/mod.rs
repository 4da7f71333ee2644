//! Dependency 单元测试
//!
//! 测试 want/need/provide/ready/observe 状态机、广播顺序与重入

use std::cell::RefCell;
use std::rc::Rc;

use crate::runtime::depend::{
    DependError, Dependency, Notice, Observer, Populations, RegistrationId, Signal, Want,
};

type Log = Rc<RefCell<Vec<(&'static str, Signal)>>>;

/// Observer that records every notification it receives.
struct Recorder {
    name: &'static str,
    log: Log,
}

impl Observer for Recorder {
    fn notify(
        &self,
        _dependency: &Dependency,
        _own: RegistrationId,
        notice: Notice,
    ) {
        self.log.borrow_mut().push((self.name, notice.signal));
    }
}

fn recorder(
    name: &'static str,
    log: &Log,
) -> Rc<dyn Observer> {
    Rc::new(Recorder {
        name,
        log: log.clone(),
    })
}

fn signals(log: &Log) -> Vec<Signal> {
    log.borrow().iter().map(|(_, signal)| *signal).collect()
}

#[cfg(test)]
mod readiness_tests {
    use super::*;

    #[test]
    fn test_fresh_dependency_state() {
        let dep = Dependency::new();
        assert_eq!(dep.populations(), Populations::default());
        assert_eq!(dep.is_ready(), Err(DependError::NotYetProvided));
        assert_eq!(dep.meets_needs(), Err(DependError::Gone));
    }

    #[test]
    fn test_scenario_full_lifecycle() {
        let log: Log = Rc::default();
        let dep = Dependency::new();

        let want = dep.want().unwrap();
        let _observe = dep.observe(recorder("watcher", &log)).unwrap();
        assert_eq!(dep.need().unwrap_err(), DependError::NotYetProvided);
        assert_eq!(dep.is_ready(), Err(DependError::NotYetProvided));

        let provide = dep.provide().unwrap();
        assert_eq!(dep.is_ready(), Err(DependError::NotReady));
        let ready = dep.ready().unwrap();
        assert_eq!(dep.is_ready(), Ok(()));
        let need = dep.need().unwrap();

        dep.unwant(want).unwrap();
        assert!(dep.is_going_away());
        assert_eq!(dep.is_ready(), Err(DependError::GoingAway));
        assert_eq!(dep.populations().observe, 1);

        dep.unneed(need).unwrap();
        dep.unready(ready).unwrap();
        assert_eq!(dep.populations().observe, 1);
        dep.unprovide(provide).unwrap();
        assert_eq!(dep.populations().observe, 0);

        assert_eq!(
            signals(&log),
            vec![
                Signal::ObserverArrived,
                Signal::ProviderArrived,
                Signal::ReadinessProviderArrived,
                Signal::NowReady,
                Signal::NeedArrived,
                Signal::WantDeparted,
                Signal::GoingAway,
                Signal::NeedDeparted,
                Signal::NotNeeded,
                Signal::ReadinessProviderDeparted,
                Signal::ProviderDeparted,
                Signal::ObserverDeparted,
            ]
        );
    }

    #[test]
    fn test_is_ready_does_not_mutate() {
        let dep = Dependency::new();
        let _want = dep.want().unwrap();
        let _provide = dep.provide().unwrap();
        let before = dep.populations();
        for _ in 0..3 {
            let _ = dep.is_ready();
            let _ = dep.meets_needs();
        }
        assert_eq!(dep.populations(), before);
    }

    #[test]
    fn test_ready_reasons() {
        let dep = Dependency::new();
        assert_eq!(dep.ready().unwrap_err(), DependError::NotYetProvided);
        let _provide = dep.provide().unwrap();
        assert_eq!(dep.ready().unwrap_err(), DependError::NotWanted);
        let _want = dep.want().unwrap();
        let _ready = dep.ready().unwrap();
        assert_eq!(dep.is_ready(), Ok(()));
    }

    #[test]
    fn test_second_ready_is_not_now_ready() {
        let log: Log = Rc::default();
        let dep = Dependency::new();
        let _want = dep.want().unwrap();
        let _observe = dep.observe(recorder("w", &log)).unwrap();
        let _provide = dep.provide().unwrap();
        let _first = dep.ready().unwrap();
        let _second = dep.ready().unwrap();
        let now_ready = signals(&log)
            .into_iter()
            .filter(|signal| *signal == Signal::NowReady)
            .count();
        assert_eq!(now_ready, 1);
    }

    #[test]
    fn test_unready_last_emits_not_ready() {
        let log: Log = Rc::default();
        let dep = Dependency::new();
        let _want = dep.want().unwrap();
        let _observe = dep.observe(recorder("w", &log)).unwrap();
        let _provide = dep.provide().unwrap();
        let ready = dep.ready().unwrap();
        log.borrow_mut().clear();
        dep.unready(ready).unwrap();
        assert_eq!(
            signals(&log),
            vec![Signal::ReadinessProviderDeparted, Signal::NotReady]
        );
        assert_eq!(dep.is_ready(), Err(DependError::NotReady));
    }

    #[test]
    fn test_unprovide_last_goes_away() {
        let dep = Dependency::new();
        let _want = dep.want().unwrap();
        let provide = dep.provide().unwrap();
        dep.unprovide(provide).unwrap();
        assert!(dep.is_going_away());
    }
}

#[cfg(test)]
mod going_away_tests {
    use super::*;

    #[test]
    fn test_going_away_refuses_registrations() {
        let dep = Dependency::new();
        let want = dep.want().unwrap();
        let _provide = dep.provide().unwrap();
        let _ready = dep.ready().unwrap();
        dep.unwant(want).unwrap();

        assert_eq!(dep.want().unwrap_err(), DependError::GoingAway);
        assert_eq!(dep.need().unwrap_err(), DependError::GoingAway);
        assert_eq!(dep.ready().unwrap_err(), DependError::GoingAway);
        assert_eq!(dep.provide().unwrap_err(), DependError::Gone);
        let log: Log = Rc::default();
        assert_eq!(
            dep.observe(recorder("late", &log)).unwrap_err(),
            DependError::GoingAway
        );
    }

    #[test]
    fn test_provide_accepted_while_needed() {
        let dep = Dependency::new();
        let want = dep.want().unwrap();
        let _provide = dep.provide().unwrap();
        let _ready = dep.ready().unwrap();
        let _need = dep.need().unwrap();
        dep.unwant(want).unwrap();
        let extra = dep.provide();
        assert!(extra.is_ok());
        assert_eq!(dep.populations().provide, 2);
    }

    #[test]
    fn test_go_away_is_idempotent() {
        let log: Log = Rc::default();
        let dep = Dependency::new();
        let _want = dep.want().unwrap();
        let _observe = dep.observe(recorder("w", &log)).unwrap();
        dep.go_away();
        dep.go_away();
        let going = signals(&log)
            .into_iter()
            .filter(|signal| *signal == Signal::GoingAway)
            .count();
        assert_eq!(going, 1);
    }

    #[test]
    fn test_go_away_when_not_ready_skips_not_ready() {
        let log: Log = Rc::default();
        let dep = Dependency::new();
        let _want = dep.want().unwrap();
        let _observe = dep.observe(recorder("w", &log)).unwrap();
        log.borrow_mut().clear();
        dep.go_away();
        assert_eq!(signals(&log), vec![Signal::GoingAway]);
    }

    #[test]
    fn test_go_away_when_ready_reports_not_ready_first() {
        let log: Log = Rc::default();
        let dep = Dependency::new();
        let _want = dep.want().unwrap();
        let _observe = dep.observe(recorder("w", &log)).unwrap();
        let _provide = dep.provide().unwrap();
        let _ready = dep.ready().unwrap();
        log.borrow_mut().clear();
        dep.go_away();
        assert_eq!(signals(&log), vec![Signal::NotReady, Signal::GoingAway]);
    }

    #[test]
    fn test_release_waits_for_all_sets() {
        let log: Log = Rc::default();
        let dep = Dependency::new();
        let want = dep.want().unwrap();
        let _observe = dep.observe(recorder("w", &log)).unwrap();
        let provide = dep.provide().unwrap();
        dep.unwant(want).unwrap();
        assert!(!signals(&log).contains(&Signal::ObserverDeparted));
        dep.unprovide(provide).unwrap();
        assert_eq!(signals(&log).last(), Some(&Signal::ObserverDeparted));
    }

    #[test]
    fn test_release_reaches_observers_in_lifo_order() {
        let log: Log = Rc::default();
        let dep = Dependency::new();
        let want = dep.want().unwrap();
        for name in ["first", "second", "third"] {
            let _ = dep.observe(recorder(name, &log)).unwrap();
        }
        log.borrow_mut().clear();
        dep.unwant(want).unwrap();

        let departures: Vec<&str> = log
            .borrow()
            .iter()
            .filter(|(_, signal)| *signal == Signal::ObserverDeparted)
            .map(|(name, _)| *name)
            .collect();
        assert_eq!(departures, vec!["third", "second", "first"]);
        assert_eq!(dep.populations().observe, 0);
    }

    #[test]
    fn test_broadcast_is_lifo() {
        let log: Log = Rc::default();
        let dep = Dependency::new();
        let _want = dep.want().unwrap();
        let _a = dep.observe(recorder("a", &log)).unwrap();
        let _b = dep.observe(recorder("b", &log)).unwrap();
        log.borrow_mut().clear();
        let _provide = dep.provide().unwrap();
        let order: Vec<&str> = log.borrow().iter().map(|(name, _)| *name).collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn test_observer_dropped_after_release() {
        let log: Log = Rc::default();
        let observer = recorder("w", &log);
        let dep = Dependency::new();
        let want = dep.want().unwrap();
        let _observe = dep.observe(observer.clone()).unwrap();
        assert_eq!(Rc::strong_count(&observer), 2);
        dep.unwant(want).unwrap();
        assert_eq!(Rc::strong_count(&observer), 1);
    }
}

#[cfg(test)]
mod registration_tests {
    use super::*;

    #[test]
    fn test_foreign_token_rejected() {
        let a = Dependency::new();
        let b = Dependency::new();
        let want_a = a.want().unwrap();
        let _want_b = b.want().unwrap();
        assert_eq!(b.unwant(want_a), Err(DependError::InvalidRegistration));
        assert_eq!(a.populations().want, 1);
        assert!(!b.is_going_away());
    }

    #[test]
    fn test_unobserve_notifies_remaining() {
        let log: Log = Rc::default();
        let dep = Dependency::new();
        let _want = dep.want().unwrap();
        let _stay = dep.observe(recorder("stay", &log)).unwrap();
        let leave = dep.observe(recorder("leave", &log)).unwrap();
        let leave_id = leave.id();
        log.borrow_mut().clear();
        dep.unobserve(leave).unwrap();
        assert_eq!(*log.borrow(), vec![("stay", Signal::ObserverDeparted)]);
        assert_ne!(leave_id, _stay.id());
    }

    #[test]
    fn test_need_requires_readiness() {
        let dep = Dependency::new();
        let _provide = dep.provide().unwrap();
        assert_eq!(dep.need().unwrap_err(), DependError::NotReady);
        let _want = dep.want().unwrap();
        let _ready = dep.ready().unwrap();
        assert!(dep.need().is_ok());
    }

    #[test]
    fn test_observe_requires_want() {
        let log: Log = Rc::default();
        let dep = Dependency::new();
        assert_eq!(
            dep.observe(recorder("w", &log)).unwrap_err(),
            DependError::NotWanted
        );
    }

    #[test]
    fn test_unneed_last_notifies_not_needed() {
        let log: Log = Rc::default();
        let dep = Dependency::new();
        let _want = dep.want().unwrap();
        let _observe = dep.observe(recorder("w", &log)).unwrap();
        let _provide = dep.provide().unwrap();
        let _ready = dep.ready().unwrap();
        let first = dep.need().unwrap();
        let second = dep.need().unwrap();
        log.borrow_mut().clear();
        dep.unneed(first).unwrap();
        assert_eq!(signals(&log), vec![Signal::NeedDeparted]);
        dep.unneed(second).unwrap();
        assert_eq!(
            signals(&log),
            vec![Signal::NeedDeparted, Signal::NeedDeparted, Signal::NotNeeded]
        );
    }
}

#[cfg(test)]
mod reentrancy_tests {
    use super::*;

    #[test]
    fn test_observer_withdraws_own_want_on_arrival() {
        let log: Log = Rc::default();
        let dep = Dependency::new();
        let held: Rc<RefCell<Option<Want>>> = Rc::new(RefCell::new(Some(dep.want().unwrap())));

        let observer_log = log.clone();
        let observer_held = held.clone();
        let observer = move |dep: &Dependency, own: RegistrationId, notice: Notice| {
            observer_log.borrow_mut().push(("self", notice.signal));
            if notice.signal == Signal::ObserverArrived && notice.subject == Some(own) {
                if let Some(want) = observer_held.borrow_mut().take() {
                    dep.unwant(want).unwrap();
                }
            }
        };
        let _observe = dep.observe(Rc::new(observer)).unwrap();

        assert_eq!(
            signals(&log),
            vec![
                Signal::ObserverArrived,
                Signal::WantDeparted,
                Signal::GoingAway,
                Signal::ObserverDeparted,
            ]
        );
        assert!(held.borrow().is_none());
        assert_eq!(dep.populations().observe, 0);
    }

    #[test]
    fn test_observer_cascade_on_going_away() {
        // the observer drops readiness and its provider when told to go away
        let log: Log = Rc::default();
        let dep = Dependency::new();
        let want = dep.want().unwrap();
        let provide = Rc::new(RefCell::new(Some(dep.provide().unwrap())));
        let ready = Rc::new(RefCell::new(Some(dep.ready().unwrap())));

        let observer_log = log.clone();
        let (p, r) = (provide.clone(), ready.clone());
        let observer = move |dep: &Dependency, _own: RegistrationId, notice: Notice| {
            observer_log.borrow_mut().push(("owner", notice.signal));
            if notice.signal == Signal::GoingAway {
                if let Some(ready) = r.borrow_mut().take() {
                    dep.unready(ready).unwrap();
                }
                if let Some(provide) = p.borrow_mut().take() {
                    dep.unprovide(provide).unwrap();
                }
            }
        };
        let _observe = dep.observe(Rc::new(observer)).unwrap();
        dep.unwant(want).unwrap();

        let recorded = signals(&log);
        assert_eq!(recorded.last(), Some(&Signal::ObserverDeparted));
        let departures = recorded
            .iter()
            .filter(|signal| **signal == Signal::ObserverDeparted)
            .count();
        assert_eq!(departures, 1);
        assert_eq!(dep.populations().provide, 0);
    }

    #[test]
    fn test_observer_removed_mid_walk_is_skipped() {
        let log: Log = Rc::default();
        let dep = Dependency::new();
        let _want = dep.want().unwrap();
        let victim = Rc::new(RefCell::new(None));
        let _quiet = dep.observe(recorder("victim", &log)).map(|token| {
            *victim.borrow_mut() = Some(token);
        });

        let killer_victim = victim.clone();
        let killer_log = log.clone();
        let killer = move |dep: &Dependency, _own: RegistrationId, notice: Notice| {
            killer_log.borrow_mut().push(("killer", notice.signal));
            if notice.signal == Signal::ProviderArrived {
                if let Some(token) = killer_victim.borrow_mut().take() {
                    dep.unobserve(token).unwrap();
                }
            }
        };
        let _killer = dep.observe(Rc::new(killer)).unwrap();
        log.borrow_mut().clear();

        let _provide = dep.provide().unwrap();
        let victim_heard: Vec<Signal> = log
            .borrow()
            .iter()
            .filter(|(name, _)| *name == "victim")
            .map(|(_, signal)| *signal)
            .collect();
        assert!(victim_heard.is_empty());
    }

    #[test]
    fn test_populations_during_broadcast_hide_pin() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let dep = Dependency::new();
        let want = dep.want().unwrap();
        let observer_seen = seen.clone();
        let observer = move |dep: &Dependency, _own: RegistrationId, notice: Notice| {
            if notice.signal == Signal::WantDeparted {
                observer_seen.borrow_mut().push(dep.populations().want);
            }
        };
        let _observe = dep.observe(Rc::new(observer)).unwrap();
        let second = dep.want().unwrap();
        dep.unwant(second).unwrap();
        assert_eq!(*seen.borrow(), vec![1]);
        dep.unwant(want).unwrap();
        assert_eq!(*seen.borrow(), vec![1, 0]);
    }
}
