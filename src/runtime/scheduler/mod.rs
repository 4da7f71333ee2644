//! Cooperative work queue
//!
//! A single FIFO of work items, each bound to the live module it runs for.
//! The run loop pops the head and runs it to completion until the queue is
//! empty. Work that wants to run again re-schedules itself.

use std::fmt;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::runtime::list::{LinkArena, LinkKey, ListHead};
use crate::runtime::module::LiveModule;
use crate::runtime::toy::{Context, Toy};
use crate::runtime::ToyError;


/// Outcome of one dispatched work item.
pub type WorkResult = Result<(), ToyError>;

/// A work function. It receives the context it was bound to and its own key
/// so it can re-schedule itself.
pub type WorkFn = Rc<dyn Fn(&Context, WorkKey) -> WorkResult>;

/// Scheduler errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WorkError {
    #[error("unknown work item")]
    UnknownItem,

    #[error("work item is already scheduled")]
    AlreadyScheduled,
}

/// Handle to a work item. A detached item is not scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkKey(LinkKey);

struct WorkItem {
    label: &'static str,
    work: WorkFn,
    module: Option<Rc<LiveModule>>,
}

/// A popped work item ready to run.
pub struct Dispatch {
    pub key: WorkKey,
    pub label: &'static str,
    pub work: WorkFn,
    pub module: Rc<LiveModule>,
}

/// FIFO of work items
pub struct WorkQueue {
    items: LinkArena<WorkItem>,
    queue: ListHead,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WorkQueue {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("pending", &self.labels())
            .finish()
    }
}

impl WorkQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let mut items = LinkArena::new();
        let queue = items.new_list();
        Self { items, queue }
    }

    /// Store a new unscheduled work item.
    pub fn create(
        &mut self,
        label: &'static str,
        work: WorkFn,
    ) -> WorkKey {
        WorkKey(self.items.insert(WorkItem {
            label,
            work,
            module: None,
        }))
    }

    fn bind(
        &mut self,
        module: &Rc<LiveModule>,
        key: WorkKey,
    ) -> Result<(), WorkError> {
        if self.items.is_linked(key.0) {
            return Err(WorkError::AlreadyScheduled);
        }
        let item = self.items.get_mut(key.0).ok_or(WorkError::UnknownItem)?;
        item.module = Some(Rc::clone(module));
        Ok(())
    }

    /// Append a work item, bound to `module`.
    pub fn schedule_last(
        &mut self,
        module: &Rc<LiveModule>,
        key: WorkKey,
    ) -> Result<(), WorkError> {
        self.bind(module, key)?;
        self.items
            .push_back(self.queue, key.0)
            .map_err(|_| WorkError::UnknownItem)
    }

    /// Prepend a work item, bound to `module`, so it runs next.
    pub fn schedule_next(
        &mut self,
        module: &Rc<LiveModule>,
        key: WorkKey,
    ) -> Result<(), WorkError> {
        self.bind(module, key)?;
        self.items
            .push_front(self.queue, key.0)
            .map_err(|_| WorkError::UnknownItem)
    }

    #[inline]
    pub fn is_scheduled(
        &self,
        key: WorkKey,
    ) -> bool {
        self.items.is_linked(key.0)
    }

    /// Take a work item off the queue. Returns whether it was scheduled.
    pub fn cancel(
        &mut self,
        key: WorkKey,
    ) -> bool {
        self.items.is_linked(key.0) && self.items.remove(key.0).is_ok()
    }

    /// Cancel and forget a work item.
    pub fn destroy(
        &mut self,
        key: WorkKey,
    ) -> Result<(), WorkError> {
        self.cancel(key);
        self.items
            .free(key.0)
            .map(drop)
            .map_err(|_| WorkError::UnknownItem)
    }

    /// Unlink the head of the queue.
    pub fn pop(&mut self) -> Option<Dispatch> {
        loop {
            let key = self.items.pop_front(self.queue)?;
            let Some(item) = self.items.get(key) else {
                continue;
            };
            let Some(module) = item.module.clone() else {
                continue;
            };
            return Some(Dispatch {
                key: WorkKey(key),
                label: item.label,
                work: Rc::clone(&item.work),
                module,
            });
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty(self.queue)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len(self.queue)
    }

    /// Labels of scheduled items in run order.
    pub fn labels(&self) -> Vec<&'static str> {
        self.items
            .iter(self.queue)
            .filter_map(|key| self.items.get(key).map(|item| item.label))
            .collect()
    }
}

/// Run work until the queue drains; the last item's outcome is returned.
pub fn run(toy: &Toy) -> WorkResult {
    let mut outcome = Ok(());
    while let Some(dispatch) = toy.pop_work() {
        trace!("dispatching '{}' for '{}'", dispatch.label, dispatch.module.name());
        let context = Context::new(toy.clone(), dispatch.module);
        outcome = (dispatch.work)(&context, dispatch.key);
        if let Err(err) = &outcome {
            debug!("work '{}' failed: {}", dispatch.label, err);
        }
    }
    outcome
}

/// Work item that keeps re-scheduling itself while other work is pending and
/// unloads every module once it finds the queue empty.
pub fn shutdown_checker(
    context: &Context,
    own: WorkKey,
) -> WorkResult {
    let toy = context.toy();
    if toy.pending_work() == 0 {
        debug!("no work remains, unloading all modules");
        toy.modules().unload_all();
        return Ok(());
    }
    context.schedule_last(own)?;
    Ok(())
}
