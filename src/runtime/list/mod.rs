//! Link arena: circular doubly linked lists with sentinels
//!
//! Every list is a cycle through a sentinel slot. Items are slots in the same
//! arena, addressed by generational [`LinkKey`]s, so relinking never moves or
//! owns the payload and a freed slot can never be confused with its successor.
//!
//! An item is either detached (no links) or a member of exactly one list.

use thiserror::Error;


/// Handle to an item slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkKey {
    index: u32,
    generation: u32,
}

impl LinkKey {
    /// Slot index (stable while the item is alive).
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Handle to a list (its sentinel slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListHead(LinkKey);

/// Link errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("stale or unknown link key")]
    StaleKey,

    #[error("item is already linked into a list")]
    AlreadyLinked,

    #[error("item is not linked into any list")]
    Detached,

    #[error("operation does not apply to a list sentinel")]
    Sentinel,
}

#[derive(Debug, Clone, Copy, Default)]
struct Links {
    prev: Option<u32>,
    next: Option<u32>,
}

impl Links {
    #[inline]
    fn is_detached(&self) -> bool {
        self.prev.is_none() && self.next.is_none()
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    links: Links,
    /// `None` while free, `Some(None)` for a sentinel, `Some(Some(_))` for an item.
    payload: Option<Option<T>>,
}

/// Arena of linkable items and list sentinels.
#[derive(Debug)]
pub struct LinkArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for LinkArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LinkArena<T> {
    /// Create an empty arena
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn allocate(
        &mut self,
        payload: Option<T>,
    ) -> LinkKey {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.links = Links::default();
            slot.payload = Some(payload);
            LinkKey {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                links: Links::default(),
                payload: Some(payload),
            });
            LinkKey {
                index,
                generation: 0,
            }
        }
    }

    fn release(
        &mut self,
        index: u32,
    ) -> Option<Option<T>> {
        let slot = &mut self.slots[index as usize];
        let payload = slot.payload.take();
        slot.generation = slot.generation.wrapping_add(1);
        slot.links = Links::default();
        self.free.push(index);
        payload
    }

    #[inline]
    fn slot(
        &self,
        key: LinkKey,
    ) -> Option<&Slot<T>> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation && slot.payload.is_some())
    }

    #[inline]
    fn check_item(
        &self,
        key: LinkKey,
    ) -> Result<&Slot<T>, LinkError> {
        match self.slot(key) {
            Some(slot) if matches!(slot.payload, Some(Some(_))) => Ok(slot),
            Some(_) => Err(LinkError::Sentinel),
            None => Err(LinkError::StaleKey),
        }
    }

    #[inline]
    fn links_mut(
        &mut self,
        index: u32,
    ) -> &mut Links {
        &mut self.slots[index as usize].links
    }

    /// Create a new empty list.
    pub fn new_list(&mut self) -> ListHead {
        let key = self.allocate(None);
        let links = self.links_mut(key.index);
        links.prev = Some(key.index);
        links.next = Some(key.index);
        ListHead(key)
    }

    /// Drop an empty list. Returns `false` if the list still has members.
    pub fn drop_list(
        &mut self,
        list: ListHead,
    ) -> bool {
        if self.slot(list.0).is_none() || !self.is_empty(list) {
            return false;
        }
        self.release(list.0.index);
        true
    }

    /// Store a new detached item.
    pub fn insert(
        &mut self,
        value: T,
    ) -> LinkKey {
        self.allocate(Some(value))
    }

    /// Release a detached item and hand back its payload.
    pub fn free(
        &mut self,
        key: LinkKey,
    ) -> Result<T, LinkError> {
        if !self.check_item(key)?.links.is_detached() {
            return Err(LinkError::AlreadyLinked);
        }
        match self.release(key.index) {
            Some(Some(value)) => Ok(value),
            _ => Err(LinkError::StaleKey),
        }
    }

    /// Payload of a live item.
    #[inline]
    pub fn get(
        &self,
        key: LinkKey,
    ) -> Option<&T> {
        self.slot(key).and_then(|slot| slot.payload.as_ref()?.as_ref())
    }

    /// Mutable payload of a live item.
    #[inline]
    pub fn get_mut(
        &mut self,
        key: LinkKey,
    ) -> Option<&mut T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.payload.as_mut()?.as_mut()
    }

    /// Whether `key` names a live item currently linked into some list.
    #[inline]
    pub fn is_linked(
        &self,
        key: LinkKey,
    ) -> bool {
        self.check_item(key)
            .map(|slot| !slot.links.is_detached())
            .unwrap_or(false)
    }

    /// Whether `list` has no members.
    #[inline]
    pub fn is_empty(
        &self,
        list: ListHead,
    ) -> bool {
        match self.slot(list.0) {
            Some(slot) => slot.links.next == Some(list.0.index),
            None => true,
        }
    }

    fn link_between(
        &mut self,
        key: LinkKey,
        prev: u32,
        next: u32,
    ) -> Result<(), LinkError> {
        if !self.check_item(key)?.links.is_detached() {
            return Err(LinkError::AlreadyLinked);
        }
        self.links_mut(prev).next = Some(key.index);
        self.links_mut(next).prev = Some(key.index);
        let links = self.links_mut(key.index);
        links.prev = Some(prev);
        links.next = Some(next);
        Ok(())
    }

    fn sentinel(
        &self,
        list: ListHead,
    ) -> Result<Links, LinkError> {
        self.slot(list.0)
            .map(|slot| slot.links)
            .ok_or(LinkError::StaleKey)
    }

    /// Link a detached item at the head of `list`.
    pub fn push_front(
        &mut self,
        list: ListHead,
        key: LinkKey,
    ) -> Result<(), LinkError> {
        let head = list.0.index;
        let next = self.sentinel(list)?.next.unwrap_or(head);
        self.link_between(key, head, next)
    }

    /// Link a detached item at the tail of `list`.
    pub fn push_back(
        &mut self,
        list: ListHead,
        key: LinkKey,
    ) -> Result<(), LinkError> {
        let head = list.0.index;
        let prev = self.sentinel(list)?.prev.unwrap_or(head);
        self.link_between(key, prev, head)
    }

    /// Unlink an item from whatever list holds it.
    pub fn remove(
        &mut self,
        key: LinkKey,
    ) -> Result<(), LinkError> {
        let links = self.check_item(key)?.links;
        let (Some(prev), Some(next)) = (links.prev, links.next) else {
            return Err(LinkError::Detached);
        };
        self.links_mut(prev).next = Some(next);
        self.links_mut(next).prev = Some(prev);
        *self.links_mut(key.index) = Links::default();
        Ok(())
    }

    /// Put detached `new` into the position held by `old`, detaching `old`.
    pub fn replace(
        &mut self,
        old: LinkKey,
        new: LinkKey,
    ) -> Result<(), LinkError> {
        let links = self.check_item(old)?.links;
        if !self.check_item(new)?.links.is_detached() {
            return Err(LinkError::AlreadyLinked);
        }
        let (Some(prev), Some(next)) = (links.prev, links.next) else {
            return Err(LinkError::Detached);
        };
        // for a sole member prev and next are both the sentinel
        self.links_mut(prev).next = Some(new.index);
        self.links_mut(next).prev = Some(new.index);
        *self.links_mut(new.index) = links;
        *self.links_mut(old.index) = Links::default();
        Ok(())
    }

    fn key_at(
        &self,
        index: u32,
    ) -> LinkKey {
        LinkKey {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    /// First member of `list`.
    pub fn front(
        &self,
        list: ListHead,
    ) -> Option<LinkKey> {
        let next = self.slot(list.0)?.links.next?;
        (next != list.0.index).then(|| self.key_at(next))
    }

    /// Last member of `list`.
    pub fn back(
        &self,
        list: ListHead,
    ) -> Option<LinkKey> {
        let prev = self.slot(list.0)?.links.prev?;
        (prev != list.0.index).then(|| self.key_at(prev))
    }

    /// Member after `key` in `list`, or `None` at the end.
    pub fn next_in(
        &self,
        list: ListHead,
        key: LinkKey,
    ) -> Option<LinkKey> {
        let next = self.check_item(key).ok()?.links.next?;
        (next != list.0.index).then(|| self.key_at(next))
    }

    /// Unlink and return the head of `list`.
    pub fn pop_front(
        &mut self,
        list: ListHead,
    ) -> Option<LinkKey> {
        let key = self.front(list)?;
        self.remove(key).ok()?;
        Some(key)
    }

    /// Unlink and return the tail of `list`.
    pub fn pop_back(
        &mut self,
        list: ListHead,
    ) -> Option<LinkKey> {
        let key = self.back(list)?;
        self.remove(key).ok()?;
        Some(key)
    }

    /// Move every member of `from` to the tail of `to`, keeping their order.
    pub fn splice_back(
        &mut self,
        from: ListHead,
        to: ListHead,
    ) -> Result<(), LinkError> {
        let src = self.sentinel(from)?;
        let dst = self.sentinel(to)?;
        if from == to || self.is_empty(from) {
            return Ok(());
        }
        let (Some(first), Some(last), Some(tail)) = (src.next, src.prev, dst.prev) else {
            return Err(LinkError::Detached);
        };
        self.links_mut(tail).next = Some(first);
        self.links_mut(first).prev = Some(tail);
        self.links_mut(last).next = Some(to.0.index);
        self.links_mut(to.0.index).prev = Some(last);
        let head = self.links_mut(from.0.index);
        head.next = Some(from.0.index);
        head.prev = Some(from.0.index);
        Ok(())
    }

    /// Iterate the members of `list` from head to tail.
    pub fn iter(
        &self,
        list: ListHead,
    ) -> Iter<'_, T> {
        Iter {
            arena: self,
            list,
            cursor: self.front(list),
        }
    }

    /// Number of members (walks the list).
    pub fn len(
        &self,
        list: ListHead,
    ) -> usize {
        self.iter(list).count()
    }
}

/// Iterator over the keys of a list
pub struct Iter<'a, T> {
    arena: &'a LinkArena<T>,
    list: ListHead,
    cursor: Option<LinkKey>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = LinkKey;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor?;
        self.cursor = self.arena.next_in(self.list, current);
        Some(current)
    }
}
