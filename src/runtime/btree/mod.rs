//! Unbalanced binary search tree over a node arena
//!
//! Nodes carry explicit up/less/more links. The tree remembers the side of
//! its most recent insertion attach and uses it to pick which subtree a
//! two-child deletion descends into first, so successive deletions alternate
//! between successor and predecessor replacement. There is no height bound.

use std::cmp::Ordering;

use thiserror::Error;


/// Child side of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Less,
    More,
}

impl Direction {
    /// The other side.
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Direction::Less => Direction::More,
            Direction::More => Direction::Less,
        }
    }
}

/// How `find_or_insert` treats the key node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// Search only.
    LookupOnly,
    /// Attach the key unless an equal node exists.
    InsertIfAbsent,
    /// Attach the key, displacing any equal node.
    InsertOrReplace,
    /// Displace an equal node; do nothing if none exists.
    ReplaceIfPresent,
}

impl TryFrom<u8> for InsertMode {
    type Error = TreeError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(InsertMode::LookupOnly),
            1 => Ok(InsertMode::InsertIfAbsent),
            2 => Ok(InsertMode::InsertOrReplace),
            3 => Ok(InsertMode::ReplaceIfPresent),
            other => Err(TreeError::InvalidMode(other)),
        }
    }
}

/// Tree errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("stale or unknown tree node")]
    UnknownNode,

    #[error("invalid insertion mode {0}")]
    InvalidMode(u8),

    #[error("node is already linked into a tree")]
    NodeLinked,

    #[error("node claims to be the root of a different tree")]
    WrongTree,

    #[error("replacement node has two children")]
    UnexpectedBranch,
}

/// Handle to a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Links {
    up: Option<u32>,
    less: Option<u32>,
    more: Option<u32>,
}

impl Links {
    #[inline]
    fn child(
        &self,
        direction: Direction,
    ) -> Option<u32> {
        match direction {
            Direction::Less => self.less,
            Direction::More => self.more,
        }
    }

    #[inline]
    fn set_child(
        &mut self,
        direction: Direction,
        child: Option<u32>,
    ) {
        match direction {
            Direction::Less => self.less = child,
            Direction::More => self.more = child,
        }
    }

    #[inline]
    fn is_clear(&self) -> bool {
        self.up.is_none() && self.less.is_none() && self.more.is_none()
    }
}

#[derive(Debug)]
struct Node<T> {
    generation: u32,
    links: Links,
    value: Option<T>,
}

/// Binary search tree whose nodes live in an internal arena.
///
/// Nodes are allocated detached with [`Tree::alloc`] and attached with
/// [`Tree::find_or_insert`]; a detached node is released with [`Tree::free`].
#[derive(Debug)]
pub struct Tree<T> {
    nodes: Vec<Node<T>>,
    free: Vec<u32>,
    root: Option<u32>,
    last_direction: Direction,
    len: usize,
}

impl<T> Default for Tree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Tree<T> {
    /// Create an empty tree
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            last_direction: Direction::Less,
            len: 0,
        }
    }

    /// Number of attached nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Root node, if any.
    #[inline]
    pub fn root(&self) -> Option<NodeId> {
        self.root.map(|index| self.id_at(index))
    }

    /// Side of the most recent insertion attach.
    #[inline]
    pub fn last_direction(&self) -> Direction {
        self.last_direction
    }

    /// Allocate a detached node.
    pub fn alloc(
        &mut self,
        value: T,
    ) -> NodeId {
        if let Some(index) = self.free.pop() {
            let node = &mut self.nodes[index as usize];
            node.links = Links::default();
            node.value = Some(value);
            NodeId {
                index,
                generation: node.generation,
            }
        } else {
            let index = self.nodes.len() as u32;
            self.nodes.push(Node {
                generation: 0,
                links: Links::default(),
                value: Some(value),
            });
            NodeId {
                index,
                generation: 0,
            }
        }
    }

    /// Release a detached node, returning its value.
    pub fn free(
        &mut self,
        id: NodeId,
    ) -> Result<T, TreeError> {
        let index = self.index_of(id)?;
        if self.is_attached(index) {
            return Err(TreeError::NodeLinked);
        }
        let node = &mut self.nodes[index as usize];
        node.generation = node.generation.wrapping_add(1);
        let value = node.value.take().ok_or(TreeError::UnknownNode)?;
        self.free.push(index);
        Ok(value)
    }

    /// Value stored in a node.
    #[inline]
    pub fn get(
        &self,
        id: NodeId,
    ) -> Option<&T> {
        let index = self.index_of(id).ok()?;
        self.nodes[index as usize].value.as_ref()
    }

    /// Mutable value stored in a node.
    ///
    /// Callers must not change the part of the value the tree is ordered by.
    #[inline]
    pub fn get_mut(
        &mut self,
        id: NodeId,
    ) -> Option<&mut T> {
        let index = self.index_of(id).ok()?;
        self.nodes[index as usize].value.as_mut()
    }

    /// Whether the node is part of the tree.
    pub fn contains(
        &self,
        id: NodeId,
    ) -> bool {
        self.index_of(id)
            .map(|index| self.is_attached(index))
            .unwrap_or(false)
    }

    /// Parent of a node.
    pub fn parent(
        &self,
        id: NodeId,
    ) -> Option<NodeId> {
        let index = self.index_of(id).ok()?;
        self.links(index).up.map(|up| self.id_at(up))
    }

    /// Child of a node on the given side.
    pub fn child(
        &self,
        id: NodeId,
        direction: Direction,
    ) -> Option<NodeId> {
        let index = self.index_of(id).ok()?;
        self.links(index)
            .child(direction)
            .map(|child| self.id_at(child))
    }

    fn index_of(
        &self,
        id: NodeId,
    ) -> Result<u32, TreeError> {
        match self.nodes.get(id.index as usize) {
            Some(node) if node.generation == id.generation && node.value.is_some() => Ok(id.index),
            _ => Err(TreeError::UnknownNode),
        }
    }

    #[inline]
    fn id_at(
        &self,
        index: u32,
    ) -> NodeId {
        NodeId {
            index,
            generation: self.nodes[index as usize].generation,
        }
    }

    #[inline]
    fn links(
        &self,
        index: u32,
    ) -> Links {
        self.nodes[index as usize].links
    }

    #[inline]
    fn links_mut(
        &mut self,
        index: u32,
    ) -> &mut Links {
        &mut self.nodes[index as usize].links
    }

    #[inline]
    fn value_at(
        &self,
        index: u32,
    ) -> Option<&T> {
        self.nodes[index as usize].value.as_ref()
    }

    #[inline]
    fn is_attached(
        &self,
        index: u32,
    ) -> bool {
        self.root == Some(index) || !self.links(index).is_clear()
    }

    /// Descend from the root; returns (parent, side, match).
    fn descend(
        &self,
        mut probe: impl FnMut(&T) -> Ordering,
    ) -> (Option<u32>, Direction, Option<u32>) {
        let mut upper = None;
        let mut direction = Direction::Less;
        let mut cursor = self.root;
        while let Some(index) = cursor {
            let ordering = match self.value_at(index) {
                Some(value) => probe(value),
                None => break,
            };
            direction = match ordering {
                Ordering::Equal => return (upper, direction, Some(index)),
                Ordering::Less => Direction::Less,
                Ordering::Greater => Direction::More,
            };
            upper = Some(index);
            cursor = self.links(index).child(direction);
        }
        (upper, direction, None)
    }

    /// Find a node by probing values; `probe` orders the sought key against a node value.
    pub fn find_by(
        &self,
        probe: impl FnMut(&T) -> Ordering,
    ) -> Option<NodeId> {
        let (_, _, found) = self.descend(probe);
        found.map(|index| self.id_at(index))
    }

    /// Search for the value of `key` and attach `key` according to `mode`.
    ///
    /// Returns the equal node found during the search, if any. Under
    /// [`InsertMode::InsertOrReplace`] and [`InsertMode::ReplaceIfPresent`]
    /// that node has been displaced by `key` and is now detached; the caller
    /// disposes of it.
    pub fn find_or_insert(
        &mut self,
        key: NodeId,
        mode: InsertMode,
        mut compare: impl FnMut(&T, &T) -> Ordering,
    ) -> Result<Option<NodeId>, TreeError> {
        let key_index = self.index_of(key)?;
        let (upper, direction, found) = {
            let Some(key_value) = self.value_at(key_index) else {
                return Err(TreeError::UnknownNode);
            };
            self.descend(|value| compare(key_value, value))
        };
        let found_id = found.map(|index| self.id_at(index));

        match (mode, found) {
            (InsertMode::LookupOnly, _) => return Ok(found_id),
            (InsertMode::ReplaceIfPresent, None) => return Ok(None),
            (InsertMode::InsertIfAbsent, Some(_)) => return Ok(found_id),
            _ => {}
        }

        if self.is_attached(key_index) {
            return Err(TreeError::NodeLinked);
        }

        if let Some(old) = found {
            // transplant the key into the displaced node's position
            let links = self.links(old);
            *self.links_mut(key_index) = links;
            *self.links_mut(old) = Links::default();
            for child in [links.less, links.more].into_iter().flatten() {
                self.links_mut(child).up = Some(key_index);
            }
        } else {
            self.len += 1;
        }

        match upper {
            None => {
                self.root = Some(key_index);
                return Ok(found_id);
            }
            Some(parent) => {
                self.links_mut(parent).set_child(direction, Some(key_index));
                self.links_mut(key_index).up = Some(parent);
            }
        }
        self.last_direction = direction;
        Ok(found_id)
    }

    /// Detach a node from the tree. The node stays allocated.
    pub fn delete(
        &mut self,
        id: NodeId,
    ) -> Result<(), TreeError> {
        let index = self.index_of(id)?;
        self.unlink(index, true)?;
        self.len -= 1;
        Ok(())
    }

    fn unlink(
        &mut self,
        index: u32,
        allow_branch: bool,
    ) -> Result<(), TreeError> {
        let links = self.links(index);
        if links.up.is_none() && self.root != Some(index) {
            return Err(TreeError::WrongTree);
        }

        let replacement = match (links.less, links.more) {
            (None, None) => None,
            (Some(child), None) | (None, Some(child)) => {
                let node = self.links_mut(index);
                node.less = None;
                node.more = None;
                Some(child)
            }
            (Some(_), Some(_)) if allow_branch => Some(self.splice_replacement(index)?),
            (Some(_), Some(_)) => return Err(TreeError::UnexpectedBranch),
        };

        match links.up {
            None => {
                self.root = replacement;
                if let Some(child) = replacement {
                    self.links_mut(child).up = None;
                }
            }
            Some(parent) => {
                let side = if self.links(parent).less == Some(index) {
                    Direction::Less
                } else {
                    Direction::More
                };
                self.links_mut(parent).set_child(side, replacement);
                if let Some(child) = replacement {
                    self.links_mut(child).up = Some(parent);
                }
                self.links_mut(index).up = None;
            }
        }
        Ok(())
    }

    /// Pull the successor or predecessor of a two-child node out of its
    /// subtree and hand it both of the node's subtrees.
    fn splice_replacement(
        &mut self,
        index: u32,
    ) -> Result<u32, TreeError> {
        let direction = self.last_direction;
        let opposite = direction.opposite();

        let mut replacement = self
            .links(index)
            .child(direction)
            .ok_or(TreeError::UnexpectedBranch)?;
        while let Some(next) = self.links(replacement).child(opposite) {
            replacement = next;
        }
        self.unlink(replacement, false)?;

        // unlinking may have changed the node's direction child
        let links = self.links(index);
        for side in [opposite, direction] {
            let child = links.child(side);
            self.links_mut(replacement).set_child(side, child);
            if let Some(child) = child {
                self.links_mut(child).up = Some(replacement);
            }
        }
        let node = self.links_mut(index);
        node.less = None;
        node.more = None;
        Ok(replacement)
    }

    fn extreme(
        &self,
        mut index: u32,
        direction: Direction,
    ) -> u32 {
        while let Some(next) = self.links(index).child(direction) {
            index = next;
        }
        index
    }

    /// Step to the in-order neighbour of `node` in `direction`.
    ///
    /// `More` yields the successor and `Less` the predecessor. With no node,
    /// `More` starts at the minimum and `Less` at the maximum.
    pub fn ordered_visit(
        &self,
        node: Option<NodeId>,
        direction: Direction,
    ) -> Option<NodeId> {
        let opposite = direction.opposite();
        let Some(node) = node else {
            let root = self.root?;
            return Some(self.id_at(self.extreme(root, opposite)));
        };
        let mut index = self.index_of(node).ok()?;
        if !self.is_attached(index) {
            return None;
        }
        if let Some(child) = self.links(index).child(direction) {
            return Some(self.id_at(self.extreme(child, opposite)));
        }
        while let Some(up) = self.links(index).up {
            if self.links(up).child(opposite) == Some(index) {
                return Some(self.id_at(up));
            }
            index = up;
        }
        None
    }

    /// Walk the whole tree in `direction` order.
    pub fn iter(
        &self,
        direction: Direction,
    ) -> Iter<'_, T> {
        Iter {
            tree: self,
            direction,
            cursor: self.ordered_visit(None, direction),
        }
    }

    /// Height of the tree (0 when empty).
    pub fn height(&self) -> usize {
        fn walk<T>(
            tree: &Tree<T>,
            index: Option<u32>,
        ) -> usize {
            match index {
                None => 0,
                Some(index) => {
                    let links = tree.links(index);
                    1 + walk(tree, links.less).max(walk(tree, links.more))
                }
            }
        }
        walk(self, self.root)
    }
}

/// In-order iterator yielding node handles and values
pub struct Iter<'a, T> {
    tree: &'a Tree<T>,
    direction: Direction,
    cursor: Option<NodeId>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (NodeId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor?;
        self.cursor = self.tree.ordered_visit(Some(current), self.direction);
        Some((current, self.tree.get(current)?))
    }
}
