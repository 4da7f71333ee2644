//! Identifier scopes
//!
//! A [`Scope`] keeps named identifiers in a binary search tree ordered by
//! name. A [`ScopeChain`] stacks scopes and resolves names innermost first.

use std::cmp::Ordering;

use thiserror::Error;

use crate::runtime::btree::{Direction, InsertMode, NodeId, Tree, TreeError};

#[cfg(test)]
mod tests;

/// Scope errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("invalid identifier name '{0}'")]
    InvalidName(String),

    #[error("identifier '{0}' not found")]
    NotFound(String),

    #[error("the outermost scope cannot be popped")]
    OutermostScope,

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// A named value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub name: String,
    pub value: String,
}

impl Identifier {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, ScopeError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            value: value.into(),
        })
    }
}

/// Names must be non-empty and free of whitespace.
pub fn validate_name(name: &str) -> Result<(), ScopeError> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(ScopeError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn by_name(
    a: &Identifier,
    b: &Identifier,
) -> Ordering {
    a.name.cmp(&b.name)
}

/// One level of identifiers
#[derive(Debug, Default)]
pub struct Scope {
    tree: Tree<Identifier>,
}

impl Scope {
    pub fn new() -> Self {
        Self { tree: Tree::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Add an identifier, displacing any with the same name.
    ///
    /// Returns the displaced identifier.
    pub fn define(
        &mut self,
        identifier: Identifier,
    ) -> Result<Option<Identifier>, ScopeError> {
        validate_name(&identifier.name)?;
        let key = self.tree.alloc(identifier);
        match self.tree.find_or_insert(key, InsertMode::InsertOrReplace, by_name) {
            Ok(Some(old)) => Ok(Some(self.tree.free(old)?)),
            Ok(None) => Ok(None),
            Err(err) => {
                let _ = self.tree.free(key);
                Err(err.into())
            }
        }
    }

    fn node(
        &self,
        name: &str,
    ) -> Option<NodeId> {
        self.tree.find_by(|identifier| name.cmp(identifier.name.as_str()))
    }

    pub fn find(
        &self,
        name: &str,
    ) -> Option<&Identifier> {
        self.node(name).and_then(|id| self.tree.get(id))
    }

    /// Remove an identifier by name.
    pub fn remove(
        &mut self,
        name: &str,
    ) -> Result<Identifier, ScopeError> {
        let id = self
            .node(name)
            .ok_or_else(|| ScopeError::NotFound(name.to_string()))?;
        self.tree.delete(id)?;
        Ok(self.tree.free(id)?)
    }

    /// Identifiers in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Identifier> + '_ {
        self.tree.iter(Direction::More).map(|(_, identifier)| identifier)
    }
}

/// Stack of scopes, innermost last
#[derive(Debug)]
pub struct ScopeChain {
    scopes: Vec<Scope>,
}

impl Default for ScopeChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeChain {
    /// A chain holding only the outermost scope.
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::new()],
        }
    }

    /// Number of scopes, including the outermost.
    #[inline]
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn push(&mut self) {
        self.scopes.push(Scope::new());
    }

    /// Drop the innermost scope and its identifiers.
    pub fn pop(&mut self) -> Result<Scope, ScopeError> {
        if self.scopes.len() <= 1 {
            return Err(ScopeError::OutermostScope);
        }
        self.scopes.pop().ok_or(ScopeError::OutermostScope)
    }

    pub fn innermost(&self) -> &Scope {
        // the outermost scope is never popped
        &self.scopes[self.scopes.len() - 1]
    }

    /// Define in the innermost scope.
    pub fn define(
        &mut self,
        identifier: Identifier,
    ) -> Result<Option<Identifier>, ScopeError> {
        let last = self.scopes.len() - 1;
        self.scopes[last].define(identifier)
    }

    /// Resolve a name, innermost scope first. Also returns the depth of the
    /// scope it was found in (0 is the outermost).
    pub fn find(
        &self,
        name: &str,
    ) -> Option<(usize, &Identifier)> {
        self.scopes
            .iter()
            .enumerate()
            .rev()
            .find_map(|(depth, scope)| scope.find(name).map(|identifier| (depth, identifier)))
    }

    /// Remove from the innermost scope.
    pub fn remove(
        &mut self,
        name: &str,
    ) -> Result<Identifier, ScopeError> {
        let last = self.scopes.len() - 1;
        self.scopes[last].remove(name)
    }
}
