//! Scope 单元测试

use crate::runtime::scope::{Identifier, Scope, ScopeChain, ScopeError};

fn ident(
    name: &str,
    value: &str,
) -> Identifier {
    Identifier::new(name, value).unwrap()
}

#[cfg(test)]
mod scope_tests {
    use super::*;

    #[test]
    fn test_define_and_find() {
        let mut scope = Scope::new();
        assert_eq!(scope.define(ident("b", "2")).unwrap(), None);
        assert_eq!(scope.define(ident("a", "1")).unwrap(), None);
        assert_eq!(scope.find("a").map(|i| i.value.as_str()), Some("1"));
        assert!(scope.find("c").is_none());
        assert_eq!(scope.len(), 2);
    }

    #[test]
    fn test_define_replaces() {
        let mut scope = Scope::new();
        scope.define(ident("x", "old")).unwrap();
        let displaced = scope.define(ident("x", "new")).unwrap();
        assert_eq!(displaced, Some(ident("x", "old")));
        assert_eq!(scope.find("x").map(|i| i.value.as_str()), Some("new"));
        assert_eq!(scope.len(), 1);
    }

    #[test]
    fn test_iter_sorted() {
        let mut scope = Scope::new();
        for name in ["m", "c", "x", "a", "e"] {
            scope.define(ident(name, name)).unwrap();
        }
        let names: Vec<&str> = scope.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c", "e", "m", "x"]);
    }

    #[test]
    fn test_remove() {
        let mut scope = Scope::new();
        for name in ["m", "c", "x"] {
            scope.define(ident(name, name)).unwrap();
        }
        assert_eq!(scope.remove("m").unwrap().name, "m");
        assert_eq!(
            scope.remove("m"),
            Err(ScopeError::NotFound("m".to_string()))
        );
        let names: Vec<&str> = scope.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["c", "x"]);
    }

    #[test]
    fn test_invalid_names() {
        assert!(matches!(Identifier::new("", "v"), Err(ScopeError::InvalidName(_))));
        assert!(matches!(Identifier::new("a b", "v"), Err(ScopeError::InvalidName(_))));
    }
}

#[cfg(test)]
mod chain_tests {
    use super::*;

    #[test]
    fn test_innermost_shadows() {
        let mut chain = ScopeChain::new();
        chain.define(ident("x", "outer")).unwrap();
        chain.push();
        chain.define(ident("x", "inner")).unwrap();

        let (depth, found) = chain.find("x").unwrap();
        assert_eq!(depth, 1);
        assert_eq!(found.value, "inner");

        chain.pop().unwrap();
        let (depth, found) = chain.find("x").unwrap();
        assert_eq!(depth, 0);
        assert_eq!(found.value, "outer");
    }

    #[test]
    fn test_outer_visible_from_inner() {
        let mut chain = ScopeChain::new();
        chain.define(ident("y", "1")).unwrap();
        chain.push();
        assert_eq!(chain.find("y").map(|(depth, _)| depth), Some(0));
        assert!(chain.remove("y").is_err());
    }

    #[test]
    fn test_outermost_cannot_pop() {
        let mut chain = ScopeChain::new();
        assert!(matches!(chain.pop(), Err(ScopeError::OutermostScope)));
        assert_eq!(chain.depth(), 1);
    }
}
