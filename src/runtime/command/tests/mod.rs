//! CommandTable 单元测试

use std::rc::Rc;

use crate::runtime::command::{split_line, Command, CommandError, CommandTable, MAX_ARGS};
use crate::runtime::module::{LiveModule, ModuleDescriptor};

fn quiet(
    _module: &Rc<LiveModule>,
    _event: crate::runtime::module::ModuleEvent<'_>,
) -> anyhow::Result<()> {
    Ok(())
}

static OWNER: ModuleDescriptor = ModuleDescriptor::new("owner", *b"2024120200", quiet);

#[cfg(test)]
mod split_tests {
    use super::*;

    #[test]
    fn test_split_whitespace() {
        let args = split_line("  load \t ./plugin.so  ").unwrap();
        assert_eq!(args.as_slice(), &["load", "./plugin.so"]);
    }

    #[test]
    fn test_empty_line() {
        assert!(split_line("   \t").unwrap().is_empty());
    }

    #[test]
    fn test_argument_limit() {
        let max: Vec<String> = (0..MAX_ARGS).map(|i| format!("a{}", i)).collect();
        assert_eq!(split_line(&max.join(" ")).unwrap().len(), MAX_ARGS);

        let over = format!("{} extra", max.join(" "));
        assert!(matches!(
            split_line(&over),
            Err(CommandError::TooManyArguments { max: MAX_ARGS })
        ));
    }
}

#[cfg(test)]
mod table_tests {
    use super::*;

    #[test]
    fn test_newest_command_wins() {
        let owner = LiveModule::host(&OWNER);
        let mut table = CommandTable::new();
        table.add(Command::new("greet", &owner, |_, _| Ok(())));
        let newer = table.add(Command::new("greet", &owner, |_, _| anyhow::bail!("shadowed")));
        let names: Vec<&str> = table.iter().map(|command| command.name()).collect();
        assert_eq!(names, vec!["greet", "greet"]);

        assert!(table.resolve("greet").is_some());
        let removed = table.remove(newer).unwrap();
        assert_eq!(removed.name(), "greet");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_resolve_exact_name_only() {
        let owner = LiveModule::host(&OWNER);
        let mut table = CommandTable::new();
        table.add(Command::new("list_modules", &owner, |_, _| Ok(())));
        assert!(table.resolve("list").is_none());
        assert!(table.resolve("list_modules").is_some());
    }

    #[test]
    fn test_owner_name_tracks_module() {
        let owner = LiveModule::host(&OWNER);
        let command = Command::new("x", &owner, |_, _| Ok(()));
        assert_eq!(command.owner_name().as_deref(), Some("owner"));
        drop(owner);
        assert_eq!(command.owner_name(), None);
    }

    #[test]
    fn test_remove_twice() {
        let owner = LiveModule::host(&OWNER);
        let mut table = CommandTable::new();
        let id = table.add(Command::new("x", &owner, |_, _| Ok(())));
        assert!(table.remove(id).is_some());
        assert!(table.remove(id).is_none());
        assert!(table.is_empty());
    }
}
