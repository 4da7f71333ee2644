//! 配置单元测试

use std::io::Write;

use crate::util::config::{load_config, load_config_file, ConfigError, ToyConfig};
use crate::util::logger::LogLevel;

#[cfg(test)]
mod config_tests {
    use super::*;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = ToyConfig::default();
        assert_eq!(config.runtime.prompt, "");
        assert_eq!(config.runtime.max_line_length, 8191);
        assert!(config.runtime.history);
        assert_eq!(config.log.level().unwrap(), LogLevel::Info);
        assert_eq!(
            config.modules.builtins,
            vec!["cmd_exit", "cmd_help", "cmd_load", "cmd_scope", "get_user_input"]
        );
        assert!(config.modules.autoload.is_empty());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_config(
            r#"
[runtime]
prompt = "toy> "

[log]
level = "debug"
"#,
        );
        let config = load_config_file(file.path()).unwrap();
        assert_eq!(config.runtime.prompt, "toy> ");
        assert_eq!(config.runtime.max_line_length, 8191);
        assert_eq!(config.log.level().unwrap(), LogLevel::Debug);
        assert_eq!(config.modules.builtins.len(), 5);
    }

    #[test]
    fn test_module_lists() {
        let file = write_config(
            r#"
[modules]
builtins = ["cmd_exit"]
autoload = ["./libhello.so"]
"#,
        );
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.modules.builtins, vec!["cmd_exit"]);
        assert_eq!(config.modules.autoload.len(), 1);
    }

    #[test]
    fn test_malformed_file() {
        let file = write_config("[runtime\nprompt = ");
        assert!(matches!(
            load_config_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_bad_log_level() {
        let file = write_config("[log]\nlevel = \"loud\"\n");
        assert!(matches!(
            load_config_file(file.path()),
            Err(ConfigError::InvalidLogLevel(level)) if level == "loud"
        ));
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            load_config(Some(&path)),
            Err(ConfigError::Io { .. })
        ));
    }
}
