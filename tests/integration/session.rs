//! Whole sessions: a toy runs until its input is exhausted or `exit` is typed.

use std::io::Cursor;
use std::path::PathBuf;

use cmdtoy::runtime::console::Console;
use cmdtoy::runtime::Toy;
use cmdtoy::util::config::ToyConfig;

fn session_with(
    config: ToyConfig,
    input: &str,
) -> String {
    let (console, capture) = Console::captured(Cursor::new(input.as_bytes().to_vec()));
    let toy = Toy::new(config, console);
    toy.run().expect("session should finish cleanly");
    assert!(toy.modules().is_empty(), "modules left after the session");
    assert_eq!(toy.pending_work(), 0);
    capture.contents()
}

fn session(input: &str) -> String {
    session_with(ToyConfig::default(), input)
}

#[test]
fn test_empty_input_shuts_down() {
    assert_eq!(session(""), "");
}

#[test]
fn test_exit_stops_reading() {
    let output = session("exit\nhelp\n");
    assert_eq!(output, "The program is exiting.  Good day to you.\n");
}

#[test]
fn test_help() {
    let output = session("help\n");
    assert!(output.starts_with("Available commands are:\n"));
    for (command, module) in [
        ("exit", "cmd_exit"),
        ("help", "cmd_help"),
        ("load", "cmd_load"),
        ("make_identifier", "cmd_scope"),
    ] {
        let line = format!("  '{}' from the '{}' module\n", command, module);
        assert!(output.contains(&line), "missing {:?} in {}", line, output);
    }
}

#[test]
fn test_blank_and_unterminated_lines() {
    let output = session("\n   \r\nexit");
    assert_eq!(output, "The program is exiting.  Good day to you.\n");
}

#[test]
fn test_unrecognized_command() {
    let output = session("frobnicate now\nexit\n");
    assert_eq!(
        output,
        "Awful command or file name: 'frobnicate'\nThe program is exiting.  Good day to you.\n"
    );
}

#[test]
fn test_null_character_ignored() {
    let output = session("hel\0p\nexit\n");
    assert_eq!(output, "The program is exiting.  Good day to you.\n");
}

#[test]
fn test_overlong_line_ignored() {
    let mut config = ToyConfig::default();
    config.runtime.max_line_length = 18;
    let output = session_with(config, "make_identifier x 1\nfind_identifier x\n");
    assert!(!output.contains("created"));
    assert!(output.contains("Identifier 'x' not found"));
}

#[test]
fn test_scope_session() {
    let output = session(
        "make_identifier greeting hello\n\
         push_scope\n\
         make_identifier greeting hi\n\
         find_identifier greeting\n\
         pop_scope\n\
         find_identifier greeting\n",
    );
    let lines: Vec<_> = output.lines().collect();
    assert_eq!(
        lines,
        vec![
            "Identifier 'greeting' created",
            "Scope depth is now 2",
            "Identifier 'greeting' created",
            "Identifier 'greeting' is 'hi' in scope #1",
            "Scope with 1 identifier(s) popped, depth is now 1",
            "Identifier 'greeting' is 'hello' in scope #0",
        ]
    );
}

#[test]
fn test_list_modules() {
    let output = session("list_modules\n");
    let lines: Vec<_> = output.lines().collect();
    assert_eq!(
        lines,
        vec![
            "Module #0 with serial '2024120200' is named 'cmd_exit'",
            "Module #1 with serial '2024120200' is named 'cmd_help'",
            "Module #2 with serial '2024120200' is named 'cmd_load'",
            "Module #3 with serial '2024120200' is named 'cmd_scope'",
            "Module #4 with serial '2024120200' is named 'get_user_input'",
        ]
    );
}

#[test]
fn test_unload_command_module() {
    let output = session("unload 1\nhelp\nlist_modules\n");
    assert!(output.starts_with("Requested module to be unloaded\nAwful command or file name: 'help'\n"));
    assert!(!output.contains("'cmd_help'"));
    assert!(output.contains("is named 'cmd_scope'"));
}

#[test]
fn test_unload_input_module_ends_session() {
    let output = session("unload 0x4\nhelp\n");
    assert_eq!(output, "Requested module to be unloaded\n");
}

#[test]
fn test_unload_bad_ordinal() {
    let output = session("unload 9\nunload nine\nunload\n");
    assert!(output.contains("Could not find loaded module #9"));
    assert!(output.contains("Specified module-number 'nine' is not a valid number"));
    assert!(output.contains("Usage:"));
}

#[test]
fn test_load_missing_plugin() {
    let output = session("load /nonexistent/cmdtoy/plugin.so\nlist_modules\n");
    assert!(output.contains("could not open plugin image '/nonexistent/cmdtoy/plugin.so'"));
    assert_eq!(output.matches("Module #").count(), 5);
}

#[test]
fn test_selected_builtins_only() {
    let mut config = ToyConfig::default();
    config.modules.builtins = vec!["get_user_input".to_string(), "cmd_exit".to_string()];
    let output = session_with(config, "help\nexit\n");
    assert_eq!(
        output,
        "Awful command or file name: 'help'\nThe program is exiting.  Good day to you.\n"
    );
}

#[test]
fn test_without_input_module() {
    let mut config = ToyConfig::default();
    config.modules.builtins = vec!["cmd_help".to_string()];
    assert_eq!(session_with(config, "help\n"), "");
}

#[test]
fn test_missing_autoload_is_skipped() {
    let mut config = ToyConfig::default();
    config.modules.autoload = vec![PathBuf::from("/nonexistent/cmdtoy/auto.so")];
    let output = session_with(config, "list_modules\n");
    assert_eq!(output.matches("Module #").count(), 5);
}
