#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BotCommand {
    Start,
    Help,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CommandDef {
    command: BotCommand,
    patterns: &'static [&'static str],
    menu_name: &'static str,
    description: &'static str,
}

const COMMAND_DEFS: &[CommandDef] = &[
    CommandDef {
        command: BotCommand::Start,
        patterns: &["/start"],
        menu_name: "start",
        description: "Start or restart the conversation",
    },
    CommandDef {
        command: BotCommand::Help,
        patterns: &["/help"],
        menu_name: "help",
        description: "Show usage help",
    },
    CommandDef {
        command: BotCommand::Clear,
        patterns: &["/clear"],
        menu_name: "clear",
        description: "Clear conversation history",
    },
];

/// (command, description) pairs for the Telegram command menu.
pub(crate) fn command_menu() -> Vec<(String, String)> {
    COMMAND_DEFS
        .iter()
        .map(|def| (def.menu_name.to_string(), def.description.to_string()))
        .collect()
}

pub(crate) fn parse_command(text: &str) -> Option<BotCommand> {
    let trimmed = text.trim();

    COMMAND_DEFS.iter().find_map(|def| {
        def.patterns
            .iter()
            .any(|pattern| command_matches(trimmed, pattern))
            .then_some(def.command)
    })
}

fn command_matches(trimmed_text: &str, command: &str) -> bool {
    if trimmed_text == command {
        return true;
    }

    trimmed_text
        .strip_prefix(command)
        .is_some_and(|stripped| stripped.starts_with('@'))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{BotCommand, command_matches, command_menu, parse_command};

    #[test]
    fn parse_plain_commands() {
        assert_eq!(parse_command("/start"), Some(BotCommand::Start));
        assert_eq!(parse_command("/help"), Some(BotCommand::Help));
        assert_eq!(parse_command(" /clear "), Some(BotCommand::Clear));
    }

    #[test]
    fn parse_commands_with_bot_mention() {
        assert_eq!(parse_command("/start@tether_bot"), Some(BotCommand::Start));
        assert_eq!(parse_command("/clear@tether_bot"), Some(BotCommand::Clear));
    }

    #[test]
    fn rejects_non_commands() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("/clearly not"), None);
        assert_eq!(parse_command("/start now"), None);
        assert_eq!(parse_command("/unknown"), None);
    }

    #[test]
    fn command_matcher_accepts_bot_mentions_only() {
        assert!(command_matches("/clear", "/clear"));
        assert!(command_matches("/clear@tether_bot", "/clear"));
        assert!(!command_matches("/clear anything", "/clear"));
        assert!(!command_matches("/clearly", "/clear"));
    }

    #[test]
    fn menu_entries_are_unique_and_non_empty() {
        let menu = command_menu();
        assert!(!menu.is_empty());

        let mut names = HashSet::new();
        for (command, description) in menu {
            assert!(!command.trim().is_empty());
            assert!(!description.trim().is_empty());
            assert!(names.insert(command));
        }
    }
}
