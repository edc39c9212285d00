use super::command_registry::{
    CommandAction, CommandSpec, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS,
};

/// One line of REPL input, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatIntent {
    Noop,
    Ask { prompt: String },
    Help,
    Quit,
    Preview,
    SetModel { model: String },
    SetMaxTokens { value: Option<u32>, raw: String },
    FollowUp { question: String },
    PinImage { path: String },
    Unknown { command: String, arg: String },
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<CommandAction> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

fn raw_arg_intent(action: CommandAction, arg: &str) -> ChatIntent {
    match action {
        CommandAction::SetModel => ChatIntent::SetModel {
            model: arg.to_string(),
        },
        CommandAction::SetMaxTokens => ChatIntent::SetMaxTokens {
            value: arg.parse::<u32>().ok().filter(|value| *value > 0),
            raw: arg.to_string(),
        },
        _ => ChatIntent::FollowUp {
            question: arg.to_string(),
        },
    }
}

pub fn parse_intent(text: &str) -> ChatIntent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return ChatIntent::Noop;
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                return raw_arg_intent(action, arg);
            }

            if find_action(&command, SINGLE_PATH_COMMANDS).is_some() {
                return ChatIntent::PinImage {
                    path: parse_single_path_arg(arg),
                };
            }

            match find_action(&command, NO_ARG_COMMANDS) {
                Some(CommandAction::Help) => return ChatIntent::Help,
                Some(CommandAction::Preview) => return ChatIntent::Preview,
                Some(CommandAction::Quit) => return ChatIntent::Quit,
                _ => {}
            }

            return ChatIntent::Unknown {
                command,
                arg: arg.to_string(),
            };
        }
    }

    ChatIntent::Ask {
        prompt: raw_trimmed.to_string(),
    }
}
