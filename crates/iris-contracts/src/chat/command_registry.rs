#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CommandAction {
    Help,
    Quit,
    Preview,
    SetModel,
    SetMaxTokens,
    FollowUp,
    PinImage,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: CommandAction,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "model",
        action: CommandAction::SetModel,
    },
    CommandSpec {
        command: "max_tokens",
        action: CommandAction::SetMaxTokens,
    },
    CommandSpec {
        command: "followup",
        action: CommandAction::FollowUp,
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "image",
    action: CommandAction::PinImage,
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        action: CommandAction::Help,
    },
    CommandSpec {
        command: "preview",
        action: CommandAction::Preview,
    },
    CommandSpec {
        command: "quit",
        action: CommandAction::Quit,
    },
    CommandSpec {
        command: "exit",
        action: CommandAction::Quit,
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/help",
    "/model",
    "/max_tokens",
    "/image",
    "/followup",
    "/preview",
    "/quit",
];
