pub mod code_blocks;
mod command_registry;
mod intent_parser;
pub mod reference;

pub use code_blocks::{extract_code_blocks, preview_action, CodeBlock, FollowUpAction};
pub use command_registry::CHAT_HELP_COMMANDS;
pub use intent_parser::{parse_intent, ChatIntent};
pub use reference::{
    find_image_marker, image_marker, is_image_path, resolve_prompt_reference, ImageReference,
    MarkerMatch, PromptReference, PromptVariable, IMAGE_EXTENSIONS, IMAGE_MARKER_PREFIX,
};
