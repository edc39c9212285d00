use iris_contracts::messages::{
    ChatMessage, ChatRequest, ContentPart, ImagePayload, OPERATOR_DIRECTIVE,
};

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 700;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    pub model: String,
    pub max_output_tokens: u32,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

/// The only request shape the pipeline sends: the operator directive, then
/// one user turn holding the question followed by the image.
pub fn build_chat_request(
    prompt: &str,
    image: &ImagePayload,
    options: &RequestOptions,
) -> ChatRequest {
    ChatRequest {
        model: options.model.clone(),
        messages: vec![
            ChatMessage::System {
                content: OPERATOR_DIRECTIVE.to_string(),
            },
            ChatMessage::User {
                content: vec![ContentPart::text(prompt), ContentPart::image(image)],
            },
        ],
        stream: true,
        max_output_tokens: options.max_output_tokens,
    }
}
