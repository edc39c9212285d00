use serde::{Deserialize, Serialize};

/// Fixed system instruction sent with every vision request.
pub const OPERATOR_DIRECTIVE: &str = concat!(
    "You are a world class programmer.\n",
    "You help a programmer to answer programming questions.\n",
    "Please be concise and provide an answer and include code as needed.",
    "Answer the query in a freeform markdown-formatted response",
    "Restrict the format used in your answers as follows:\n",
    "1. Use Markdown formatting in your answers.\n",
    "2. Make sure to include the programming language name at the start of the Markdown code blocks.\n",
    "3. Avoid wrapping the whole response in triple backticks.\n",
);

/// Base64 image bytes plus the mime type they were encoded as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub mime_type: String,
    pub base64_data: String,
}

impl ImagePayload {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(payload: &ImagePayload) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl {
                url: payload.data_url(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System { content: String },
    User { content: Vec<ContentPart> },
}

/// Body of a streaming chat-completions call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(rename = "max_tokens")]
    pub max_output_tokens: u32,
}

impl ChatRequest {
    pub fn user_text(&self) -> Option<&str> {
        self.user_parts().find_map(|part| match part {
            ContentPart::Text { text } => Some(text.as_str()),
            ContentPart::ImageUrl { .. } => None,
        })
    }

    pub fn image_data_url(&self) -> Option<&str> {
        self.user_parts().find_map(|part| match part {
            ContentPart::ImageUrl { image_url } => Some(image_url.url.as_str()),
            ContentPart::Text { .. } => None,
        })
    }

    fn user_parts(&self) -> impl Iterator<Item = &ContentPart> + '_ {
        self.messages
            .iter()
            .filter_map(|message| match message {
                ChatMessage::User { content } => Some(content.iter()),
                ChatMessage::System { .. } => None,
            })
            .flatten()
    }
}
