use std::io::BufReader;

use iris_contracts::messages::ChatRequest;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use thiserror::Error;

use crate::config::{Credential, ServiceConfig};
use crate::sse::ChatCompletionFragments;

const ERROR_BODY_LIMIT: usize = 512;

pub type FragmentStream<'a> = Box<dyn Iterator<Item = Result<String, ServiceError>> + 'a>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("OPENAI_API_KEY not set")]
    MissingCredential,
    #[error("chat request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("chat request failed ({status}): {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("chat stream failed: {0}")]
    Stream(String),
}

/// A chat-completions backend that answers with a stream of text fragments.
pub trait CompletionService: Send + Sync {
    fn stream_chat(&self, request: &ChatRequest) -> Result<FragmentStream<'_>, ServiceError>;
}

pub struct OpenAiCompletionService {
    http: HttpClient,
    endpoint: String,
    credential: Option<Credential>,
}

impl OpenAiCompletionService {
    pub fn new(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let http = HttpClient::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            endpoint: config.chat_completions_url(),
            credential: config.credential.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl CompletionService for OpenAiCompletionService {
    fn stream_chat(&self, request: &ChatRequest) -> Result<FragmentStream<'_>, ServiceError> {
        let credential = self
            .credential
            .as_ref()
            .ok_or(ServiceError::MissingCredential)?;
        tracing::debug!(model = %request.model, endpoint = %self.endpoint, "posting chat request");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(credential.expose())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ServiceError::UnexpectedStatus {
                status: status.as_u16(),
                body: truncate_text(&body, ERROR_BODY_LIMIT),
            });
        }
        Ok(Box::new(ChatCompletionFragments::new(BufReader::new(
            response,
        ))))
    }
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
