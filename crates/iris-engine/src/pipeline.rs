use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use iris_contracts::chat::{
    preview_action, resolve_prompt_reference, FollowUpAction, PromptVariable,
};
use iris_contracts::events::{ChatEvent, EventWriter};

use crate::aggregate::{aggregate_stream, CancellationToken, ChatSink};
use crate::request::{build_chat_request, RequestOptions};
use crate::service::{CompletionService, ServiceError};
use crate::transcode::ImageTranscoder;

pub const EMPTY_PROMPT_MESSAGE: &str =
    "Enter the question about an image that you will then select.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingRequest {
    pub prompt: String,
    pub variables: Vec<PromptVariable>,
}

impl IncomingRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            variables: Vec::new(),
        }
    }

    pub fn with_variable(mut self, variable: PromptVariable) -> Self {
        self.variables.push(variable);
        self
    }
}

/// Interactive image selection. `None` means the user backed out.
pub trait ImagePicker {
    fn pick_image(&mut self) -> Option<PathBuf>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatAnswer {
    pub text: String,
    pub image_path: PathBuf,
    pub thumbnail_path: PathBuf,
    pub action: Option<FollowUpAction>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOutcome {
    /// The prompt was blank; the sink received [`EMPTY_PROMPT_MESSAGE`].
    NeedsPrompt,
    /// No image was referenced and the picker returned nothing.
    Cancelled,
    ImageFailed { image_path: PathBuf, message: String },
    Answered(ChatAnswer),
}

/// One configured vision chat endpoint. Shared read-only across requests.
pub struct VisionChat {
    service: Arc<dyn CompletionService>,
    transcoder: ImageTranscoder,
    options: RequestOptions,
    workspace_roots: Vec<PathBuf>,
    events: Option<EventWriter>,
    next_request_id: AtomicU64,
}

impl VisionChat {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self {
            service,
            transcoder: ImageTranscoder::default(),
            options: RequestOptions::default(),
            workspace_roots: Vec::new(),
            events: None,
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn with_transcoder(mut self, transcoder: ImageTranscoder) -> Self {
        self.transcoder = transcoder;
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_workspace_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.workspace_roots = roots;
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: RequestOptions) {
        self.options = options;
    }

    /// Runs one request end to end.
    ///
    /// Local problems (blank prompt, no selection, unreadable image) come back
    /// as a [`ChatOutcome`]. Failures talking to the service are returned as
    /// errors, possibly after part of the answer reached the sink.
    pub fn handle(
        &self,
        request: &IncomingRequest,
        picker: &mut dyn ImagePicker,
        sink: &mut dyn ChatSink,
        cancel: &CancellationToken,
    ) -> Result<ChatOutcome, ServiceError> {
        if request.prompt.trim().is_empty() {
            sink.emit_text(EMPTY_PROMPT_MESSAGE);
            return Ok(ChatOutcome::NeedsPrompt);
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let reference =
            resolve_prompt_reference(&request.prompt, &request.variables, &self.workspace_roots);
        self.record(ChatEvent::RequestStarted {
            request_id,
            prompt_chars: reference.cleaned_prompt.chars().count(),
            reference: reference.reference.kind().to_string(),
        });

        let image_path = match reference.image_path() {
            Some(path) => path.to_path_buf(),
            None => match picker.pick_image() {
                Some(path) => path,
                None => {
                    tracing::debug!(request_id, "image selection cancelled");
                    self.record(ChatEvent::RequestCancelled { request_id });
                    return Ok(ChatOutcome::Cancelled);
                }
            },
        };

        let transcoded = match self.transcoder.read_and_transcode(&image_path) {
            Ok(transcoded) => transcoded,
            Err(err) => {
                let message = err.to_string();
                tracing::warn!(request_id, "image processing failed: {message}");
                self.record(ChatEvent::ImageFailed {
                    request_id,
                    image_path: image_path.display().to_string(),
                    message: message.clone(),
                });
                return Ok(ChatOutcome::ImageFailed {
                    image_path,
                    message,
                });
            }
        };
        self.record(ChatEvent::ImageTranscoded {
            request_id,
            image_path: image_path.display().to_string(),
            thumbnail_path: transcoded.thumbnail_path.display().to_string(),
            mime_type: transcoded.payload.mime_type.clone(),
            payload_bytes: transcoded.payload.base64_data.len(),
        });
        sink.emit_inline_image(&transcoded.thumbnail_path);

        let chat_request =
            build_chat_request(&reference.cleaned_prompt, &transcoded.payload, &self.options);
        let fragments = self.service.stream_chat(&chat_request)?;
        let response = aggregate_stream(fragments, sink, cancel)?;
        self.record(ChatEvent::StreamCompleted {
            request_id,
            fragments: response.fragments,
            chars: response.text.chars().count(),
            cancelled: response.cancelled,
        });

        let action = if response.cancelled {
            None
        } else {
            preview_action(&response.text)
        };
        if let Some(action) = &action {
            sink.offer_action(action);
            self.record(ChatEvent::ActionOffered {
                request_id,
                kind: action.kind().to_string(),
                body_chars: action.body().chars().count(),
            });
        }

        Ok(ChatOutcome::Answered(ChatAnswer {
            text: response.text,
            image_path,
            thumbnail_path: transcoded.thumbnail_path,
            action,
            cancelled: response.cancelled,
        }))
    }

    fn record(&self, event: ChatEvent) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events.emit(&event) {
            tracing::warn!("failed to write event to {}: {err:#}", events.path().display());
        }
    }
}
