pub mod aggregate;
pub mod config;
pub mod pipeline;
pub mod request;
pub mod service;
pub mod sse;
pub mod transcode;

pub use aggregate::{aggregate_stream, AggregatedResponse, CancellationToken, ChatSink};
pub use config::{load_home_dotenv, Credential, ServiceConfig, DEFAULT_API_BASE};
pub use pipeline::{
    ChatAnswer, ChatOutcome, ImagePicker, IncomingRequest, VisionChat, EMPTY_PROMPT_MESSAGE,
};
pub use request::{build_chat_request, RequestOptions, DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_MODEL};
pub use service::{CompletionService, FragmentStream, OpenAiCompletionService, ServiceError};
pub use transcode::{ImageTranscoder, TranscodeError, TranscodedImage, DEFAULT_THUMBNAIL_WIDTH};

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs;
    use std::io::Cursor;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use image::{ImageFormat, Rgb, RgbImage};
    use iris_contracts::chat::FollowUpAction;
    use iris_contracts::messages::ChatRequest;

    use crate::aggregate::ChatSink;
    use crate::pipeline::ImagePicker;
    use crate::service::{CompletionService, FragmentStream, ServiceError};

    pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode test png");
        bytes
    }

    /// Writes PNG bytes whatever the extension says.
    pub fn write_png(path: &Path, width: u32, height: u32) -> std::io::Result<()> {
        fs::write(path, png_bytes(width, height))
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum SinkEvent {
        Text(String),
        InlineImage(PathBuf),
        Action(FollowUpAction),
    }

    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub events: Vec<SinkEvent>,
    }

    impl ChatSink for RecordingSink {
        fn emit_text(&mut self, text: &str) {
            self.events.push(SinkEvent::Text(text.to_string()));
        }

        fn emit_inline_image(&mut self, path: &Path) {
            self.events.push(SinkEvent::InlineImage(path.to_path_buf()));
        }

        fn offer_action(&mut self, action: &FollowUpAction) {
            self.events.push(SinkEvent::Action(action.clone()));
        }
    }

    pub struct ScriptedPicker {
        choice: Option<PathBuf>,
        pub calls: usize,
    }

    impl ScriptedPicker {
        pub fn new(choice: Option<PathBuf>) -> Self {
            Self { choice, calls: 0 }
        }
    }

    impl ImagePicker for ScriptedPicker {
        fn pick_image(&mut self) -> Option<PathBuf> {
            self.calls += 1;
            self.choice.clone()
        }
    }

    enum Reply {
        Fragments(Vec<String>),
        Status { status: u16, body: String },
    }

    pub struct FakeService {
        reply: Reply,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl FakeService {
        pub fn answering(fragments: &[&str]) -> Self {
            Self {
                reply: Reply::Fragments(fragments.iter().map(|item| item.to_string()).collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(status: u16, body: &str) -> Self {
            Self {
                reply: Reply::Status {
                    status,
                    body: body.to_string(),
                },
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().expect("requests lock").clone()
        }
    }

    impl CompletionService for FakeService {
        fn stream_chat(&self, request: &ChatRequest) -> Result<FragmentStream<'_>, ServiceError> {
            self.requests
                .lock()
                .expect("requests lock")
                .push(request.clone());
            match &self.reply {
                Reply::Fragments(fragments) => Ok(Box::new(fragments.clone().into_iter().map(Ok))),
                Reply::Status { status, body } => Err(ServiceError::UnexpectedStatus {
                    status: *status,
                    body: body.clone(),
                }),
            }
        }
    }
}
