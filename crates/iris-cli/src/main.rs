use std::env;
use std::fs;
use std::io::{self, BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use iris_contracts::chat::{
    image_marker, is_image_path, parse_intent, ChatIntent, FollowUpAction, PromptVariable,
    CHAT_HELP_COMMANDS,
};
use iris_contracts::events::{ChatEvent, EventWriter};
use iris_engine::{
    load_home_dotenv, CancellationToken, ChatOutcome, ChatSink, ImagePicker, ImageTranscoder,
    IncomingRequest, OpenAiCompletionService, RequestOptions, ServiceConfig, VisionChat,
    DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_MODEL, DEFAULT_THUMBNAIL_WIDTH,
};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "iris", version, about = "Ask questions about images")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session; plain lines are questions.
    Chat(ChatArgs),
    /// Ask a single question and exit.
    Ask(AskArgs),
}

#[derive(Debug, Args)]
struct SessionArgs {
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
    #[arg(long, default_value_t = DEFAULT_MAX_OUTPUT_TOKENS)]
    max_output_tokens: u32,
    /// Overrides OPENAI_API_BASE / OPENAI_BASE_URL.
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    thumbnail_dir: Option<PathBuf>,
    #[arg(long, default_value_t = DEFAULT_THUMBNAIL_WIDTH)]
    thumbnail_width: u32,
    /// Base for relative `#image:` paths; the first one wins.
    #[arg(long = "workspace-root")]
    workspace_roots: Vec<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,
}

#[derive(Debug, Args)]
struct ChatArgs {
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Args)]
struct AskArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    image: Option<PathBuf>,
    #[command(flatten)]
    session: SessionArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("iris error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing();
    if let Some(path) = load_home_dotenv() {
        tracing::debug!("loaded {}", path.display());
    }
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Ask(args) => run_ask(args),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

struct Session {
    chat: VisionChat,
    preview_dir: PathBuf,
}

fn build_session(args: &SessionArgs) -> Result<Session> {
    let mut config =
        ServiceConfig::from_env().with_timeout(Duration::from_secs(args.timeout_secs));
    if let Some(api_base) = &args.api_base {
        config = config.with_api_base(api_base);
    }
    if config.credential.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set; requests will fail");
    }
    let service = OpenAiCompletionService::new(&config).context("failed to build HTTP client")?;

    let transcoder = match &args.thumbnail_dir {
        Some(dir) => ImageTranscoder::new(dir, args.thumbnail_width),
        None => ImageTranscoder::new(
            ImageTranscoder::default().thumbnail_dir(),
            args.thumbnail_width,
        ),
    };
    let preview_dir = transcoder.thumbnail_dir().to_path_buf();
    let options = RequestOptions {
        model: args.model.clone(),
        max_output_tokens: args.max_output_tokens,
    };

    let mut chat = VisionChat::new(Arc::new(service))
        .with_transcoder(transcoder)
        .with_options(options.clone())
        .with_workspace_roots(args.workspace_roots.clone());
    if let Some(path) = &args.events {
        let events = EventWriter::new(path, uuid::Uuid::new_v4().to_string());
        events.emit(&ChatEvent::SessionStarted {
            model: options.model,
            max_output_tokens: options.max_output_tokens,
        })?;
        chat = chat.with_events(events);
    }
    Ok(Session { chat, preview_dir })
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let Session {
        mut chat,
        preview_dir,
    } = build_session(&args.session)?;

    let stdin = io::stdin();
    let mut line = String::new();
    let mut pinned_image: Option<PathBuf> = None;
    let mut last_image: Option<PathBuf> = None;
    let mut last_action: Option<FollowUpAction> = None;

    println!("Iris chat started. Type /help for commands.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let prompt = match parse_intent(input) {
            ChatIntent::Noop => continue,
            ChatIntent::Help => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
                println!("Mark an image inline with #image:<path>.");
                continue;
            }
            ChatIntent::Quit => break,
            ChatIntent::SetModel { model } => {
                let model = model.trim();
                if model.is_empty() {
                    println!("Model is {}", chat.options().model);
                } else {
                    let mut options = chat.options().clone();
                    options.model = model.to_string();
                    chat.set_options(options);
                    println!("Model set to {model}");
                }
                continue;
            }
            ChatIntent::SetMaxTokens { value, raw } => {
                match value {
                    Some(value) => {
                        let mut options = chat.options().clone();
                        options.max_output_tokens = value;
                        chat.set_options(options);
                        println!("Max output tokens set to {value}");
                    }
                    None => println!("/max_tokens needs a positive number, got '{raw}'"),
                }
                continue;
            }
            ChatIntent::PinImage { path } => {
                if path.is_empty() {
                    println!("/image requires a path");
                } else {
                    let path = absolutize(Path::new(&path));
                    println!("Next question will use {}", path.display());
                    pinned_image = Some(path);
                }
                continue;
            }
            ChatIntent::Preview => {
                match &last_action {
                    Some(action) => {
                        let path = write_preview(&preview_dir, action.body())?;
                        println!("Preview written to {}", path.display());
                    }
                    None => println!("Nothing to preview yet."),
                }
                continue;
            }
            ChatIntent::FollowUp { question } => {
                match last_image.as_deref().and_then(|path| follow_up_prompt(&question, path)) {
                    Some(prompt) => prompt,
                    None => {
                        println!("No previous image to follow up on.");
                        continue;
                    }
                }
            }
            ChatIntent::Unknown { command, .. } => {
                println!("Unknown command /{command}. Type /help for commands.");
                continue;
            }
            ChatIntent::Ask { prompt } => prompt,
        };

        let mut request = IncomingRequest::new(prompt);
        if let Some(path) = pinned_image.take() {
            request = request.with_variable(pinned_variable(&path));
        }
        let cancel = CancellationToken::new();
        let mut sink = TerminalSink::new(io::stdout(), cancel.clone());
        let outcome = chat.handle(&request, &mut StdinPicker, &mut sink, &cancel);
        let _ = writeln!(io::stdout());
        match outcome {
            Ok(ChatOutcome::Answered(answer)) => {
                if answer.cancelled {
                    tracing::warn!("answer cut short; output is no longer writable");
                    break;
                }
                last_image = Some(answer.image_path);
                last_action = answer.action;
            }
            Ok(other) => report_outcome(&other),
            Err(err) => eprintln!("iris: {err}"),
        }
    }

    Ok(())
}

fn run_ask(args: AskArgs) -> Result<i32> {
    let Session { chat, .. } = build_session(&args.session)?;
    let mut request = IncomingRequest::new(args.prompt);
    if let Some(path) = &args.image {
        request = request.with_variable(pinned_variable(&absolutize(path)));
    }

    let cancel = CancellationToken::new();
    let mut sink = TerminalSink::new(io::stdout(), cancel.clone());
    let outcome = chat.handle(&request, &mut StdinPicker, &mut sink, &cancel)?;
    let _ = writeln!(io::stdout());
    match outcome {
        ChatOutcome::Answered(answer) if answer.cancelled => Ok(1),
        ChatOutcome::Answered(_) => Ok(0),
        other => {
            report_outcome(&other);
            Ok(1)
        }
    }
}

fn report_outcome(outcome: &ChatOutcome) {
    match outcome {
        ChatOutcome::ImageFailed {
            image_path,
            message,
        } => eprintln!("iris: could not use {}: {message}", image_path.display()),
        ChatOutcome::Cancelled => eprintln!("iris: no image selected"),
        ChatOutcome::NeedsPrompt | ChatOutcome::Answered(_) => {}
    }
}

/// A structured reference that covers no prompt text.
fn pinned_variable(path: &Path) -> PromptVariable {
    PromptVariable::new("image", 0..0, path.display().to_string())
}

/// Relative paths are made absolute first so paths with whitespace can be
/// rendered as `file://` markers.
fn follow_up_prompt(question: &str, image: &Path) -> Option<String> {
    let marker = image_marker(&absolutize(image))?;
    let question = question.trim();
    if question.is_empty() {
        return Some(marker);
    }
    Some(format!("{question} {marker}"))
}

fn write_preview(dir: &Path, body: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let mut stem = [0u8; 8];
    OsRng.fill_bytes(&mut stem);
    let path = dir.join(format!("{}-preview.html", hex::encode(stem)));
    fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn absolutize(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Renders the answer as markdown. A failed write (closed pipe, gone
/// terminal) cancels the request so no further fragment is read.
struct TerminalSink<W: Write> {
    out: W,
    cancel: CancellationToken,
}

impl<W: Write> TerminalSink<W> {
    fn new(out: W, cancel: CancellationToken) -> Self {
        Self { out, cancel }
    }

    fn write(&mut self, text: &str) {
        if self.cancel.is_cancelled() {
            return;
        }
        let result = self
            .out
            .write_all(text.as_bytes())
            .and_then(|()| self.out.flush());
        if let Err(err) = result {
            tracing::debug!("output closed, cancelling request: {err}");
            self.cancel.cancel();
        }
    }
}

impl<W: Write> ChatSink for TerminalSink<W> {
    fn emit_text(&mut self, text: &str) {
        self.write(text);
    }

    fn emit_inline_image(&mut self, path: &Path) {
        self.write(&format!("\n![image](file://{})\n\n", path.display()));
    }

    fn offer_action(&mut self, action: &FollowUpAction) {
        match action {
            FollowUpAction::PreviewHtml { .. } => {
                self.write("\n[html preview available: /preview]\n");
            }
        }
    }
}

struct StdinPicker;

impl ImagePicker for StdinPicker {
    fn pick_image(&mut self) -> Option<PathBuf> {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        read_image_choice(&mut input, &mut io::stdout())
    }
}

fn read_image_choice(input: &mut impl BufRead, out: &mut impl Write) -> Option<PathBuf> {
    let _ = write!(out, "Image (png, jpg, jpeg; blank to cancel): ");
    let _ = out.flush();
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) | Err(_) => return None,
        Ok(_) => {}
    }
    let choice = line.trim();
    if choice.is_empty() {
        return None;
    }
    let path = PathBuf::from(choice);
    if !is_image_path(&path) {
        let _ = writeln!(out, "Not an image file: {choice}");
        return None;
    }
    Some(absolutize(&path))
}
