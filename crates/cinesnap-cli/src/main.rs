use std::fs;
use std::io::{self, BufRead, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use cinesnap_contracts::chat::{parse_studio_command, StudioCommand, STUDIO_HELP_COMMANDS};
use cinesnap_contracts::events::{EventLog, StudioEvent};
use cinesnap_contracts::history::{HistoryItem, HistoryStore};
use cinesnap_contracts::prompt::{
    is_known_aspect_ratio, GenerationRequestConfig, QualityPresets, ASPECT_RATIOS, CAMERA_VIEWS,
    DEFAULT_ASPECT_RATIO, DEFAULT_CAMERA_VIEW, DEFAULT_QUALITY_PRESET,
};
use cinesnap_contracts::storage::FileKeyValueStore;
use cinesnap_engine::artifacts::decode_data_uri;
use cinesnap_engine::client::non_empty_env;
use cinesnap_engine::{
    save_download, ClipboardSink, DryrunClient, ImageClient, ImagenClient, SessionKeyProvider,
    Status, StatusKind, Studio, StudioView, SubmitOutcome,
};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

const DATA_DIR_ENV: &str = "CINESNAP_HOME";
const HISTORY_FILE_NAME: &str = "history.json";
const EVENTS_FILE_NAME: &str = "events.jsonl";
const HISTORY_PROMPT_PREVIEW_CHARS: usize = 72;
const EXIT_GENERATION_FAILED: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "cinesnap", version, about = "Cinematic image generation studio")]
struct Cli {
    /// Where history.json and events.jsonl live.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    #[command(subcommand)]
    History(HistoryCommand),
    Studio(StudioArgs),
}

#[derive(Debug, Clone, Args)]
struct GenerationOptions {
    #[arg(long, default_value = DEFAULT_ASPECT_RATIO)]
    aspect_ratio: String,
    #[arg(long, default_value = DEFAULT_QUALITY_PRESET)]
    quality: String,
    #[arg(long, default_value = DEFAULT_CAMERA_VIEW)]
    camera: String,
    #[arg(long, default_value = "")]
    negative: String,
    /// Offline client; no network, no API key.
    #[arg(long)]
    dryrun: bool,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(required = true, num_args = 1..)]
    prompt: Vec<String>,
    #[command(flatten)]
    options: GenerationOptions,
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct StudioArgs {
    #[command(flatten)]
    options: GenerationOptions,
    /// Default directory for /download.
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum HistoryCommand {
    List {
        #[arg(long)]
        json: bool,
    },
    Copy {
        id: String,
    },
    Export {
        id: String,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    Clear {
        #[arg(long)]
        yes: bool,
    },
}

impl GenerationOptions {
    fn request_config(&self, prompt: impl Into<String>) -> Result<GenerationRequestConfig> {
        let aspect_ratio = self.aspect_ratio.trim().to_string();
        if !aspect_ratio.is_empty() && !is_known_aspect_ratio(&aspect_ratio) {
            bail!(
                "unsupported aspect ratio '{aspect_ratio}' (expected one of {})",
                ASPECT_RATIOS.join(", ")
            );
        }
        let quality_preset = self.quality.trim().to_ascii_lowercase();
        let presets = QualityPresets::default();
        if presets.get(&quality_preset).is_none() {
            bail!(
                "unknown quality preset '{quality_preset}' (expected one of {})",
                presets.names().join(", ")
            );
        }
        let camera_view = match self.camera.trim() {
            "" => DEFAULT_CAMERA_VIEW.to_string(),
            value => value.to_ascii_lowercase(),
        };
        Ok(GenerationRequestConfig {
            prompt: prompt.into(),
            negative_prompt: self.negative.clone(),
            aspect_ratio,
            quality_preset,
            camera_view,
        })
    }
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("cinesnap error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = DataPaths::new(resolve_data_dir(
        cli.data_dir,
        non_empty_env(DATA_DIR_ENV),
        dirs::data_dir(),
    ));
    match cli.command {
        Command::Generate(args) => run_generate(&paths, args),
        Command::History(command) => run_history(&paths, command),
        Command::Studio(args) => {
            run_studio(&paths, args)?;
            Ok(0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn history_file(&self) -> PathBuf {
        self.root.join(HISTORY_FILE_NAME)
    }

    fn events_file(&self) -> PathBuf {
        self.root.join(EVENTS_FILE_NAME)
    }

    fn history(&self) -> HistoryStore<FileKeyValueStore> {
        HistoryStore::new(FileKeyValueStore::new(self.history_file()))
    }

    fn event_log(&self) -> EventLog {
        EventLog::new(self.events_file(), uuid::Uuid::new_v4().to_string())
    }
}

/// Flag, then `CINESNAP_HOME`, then the platform data dir, then `./.cinesnap`.
fn resolve_data_dir(
    flag: Option<PathBuf>,
    home_env: Option<String>,
    platform_dir: Option<PathBuf>,
) -> PathBuf {
    flag.or_else(|| home_env.map(PathBuf::from))
        .or_else(|| platform_dir.map(|dir| dir.join("cinesnap")))
        .unwrap_or_else(|| PathBuf::from(".cinesnap"))
}

fn build_studio(paths: &DataPaths, options: &GenerationOptions) -> Result<Studio> {
    fs::create_dir_all(&paths.root)
        .with_context(|| format!("failed to create data dir {}", paths.root.display()))?;
    let client: Box<dyn ImageClient> = if options.dryrun {
        Box::new(DryrunClient)
    } else {
        Box::new(ImagenClient::new())
    };
    tracing::debug!(client = client.name(), data_dir = %paths.root.display(), "starting studio");
    Ok(Studio::new(
        client,
        FileKeyValueStore::new(paths.history_file()),
        SessionKeyProvider::new(prompt_for_api_key),
        TerminalView,
    )
    .with_events(paths.event_log()))
}

fn run_generate(paths: &DataPaths, args: GenerateArgs) -> Result<i32> {
    let config = args.options.request_config(args.prompt.join(" "))?;
    let studio = build_studio(paths, &args.options)?;
    match studio.submit(config) {
        SubmitOutcome::Succeeded { .. } => {
            studio.download_current(&args.out)?;
            Ok(0)
        }
        SubmitOutcome::Busy | SubmitOutcome::Invalid(_) | SubmitOutcome::Failed { .. } => {
            Ok(EXIT_GENERATION_FAILED)
        }
    }
}

fn run_history(paths: &DataPaths, command: HistoryCommand) -> Result<i32> {
    let history = paths.history();
    match command {
        HistoryCommand::List { json } => {
            let items = history.load();
            if json {
                println!("{}", serde_json::to_string_pretty(&history_rows(&items))?);
            } else if items.is_empty() {
                println!("History is empty.");
            } else {
                for (index, item) in items.iter().enumerate() {
                    println!("{}", format_history_line(index + 1, item));
                }
            }
        }
        HistoryCommand::Copy { id } => {
            let Some(item) = history.find(&id) else {
                bail!("no history item matches '{id}'");
            };
            match SystemClipboard.set_text(item.prompt()) {
                Ok(()) => println!("Prompt copied!"),
                Err(err) => {
                    tracing::warn!(id = item.id(), "clipboard write failed: {err:#}");
                    eprintln!("Clipboard unavailable; prompt follows.");
                    println!("{}", item.prompt());
                }
            }
        }
        HistoryCommand::Export { id, out } => {
            let Some(item) = history.find(&id) else {
                bail!("no history item matches '{id}'");
            };
            let path = save_download(&out, &item)?;
            println!("{}", path.display());
        }
        HistoryCommand::Clear { yes } => {
            if !yes && !confirm("Clear all saved history?", &mut io::stdin().lock())? {
                println!("History kept.");
                return Ok(0);
            }
            history.clear()?;
            paths.event_log().record(&StudioEvent::HistoryCleared);
            println!("History cleared.");
        }
    }
    Ok(0)
}

fn run_studio(paths: &DataPaths, args: StudioArgs) -> Result<()> {
    let mut settings = args.options.request_config(String::new())?;
    let studio = build_studio(paths, &args.options)?;
    let clipboard = SystemClipboard;

    println!(
        "Cinesnap studio ({} client). Type a prompt, or /help for commands.",
        studio.client_name()
    );
    studio.refresh_history();

    let stdin = io::stdin();
    let mut line = String::new();
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

        let command = parse_studio_command(line.trim_end_matches(['\n', '\r']));
        match command.action.as_str() {
            "noop" => {}
            "generate" => {
                let mut request = settings.clone();
                request.prompt = command.prompt.clone().unwrap_or_default();
                studio.submit(request);
            }
            "set_aspect" | "set_quality" | "set_camera" | "set_negative" => {
                println!("{}", apply_setting(&mut settings, &command, &studio));
            }
            "history" => {
                let items = studio.history();
                if items.is_empty() {
                    println!("History is empty.");
                }
                for (index, item) in items.iter().enumerate() {
                    println!("{}", format_history_line(index + 1, item));
                }
            }
            "restore" => match command.arg("selector") {
                Some(selector) => {
                    studio.restore(selector);
                }
                None => println!("/restore requires an id or #n"),
            },
            "copy_prompt" => match command.arg("selector") {
                Some(selector) => {
                    studio.copy_prompt(selector, &clipboard);
                }
                None => println!("/copy requires an id or #n"),
            },
            "download" => {
                let dir = command
                    .arg("path")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| args.out.clone());
                if let Err(err) = studio.download_current(&dir) {
                    println!("Download failed: {err:#}");
                }
            }
            "clear_history" => {
                if confirm("Clear all saved history?", &mut stdin.lock())? {
                    if let Err(err) = studio.clear_history() {
                        println!("Clear failed: {err:#}");
                    }
                } else {
                    println!("History kept.");
                }
            }
            "select_key" => {
                if let Err(err) = studio.select_key() {
                    println!("Key selection failed: {err:#}");
                }
            }
            "settings" => print_settings(&settings),
            "help" => println!("Commands: {}", STUDIO_HELP_COMMANDS.join(" ")),
            "quit" => break,
            _ => println!(
                "Unknown command /{}. Type /help for commands.",
                command.arg("command").unwrap_or_default()
            ),
        }
    }
    Ok(())
}

/// Applies one `/aspect`, `/quality`, `/camera` or `/negative` command and returns the reply.
fn apply_setting(
    settings: &mut GenerationRequestConfig,
    command: &StudioCommand,
    studio: &Studio,
) -> String {
    match command.action.as_str() {
        "set_aspect" => match command.arg("aspect_ratio") {
            Some(value) if is_known_aspect_ratio(value) => {
                settings.aspect_ratio = value.to_string();
                format!("Aspect ratio set to {value}")
            }
            Some(value) => format!(
                "Unknown aspect ratio {value}. Options: {}",
                ASPECT_RATIOS.join(", ")
            ),
            None => format!("Aspect ratio: {}", settings.aspect_ratio),
        },
        "set_quality" => {
            let presets = studio.composer().quality_presets();
            match command.arg("quality_preset") {
                Some(value) => match presets.get(value) {
                    Some(preset) => {
                        settings.quality_preset = preset.name.clone();
                        format!("Quality set to {}", preset.label)
                    }
                    None => format!(
                        "Unknown quality {value}. Options: {}",
                        presets.names().join(", ")
                    ),
                },
                None => format!("Quality: {}", settings.quality_preset),
            }
        }
        "set_camera" => match command.arg("camera_view") {
            Some(value) => {
                settings.camera_view = value.to_string();
                format!("Camera view set to {value}")
            }
            None => format!(
                "Camera view: {}. Options: {}",
                settings.camera_view,
                CAMERA_VIEWS.join(", ")
            ),
        },
        "set_negative" => {
            settings.negative_prompt = command
                .arg("negative_prompt")
                .unwrap_or_default()
                .to_string();
            if settings.negative_prompt.is_empty() {
                "Negative prompt cleared".to_string()
            } else {
                format!("Negative prompt set to {}", settings.negative_prompt)
            }
        }
        other => format!("Unsupported setting {other}"),
    }
}

fn print_settings(settings: &GenerationRequestConfig) {
    let aspect = if settings.aspect_ratio.is_empty() {
        "(service default)"
    } else {
        settings.aspect_ratio.as_str()
    };
    let negative = if settings.negative_prompt.trim().is_empty() {
        "(none)"
    } else {
        settings.negative_prompt.as_str()
    };
    println!("Aspect ratio: {aspect}");
    println!("Quality: {}", settings.quality_preset);
    println!("Camera view: {}", settings.camera_view);
    println!("Negative prompt: {negative}");
}

fn history_rows(items: &[HistoryItem]) -> Value {
    Value::Array(
        items
            .iter()
            .map(|item| {
                json!({
                    "id": item.id(),
                    "prompt": item.prompt(),
                    "timestamp": item.timestamp(),
                })
            })
            .collect(),
    )
}

fn format_history_line(position: usize, item: &HistoryItem) -> String {
    let short_id: String = item.id().chars().take(8).collect();
    format!(
        "#{position:<3} {short_id}  {}  {}",
        format_timestamp(item.timestamp()),
        preview(item.prompt(), HISTORY_PROMPT_PREVIEW_CHARS)
    )
}

fn format_timestamp(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|utc| utc.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{head}...")
}

fn confirm(question: &str, input: &mut dyn BufRead) -> Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn prompt_for_api_key() -> Result<Option<String>> {
    eprint!("Enter an API key for this session (blank to cancel): ");
    io::stderr().flush()?;
    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read API key")?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()).filter(|key| !key.is_empty()))
}

struct TerminalView;

impl StudioView for TerminalView {
    fn set_controls_enabled(&self, enabled: bool) {
        tracing::debug!(enabled, "studio input toggled");
    }

    fn show_image(&self, item: &HistoryItem) {
        let size = decode_data_uri(item.image_url())
            .map(|(_, bytes)| format!("{} KB", bytes.len().div_ceil(1024)))
            .unwrap_or_else(|_| "unreadable".to_string());
        let short_id: String = item.id().chars().take(8).collect();
        println!("Image {short_id} ({size}). /download saves it.");
    }

    fn show_status(&self, status: &Status) {
        match status.kind {
            StatusKind::Error => eprintln!("{}", status.text),
            StatusKind::Warning => eprintln!("warning: {}", status.text),
            StatusKind::Info | StatusKind::Success => println!("{}", status.text),
        }
    }

    fn render_history(&self, items: &[HistoryItem]) {
        println!("History: {} saved", items.len());
    }
}

struct SystemClipboard;

impl ClipboardSink for SystemClipboard {
    fn set_text(&self, text: &str) -> Result<()> {
        let mut clipboard = arboard::Clipboard::new().context("clipboard unavailable")?;
        clipboard
            .set_text(text.to_string())
            .context("clipboard write failed")?;
        Ok(())
    }
}
