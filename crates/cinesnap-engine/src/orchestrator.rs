use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use cinesnap_contracts::events::{EventLog, StudioEvent};
use cinesnap_contracts::history::{HistoryItem, HistoryStore};
use cinesnap_contracts::prompt::{GenerationRequestConfig, PromptComposer};
use cinesnap_contracts::storage::KeyValueStore;
use sha2::{Digest, Sha256};

use crate::artifacts::{save_download, ClipboardSink};
use crate::client::ImageClient;
use crate::error::{classify, GenerationError};
use crate::keys::KeyProvider;

pub const STATUS_GENERATING: &str = "Generating image...";
pub const STATUS_SUCCESS: &str = "Image generated successfully!";
pub const STATUS_PROMPT_COPIED: &str = "Prompt copied!";

/// Where the single-flight lifecycle stands. Success and failure are transient
/// and resolve straight back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Validating,
    InFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub kind: StatusKind,
    pub text: String,
}

impl Status {
    pub fn new(kind: StatusKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(StatusKind::Info, text)
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(StatusKind::Success, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(StatusKind::Warning, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(StatusKind::Error, text)
    }
}

/// Presentation side of the studio. Calls arrive synchronously from whichever
/// thread drives the orchestrator.
pub trait StudioView: Send + Sync {
    fn set_controls_enabled(&self, enabled: bool);
    fn show_image(&self, item: &HistoryItem);
    fn show_status(&self, status: &Status);
    fn render_history(&self, items: &[HistoryItem]);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Another generation is in flight; nothing happened.
    Busy,
    Invalid(GenerationError),
    Succeeded {
        item: HistoryItem,
        warnings: Vec<String>,
    },
    Failed {
        error: GenerationError,
    },
}

/// Single-flight generation controller.
///
/// `submit` is accepted only from `Idle`; a concurrent submit returns
/// [`SubmitOutcome::Busy`] without touching the client or the history.
/// Controls disabled on entry to `InFlight` are re-enabled on every exit path,
/// unwinding included.
pub struct Studio {
    client: Box<dyn ImageClient>,
    composer: PromptComposer,
    history: Mutex<HistoryStore<Box<dyn KeyValueStore>>>,
    keys: Box<dyn KeyProvider>,
    view: Box<dyn StudioView>,
    events: Option<EventLog>,
    phase: Mutex<Phase>,
    current: Mutex<Option<HistoryItem>>,
}

struct FlightGuard<'a> {
    studio: &'a Studio,
    controls_disabled: bool,
}

impl FlightGuard<'_> {
    fn enter_in_flight(&mut self) {
        *lock(&self.studio.phase) = Phase::InFlight;
        self.studio.view.set_controls_enabled(false);
        self.controls_disabled = true;
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        *lock(&self.studio.phase) = Phase::Idle;
        if self.controls_disabled {
            self.studio.view.set_controls_enabled(true);
        }
    }
}

impl Studio {
    pub fn new<C, S, K, V>(client: C, store: S, keys: K, view: V) -> Self
    where
        C: ImageClient + 'static,
        S: KeyValueStore + 'static,
        K: KeyProvider + 'static,
        V: StudioView + 'static,
    {
        let store: Box<dyn KeyValueStore> = Box::new(store);
        Self {
            client: Box::new(client),
            composer: PromptComposer::default(),
            history: Mutex::new(HistoryStore::new(store)),
            keys: Box::new(keys),
            view: Box::new(view),
            events: None,
            phase: Mutex::new(Phase::Idle),
            current: Mutex::new(None),
        }
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_composer(mut self, composer: PromptComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    pub fn composer(&self) -> &PromptComposer {
        &self.composer
    }

    pub fn phase(&self) -> Phase {
        *lock(&self.phase)
    }

    pub fn is_busy(&self) -> bool {
        self.phase() != Phase::Idle
    }

    pub fn current_image(&self) -> Option<HistoryItem> {
        lock(&self.current).clone()
    }

    pub fn history(&self) -> Vec<HistoryItem> {
        lock(&self.history).load()
    }

    pub fn find(&self, selector: &str) -> Option<HistoryItem> {
        lock(&self.history).find(selector)
    }

    pub fn refresh_history(&self) {
        let items = self.history();
        self.view.render_history(&items);
    }

    /// Runs one generation for `config`. Never panics on service errors and never
    /// returns them; failures come back classified inside the outcome.
    pub fn submit(&self, config: GenerationRequestConfig) -> SubmitOutcome {
        let Some(mut flight) = self.try_begin() else {
            tracing::debug!("submit ignored; a generation is already in flight");
            return SubmitOutcome::Busy;
        };

        if config.prompt.trim().is_empty() {
            let error = GenerationError::Validation;
            self.view.show_status(&Status::error(error.user_message()));
            return SubmitOutcome::Invalid(error);
        }

        flight.enter_in_flight();
        self.view.show_status(&Status::info(STATUS_GENERATING));
        match self.run_generation(&config) {
            Ok((item, warnings)) => SubmitOutcome::Succeeded { item, warnings },
            Err(error) => {
                self.report_failure(&error);
                SubmitOutcome::Failed { error }
            }
        }
    }

    pub fn restore(&self, selector: &str) -> Option<HistoryItem> {
        let Some(item) = self.find(selector) else {
            self.view
                .show_status(&Status::error(format!("No history item matches '{selector}'.")));
            return None;
        };
        *lock(&self.current) = Some(item.clone());
        self.view.show_image(&item);
        self.view
            .show_status(&Status::info("Restored image from history."));
        Some(item)
    }

    pub fn copy_prompt(&self, selector: &str, clipboard: &dyn ClipboardSink) -> Status {
        let status = match self.find(selector) {
            None => Status::error(format!("No history item matches '{selector}'.")),
            Some(item) => match clipboard.set_text(item.prompt()) {
                Ok(()) => Status::success(STATUS_PROMPT_COPIED),
                Err(err) => {
                    tracing::warn!(id = item.id(), "failed to copy prompt: {err:#}");
                    Status::error("Could not copy the prompt to the clipboard.")
                }
            },
        };
        self.view.show_status(&status);
        status
    }

    /// Saves the displayed image into `dir` and returns the written path.
    pub fn download_current(&self, dir: &Path) -> Result<PathBuf> {
        let Some(item) = self.current_image() else {
            bail!("No image to download yet.");
        };
        let path = save_download(dir, &item)?;
        self.view
            .show_status(&Status::success(format!("Saved {}", path.display())));
        Ok(path)
    }

    /// Runs the key-selection collaborator on demand.
    pub fn select_key(&self) -> Result<()> {
        self.keys.open_select_key()?;
        let status = if self.keys.api_key().is_some() {
            Status::info("API key ready for this session.")
        } else {
            Status::error("No API key selected.")
        };
        self.view.show_status(&status);
        Ok(())
    }

    /// Empties the persisted history. Refused while a generation is in flight.
    pub fn clear_history(&self) -> Result<()> {
        let phase = lock(&self.phase);
        if *phase != Phase::Idle {
            bail!("Cannot clear history while a generation is in flight.");
        }
        lock(&self.history).clear()?;
        drop(phase);

        self.record(StudioEvent::HistoryCleared);
        self.view.render_history(&[]);
        self.view.show_status(&Status::info("History cleared."));
        Ok(())
    }

    fn try_begin(&self) -> Option<FlightGuard<'_>> {
        let mut phase = lock(&self.phase);
        if *phase != Phase::Idle {
            return None;
        }
        *phase = Phase::Validating;
        Some(FlightGuard {
            studio: self,
            controls_disabled: false,
        })
    }

    fn run_generation(
        &self,
        config: &GenerationRequestConfig,
    ) -> Result<(HistoryItem, Vec<String>), GenerationError> {
        let api_key = self.resolve_api_key()?;
        let composed = self.composer.compose(config);
        self.record(StudioEvent::GenerationStarted {
            client: self.client.name().to_string(),
            prompt_sha256: prompt_digest(&composed),
            prompt_chars: composed.chars().count(),
            aspect_ratio: config.aspect_ratio.clone(),
            quality_preset: config.quality_preset.clone(),
            camera_view: config.camera_view.clone(),
            has_negative_prompt: !config.negative_prompt.trim().is_empty(),
        });

        let image = self
            .client
            .generate(&composed, &api_key, &config.aspect_ratio)
            .map_err(|err| {
                tracing::warn!(client = self.client.name(), "generation failed: {}", err.message());
                classify(&err)
            })?;

        let item = HistoryItem::new(composed, image.to_data_uri());
        *lock(&self.current) = Some(item.clone());
        self.view.show_image(&item);
        self.view.show_status(&Status::success(STATUS_SUCCESS));

        let warnings = self.persist(&item);
        self.record(StudioEvent::GenerationSucceeded {
            id: item.id().to_string(),
            image_bytes: image.bytes.len(),
            history_saved: warnings.is_empty(),
        });
        Ok((item, warnings))
    }

    fn resolve_api_key(&self) -> Result<String, GenerationError> {
        if !self.client.requires_api_key() {
            return Ok(String::new());
        }
        if let Some(key) = self.keys.api_key() {
            return Ok(key);
        }
        self.open_key_selection();
        self.keys.api_key().ok_or(GenerationError::MissingApiKey)
    }

    /// A failed history write never turns a successful generation into a failure.
    fn persist(&self, item: &HistoryItem) -> Vec<String> {
        let history = lock(&self.history);
        match history.append(item.clone()) {
            Ok(items) => {
                self.record(StudioEvent::HistoryAppended {
                    id: item.id().to_string(),
                    size: items.len(),
                });
                self.view.render_history(&items);
                Vec::new()
            }
            Err(err) => {
                let warning = format!("Image generated but not saved to history: {err:#}");
                tracing::warn!(id = item.id(), "history append failed: {err:#}");
                self.record(StudioEvent::HistoryPersistFailed {
                    id: item.id().to_string(),
                    error: format!("{err:#}"),
                });
                self.view.render_history(&history.load());
                self.view.show_status(&Status::warning(warning.clone()));
                vec![warning]
            }
        }
    }

    fn report_failure(&self, error: &GenerationError) {
        self.view.show_status(&Status::error(error.user_message()));
        if error.triggers_key_selection() {
            self.open_key_selection();
        }
        self.record(StudioEvent::GenerationFailed {
            kind: error.kind().to_string(),
            message: error.user_message(),
        });
    }

    fn open_key_selection(&self) {
        if let Err(err) = self.keys.open_select_key() {
            tracing::warn!("key selection failed: {err:#}");
        }
    }

    fn record(&self, event: StudioEvent) {
        if let Some(events) = &self.events {
            events.record(&event);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn prompt_digest(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}
