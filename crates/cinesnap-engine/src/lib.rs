pub mod artifacts;
pub mod client;
pub mod error;
pub mod keys;
pub mod orchestrator;

pub use artifacts::{download_file_name, save_download, ClipboardSink};
pub use client::{ClientError, DryrunClient, GeneratedImage, ImageClient, ImagenClient};
pub use error::{classify, GenerationError};
pub use keys::{api_key_from_env, KeyProvider, SessionKeyProvider};
pub use orchestrator::{Phase, Status, StatusKind, Studio, StudioView, SubmitOutcome};
