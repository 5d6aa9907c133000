use std::sync::Mutex;

use anyhow::Result;

use crate::client::non_empty_env;

pub const API_KEY_ENV_VARS: &[&str] = &[
    "CINESNAP_API_KEY",
    "GEMINI_API_KEY",
    "GOOGLE_API_KEY",
    "API_KEY",
];

pub fn api_key_from_env() -> Option<String> {
    API_KEY_ENV_VARS.iter().find_map(|key| non_empty_env(key))
}

/// Source of the API key plus the interactive "select a key" action.
pub trait KeyProvider: Send + Sync {
    fn api_key(&self) -> Option<String>;
    fn open_select_key(&self) -> Result<()>;
}

/// Environment key with an in-memory override chosen through `selector`.
///
/// The override lives for the session only.
pub struct SessionKeyProvider<F> {
    selected: Mutex<Option<String>>,
    selector: F,
}

impl<F> SessionKeyProvider<F>
where
    F: Fn() -> Result<Option<String>> + Send + Sync,
{
    pub fn new(selector: F) -> Self {
        Self {
            selected: Mutex::new(None),
            selector,
        }
    }

    fn selected(&self) -> Option<String> {
        self.selected.lock().ok().and_then(|guard| guard.clone())
    }
}

impl<F> KeyProvider for SessionKeyProvider<F>
where
    F: Fn() -> Result<Option<String>> + Send + Sync,
{
    fn api_key(&self) -> Option<String> {
        self.selected().or_else(api_key_from_env)
    }

    fn open_select_key(&self) -> Result<()> {
        let Some(key) = (self.selector)()?
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        else {
            return Ok(());
        };
        let mut selected = self
            .selected
            .lock()
            .map_err(|_| anyhow::anyhow!("key selection lock poisoned"))?;
        *selected = Some(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{KeyProvider, SessionKeyProvider};

    #[test]
    fn selected_key_overrides_and_is_trimmed() -> anyhow::Result<()> {
        let provider = SessionKeyProvider::new(|| Ok(Some("  chosen-key \n".to_string())));
        provider.open_select_key()?;
        assert_eq!(provider.api_key().as_deref(), Some("chosen-key"));
        Ok(())
    }

    #[test]
    fn cancelled_selection_keeps_previous_choice() -> anyhow::Result<()> {
        let calls = AtomicUsize::new(0);
        let provider = SessionKeyProvider::new(|| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Some("first".to_string()))
            } else {
                Ok(Some("   ".to_string()))
            }
        });
        provider.open_select_key()?;
        provider.open_select_key()?;
        assert_eq!(provider.api_key().as_deref(), Some("first"));
        Ok(())
    }

    #[test]
    fn selector_errors_propagate() {
        let provider = SessionKeyProvider::new(|| Err(anyhow::anyhow!("stdin closed")));
        assert!(provider.open_select_key().is_err());
    }
}
