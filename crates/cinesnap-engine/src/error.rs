use thiserror::Error;

use crate::client::ClientError;

const AUTH_SIGNATURES: &[&str] = &[
    "api_key_invalid",
    "api key not valid",
    "permission_denied",
    "permission denied",
];

const NOT_FOUND_SIGNATURES: &[&str] = &["requested entity was not found"];

/// User-facing outcome of a failed submit. `Display` is the status text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("Please enter a prompt.")]
    Validation,
    #[error("No image was generated. The prompt may have been blocked by content filters; try rephrasing it.")]
    EmptyResult,
    #[error("Your API key is invalid or lacks permission. Please select a valid API key.")]
    Authentication { detail: String },
    #[error("Requested entity was not found. The API key may be invalid or lack access to the model; please select a valid API key.")]
    NotFound { detail: String },
    #[error("An API key is required. Select a key and try again.")]
    MissingApiKey,
    #[error("Error: {message}")]
    Unclassified { message: String },
}

impl GenerationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::EmptyResult => "empty_result",
            Self::Authentication { .. } => "authentication",
            Self::NotFound { .. } => "not_found",
            Self::MissingApiKey => "missing_api_key",
            Self::Unclassified { .. } => "unclassified",
        }
    }

    pub fn user_message(&self) -> String {
        self.to_string()
    }

    /// Authentication and not-found failures both point at a bad key.
    pub fn triggers_key_selection(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::NotFound { .. })
    }
}

/// Status codes decide first; message signatures are the fallback.
pub fn classify(err: &ClientError) -> GenerationError {
    match err {
        ClientError::EmptyResult(_) => GenerationError::EmptyResult,
        ClientError::Status { status, .. } if matches!(*status, 401 | 403) => {
            GenerationError::Authentication {
                detail: err.message(),
            }
        }
        ClientError::Status { status: 404, .. } => GenerationError::NotFound {
            detail: err.message(),
        },
        other => classify_message(&other.message()),
    }
}

pub fn classify_message(message: &str) -> GenerationError {
    let lowered = message.to_ascii_lowercase();
    if AUTH_SIGNATURES
        .iter()
        .any(|signature| lowered.contains(signature))
    {
        return GenerationError::Authentication {
            detail: message.to_string(),
        };
    }
    if NOT_FOUND_SIGNATURES
        .iter()
        .any(|signature| lowered.contains(signature))
    {
        return GenerationError::NotFound {
            detail: message.to_string(),
        };
    }
    GenerationError::Unclassified {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use crate::client::ClientError;

    use super::{classify, classify_message, GenerationError};

    fn status(code: u16, body: &str) -> ClientError {
        ClientError::Status {
            provider: "Imagen".to_string(),
            status: code,
            body: body.to_string(),
        }
    }

    #[test]
    fn invalid_key_signature_is_authentication() {
        let classified = classify(&ClientError::from(anyhow::anyhow!(
            "[400] API key not valid. Please pass a valid API key. API_KEY_INVALID"
        )));
        assert_eq!(classified.kind(), "authentication");
        assert!(classified.triggers_key_selection());
        assert_eq!(
            classified.user_message(),
            "Your API key is invalid or lacks permission. Please select a valid API key."
        );
    }

    #[test]
    fn bad_request_body_with_key_reason_is_authentication() {
        let classified = classify(&status(
            400,
            r#"{"error":{"details":[{"reason":"API_KEY_INVALID"}]}}"#,
        ));
        assert_eq!(classified.kind(), "authentication");
    }

    #[test]
    fn permission_denied_is_authentication() {
        assert_eq!(
            classify_message("PERMISSION_DENIED: caller lacks access").kind(),
            "authentication"
        );
        assert_eq!(classify(&status(403, "forbidden")).kind(), "authentication");
        assert_eq!(classify(&status(401, "")).kind(), "authentication");
    }

    #[test]
    fn not_found_by_status_and_signature() {
        assert_eq!(classify(&status(404, "")).kind(), "not_found");
        let classified = classify_message("Requested entity was not found.");
        assert_eq!(classified.kind(), "not_found");
        assert!(classified.triggers_key_selection());
    }

    #[test]
    fn empty_result_does_not_open_key_dialog() {
        let classified = classify(&ClientError::EmptyResult("Imagen".to_string()));
        assert_eq!(classified, GenerationError::EmptyResult);
        assert!(!classified.triggers_key_selection());
    }

    #[test]
    fn other_errors_are_prefixed_raw_messages() {
        let classified = classify(&ClientError::from(anyhow::anyhow!("socket closed")));
        assert_eq!(
            classified,
            GenerationError::Unclassified {
                message: "socket closed".to_string()
            }
        );
        assert_eq!(classified.user_message(), "Error: socket closed");
        assert!(!classified.triggers_key_selection());

        let server = classify(&status(500, "internal"));
        assert_eq!(server.user_message(), "Error: Imagen request failed (500): internal");
    }

    #[test]
    fn validation_and_missing_key_messages() {
        assert_eq!(GenerationError::Validation.user_message(), "Please enter a prompt.");
        assert!(!GenerationError::MissingApiKey.triggers_key_selection());
    }
}
