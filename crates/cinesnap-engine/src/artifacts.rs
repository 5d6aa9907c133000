use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cinesnap_contracts::history::HistoryItem;

pub const IMAGE_MIME_TYPE: &str = "image/jpeg";
pub const DOWNLOAD_EXTENSION: &str = "jpeg";

const DOWNLOAD_NAME_MAX_CHARS: usize = 30;

pub fn encode_data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", BASE64.encode(bytes))
}

/// Returns `(mime_type, bytes)`. Only base64 payloads are accepted.
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>)> {
    let Some(rest) = uri.trim().strip_prefix("data:") else {
        bail!("not a data URI");
    };
    let Some((header, encoded)) = rest.split_once(',') else {
        bail!("data URI has no payload separator");
    };
    let Some(mime_type) = header.strip_suffix(";base64") else {
        bail!("data URI is not base64 encoded");
    };
    let bytes = BASE64
        .decode(encoded.as_bytes())
        .context("data URI base64 decode failed")?;
    Ok((mime_type.to_string(), bytes))
}

/// First 30 characters of the prompt, non-alphanumerics as `_`, lower-cased, `.jpeg`.
pub fn download_file_name(prompt: &str) -> String {
    let stem = prompt
        .chars()
        .take(DOWNLOAD_NAME_MAX_CHARS)
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect::<String>();
    if stem.is_empty() {
        return format!("image.{DOWNLOAD_EXTENSION}");
    }
    format!("{stem}.{DOWNLOAD_EXTENSION}")
}

/// Writes the item's image into `dir`, overwriting a previous download of the same name.
pub fn save_download(dir: &Path, item: &HistoryItem) -> Result<PathBuf> {
    let (_, bytes) = decode_data_uri(item.image_url())
        .with_context(|| format!("history item {} has no usable image", item.id()))?;
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(download_file_name(item.prompt()));
    std::fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

pub trait ClipboardSink: Send + Sync {
    fn set_text(&self, text: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use cinesnap_contracts::history::HistoryItem;

    use super::{decode_data_uri, download_file_name, encode_data_uri, save_download};

    #[test]
    fn data_uri_roundtrip_keeps_mime() -> anyhow::Result<()> {
        let uri = encode_data_uri("image/jpeg", b"jpeg-bytes");
        assert!(uri.starts_with("data:image/jpeg;base64,"));
        let (mime, bytes) = decode_data_uri(&uri)?;
        assert_eq!(mime, "image/jpeg");
        assert_eq!(bytes, b"jpeg-bytes");
        Ok(())
    }

    #[test]
    fn decode_rejects_non_data_uris() {
        assert!(decode_data_uri("https://example.test/a.jpg").is_err());
        assert!(decode_data_uri("data:image/jpeg;base64").is_err());
        assert!(decode_data_uri("data:text/plain,hello").is_err());
    }

    #[test]
    fn file_name_is_sanitized_slice_of_prompt() {
        assert_eq!(download_file_name("A Cat, on Mars!"), "a_cat__on_mars_.jpeg");
        assert_eq!(
            download_file_name("a very long prompt that keeps going and going"),
            "a_very_long_prompt_that_keeps_.jpeg"
        );
        assert_eq!(download_file_name("café"), "caf_.jpeg");
        assert_eq!(download_file_name(""), "image.jpeg");
    }

    #[test]
    fn save_download_writes_decoded_bytes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let item = HistoryItem::new("Sunset Pier", encode_data_uri("image/jpeg", b"abc"));
        let path = save_download(&temp.path().join("out"), &item)?;
        assert_eq!(path.file_name().and_then(|name| name.to_str()), Some("sunset_pier.jpeg"));
        assert_eq!(std::fs::read(path)?, b"abc");
        Ok(())
    }

    #[test]
    fn save_download_rejects_remote_reference() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let item = HistoryItem::new("remote", "https://example.test/a.jpg");
        assert!(save_download(temp.path(), &item).is_err());
        Ok(())
    }
}
