//! Image and document payloads: file bytes as single-line base64.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chit_core::Command;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is empty")]
    Empty(PathBuf),
    #[error("{0} has no file name")]
    NoFileName(PathBuf),
    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),
}

async fn read_nonempty(path: &Path) -> Result<Vec<u8>, MediaError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| MediaError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(MediaError::Empty(path.to_path_buf()));
    }
    Ok(bytes)
}

/// `IMG` command carrying the file at `path`.
pub async fn load_image(path: &Path, caption: &str, unique_id: String) -> Result<Command, MediaError> {
    let bytes = read_nonempty(path).await?;
    Ok(Command::Image {
        unique_id,
        caption: caption.to_string(),
        payload: STANDARD.encode(bytes),
    })
}

/// `DOC` command carrying the file at `path`; the size is the raw byte count.
pub async fn load_document(path: &Path, unique_id: String) -> Result<Command, MediaError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| MediaError::NoFileName(path.to_path_buf()))?;
    let bytes = read_nonempty(path).await?;
    Ok(Command::Document {
        unique_id,
        file_name,
        file_size: bytes.len() as u64,
        payload: STANDARD.encode(bytes),
    })
}

pub fn decode_payload(payload: &str) -> Result<Vec<u8>, MediaError> {
    Ok(STANDARD.decode(payload.trim())?)
}
