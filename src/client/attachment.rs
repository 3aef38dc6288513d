use base64::{ engine::general_purpose::STANDARD, Engine as _ };
use futures::future::try_join_all;
use std::io;
use std::path::{ Path, PathBuf };
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Failed to read attachment '{name}': {source}")]
pub struct AttachmentError {
    pub name: String,
    #[source]
    pub source: io::Error,
}

/// A file picked for the next message; read only when the message is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub path: PathBuf,
}

impl Attachment {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { name, path }
    }

    pub fn mime_type(&self) -> &'static str {
        mime_type_for(&self.path)
    }

    pub async fn to_data_uri(&self) -> Result<String, AttachmentError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|source| AttachmentError {
            name: self.name.clone(),
            source,
        })?;
        Ok(encode_data_uri(self.mime_type(), &bytes))
    }
}

pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Reads every attachment concurrently. Either all succeed, in input order,
/// or the first failure is returned and nothing is kept.
pub async fn read_all(attachments: &[Attachment]) -> Result<Vec<String>, AttachmentError> {
    try_join_all(attachments.iter().map(Attachment::to_data_uri)).await
}
