//! Upload validation and scoped temporary storage
//!
//! Audio uploads are checked against the configured extension allow-list
//! before any byte reaches the disk, then streamed chunk by chunk into a
//! `NamedTempFile` inside the configured temp directory while the running
//! size is held under the limit. The file is removed when the
//! [`UploadWriter`] or [`StoredUpload`] owning it is dropped, whichever way
//! the request ends.

use crate::config::UploadConfig;
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

/// Error types for upload validation and storage
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("File type '.{extension}' is not allowed. Allowed types: {allowed}")]
    UnsupportedType { extension: String, allowed: String },

    #[error("File has no extension. Allowed types: {allowed}")]
    MissingExtension { allowed: String },

    #[error("File too large: {size} bytes (maximum {limit} bytes)")]
    TooLarge { size: u64, limit: u64 },

    #[error("File is empty")]
    EmptyFile,

    #[error("Text is empty")]
    EmptyText,

    #[error("Text too large: {size} bytes (maximum {limit} bytes)")]
    TextTooLarge { size: u64, limit: u64 },

    #[error("Failed to store upload: {0}")]
    Storage(#[from] std::io::Error),
}

impl UploadError {
    /// Whether the client sent something unacceptable (vs. a server fault)
    pub fn is_client_error(&self) -> bool {
        !matches!(self, UploadError::Storage(_))
    }
}

/// Lower-cased extension of a client-supplied filename, if any
pub fn file_extension(filename: &str) -> Option<String> {
    let name = Path::new(filename).file_name()?.to_str()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Check a client filename against the allow-list, returning its extension
pub fn validate_extension(filename: &str, config: &UploadConfig) -> Result<String, UploadError> {
    let allowed = || config.allowed_extensions.join(", ");

    let extension = file_extension(filename).ok_or_else(|| UploadError::MissingExtension {
        allowed: allowed(),
    })?;

    if !config.is_extension_allowed(&extension) {
        return Err(UploadError::UnsupportedType {
            extension,
            allowed: allowed(),
        });
    }
    Ok(extension)
}

/// Validate an audio upload by name and size, returning its extension.
///
/// The content is never inspected: a file over the limit or with a
/// disallowed extension is rejected whatever its bytes are.
pub fn validate_audio(filename: &str, size: u64, config: &UploadConfig) -> Result<String, UploadError> {
    let extension = validate_extension(filename, config)?;

    if size > config.max_file_size {
        return Err(UploadError::TooLarge {
            size,
            limit: config.max_file_size,
        });
    }

    if size == 0 {
        return Err(UploadError::EmptyFile);
    }

    Ok(extension)
}

/// Validate pasted session notes, returning the trimmed text
pub fn validate_text<'a>(text: &'a str, config: &UploadConfig) -> Result<&'a str, UploadError> {
    let size = text.len() as u64;
    if size > config.max_text_size {
        return Err(UploadError::TextTooLarge {
            size,
            limit: config.max_text_size,
        });
    }

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(UploadError::EmptyText);
    }
    Ok(trimmed)
}

/// MIME type sent to the transcription provider for an audio extension
pub fn audio_mime_type(extension: &str) -> &'static str {
    match extension {
        "mp3" | "mpga" | "mpeg" => "audio/mpeg",
        "mp4" | "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "webm" => "audio/webm",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

/// Audio being streamed into a temporary file
#[derive(Debug)]
pub struct UploadWriter {
    file: NamedTempFile,
    writer: tokio::fs::File,
    original_name: String,
    extension: String,
    size: u64,
    limit: u64,
}

impl UploadWriter {
    /// Check the filename and open a fresh temp file in `config.temp_dir`
    pub async fn create(config: &UploadConfig, original_name: &str) -> Result<Self, UploadError> {
        let extension = validate_extension(original_name, config)?;

        tokio::fs::create_dir_all(&config.temp_dir).await?;
        let file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&format!(".{}", extension))
            .tempfile_in(&config.temp_dir)?;
        let writer = tokio::fs::File::from_std(file.as_file().try_clone()?);

        Ok(Self {
            file,
            writer,
            original_name: original_name.to_string(),
            extension,
            size: 0,
            limit: config.max_file_size,
        })
    }

    /// Append a chunk, failing as soon as the running size passes the limit
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), UploadError> {
        let size = self.size.saturating_add(chunk.len() as u64);
        if size > self.limit {
            return Err(UploadError::TooLarge {
                size,
                limit: self.limit,
            });
        }
        self.writer.write_all(chunk).await?;
        self.size = size;
        Ok(())
    }

    /// Flush the file and hand it over for transcription
    pub async fn finish(mut self) -> Result<StoredUpload, UploadError> {
        if self.size == 0 {
            return Err(UploadError::EmptyFile);
        }
        self.writer.flush().await?;

        tracing::debug!(
            path = %self.file.path().display(),
            size = self.size,
            "Stored upload in temporary file"
        );

        Ok(StoredUpload {
            file: self.file,
            original_name: self.original_name,
            extension: self.extension,
            size: self.size,
        })
    }
}

/// Accepted audio held in a temporary file for the lifetime of one request
#[derive(Debug)]
pub struct StoredUpload {
    file: NamedTempFile,
    original_name: String,
    extension: String,
    size: u64,
}

impl StoredUpload {
    /// Write a whole in-memory body through an [`UploadWriter`]
    #[cfg(test)]
    pub(crate) async fn store(
        config: &UploadConfig,
        original_name: &str,
        data: &[u8],
    ) -> Result<Self, UploadError> {
        let mut writer = UploadWriter::create(config, original_name).await?;
        writer.write_chunk(data).await?;
        writer.finish().await
    }

    /// Path of the temporary file
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Filename the client sent
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    /// Lower-cased extension
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime_type(&self) -> &'static str {
        audio_mime_type(&self.extension)
    }

    /// Open the stored audio for reading
    pub async fn open(&self) -> std::io::Result<tokio::fs::File> {
        tokio::fs::File::open(self.file.path()).await
    }
}

/// Source material of a new story
#[derive(Debug)]
pub enum UploadPayload {
    /// Audio that still has to be transcribed
    Audio(StoredUpload),
    /// Text notes used as the transcript directly
    Text(String),
}
