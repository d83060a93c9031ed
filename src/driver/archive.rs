//! Storage for files fetched by archive requests.

use crate::error::{DriverError, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use url::Url;

/// A downloaded file handed to the archive callback.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveFile<'a> {
    pub content: &'a [u8],
    pub url: &'a Url,
    pub expected_type: Option<&'a str>,
    pub storage_dir: &'a Path,
}

/// Writes the file into `storage_dir` and returns the local path.
///
/// The file is named after the last path segment of the URL. URLs without one
/// get a name derived from a hash of the URL, with an extension guessed from the
/// expected type. Existing files are overwritten.
pub fn store_in_directory(file: &ArchiveFile<'_>) -> Result<String> {
    let filename = file
        .url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty() && *s != ".").last())
        .map(str::to_string)
        .unwrap_or_else(|| generated_name(file.url, file.expected_type));

    fs::create_dir_all(file.storage_dir).map_err(|e| {
        DriverError::archive(format!(
            "failed to create storage directory {}: {}",
            file.storage_dir.display(),
            e
        ))
    })?;
    let path = file.storage_dir.join(filename);
    fs::write(&path, file.content)
        .map_err(|e| DriverError::archive(format!("failed to write {}: {}", path.display(), e)))?;
    Ok(path.to_string_lossy().into_owned())
}

fn generated_name(url: &Url, expected_type: Option<&str>) -> String {
    let ext = match expected_type {
        Some("pdf") => ".pdf",
        Some("audio") => ".mp3",
        _ => "",
    };
    let digest = hex::encode(Sha256::digest(url.as_str().as_bytes()));
    format!("download_{}{}", &digest[..16], ext)
}
