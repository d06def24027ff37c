//! Upload policy enforcement for multipart file parts.
//!
//! # Responsibilities
//! - Resolve per-extension allow/deny rules (forbidden set wins)
//! - Persist accepted parts to uniquely named temp files
//! - Report per-file outcomes in-band via numeric error codes
//!
//! # Design Decisions
//! - Rejected parts are still drained so multipart framing stays intact
//! - Reported size is the byte count actually written, never the
//!   client-declared size
//! - An unusable upload directory fails the whole part set with one code;
//!   nothing is partially stored

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use axum::extract::multipart::{Field, MultipartError};
use serde::Serialize;
use sha2::{Digest, Sha512};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Per-file outcome codes, mirrored by the worker side.
pub const UPLOAD_OK: u16 = 0;
pub const UPLOAD_ERR_OVERSIZED: u16 = 1;
pub const UPLOAD_ERR_NO_TMP_DIR: u16 = 6;
pub const UPLOAD_ERR_CANT_WRITE: u16 = 7;
pub const UPLOAD_ERR_EXTENSION: u16 = 8;

/// Forbidden/allowed extension rule set plus the storage directory.
#[derive(Debug, Clone, Default)]
pub struct UploadPolicy {
    dir: PathBuf,
    allowed: HashSet<String>,
    forbidden: HashSet<String>,
}

impl UploadPolicy {
    pub fn new(dir: impl Into<PathBuf>, allowed: &[String], forbidden: &[String]) -> Self {
        Self {
            dir: dir.into(),
            allowed: allowed.iter().map(|e| normalize_ext(e)).collect(),
            forbidden: forbidden.iter().map(|e| normalize_ext(e)).collect(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Extension verdict for a filename: forbidden is checked first (reject
    /// wins), then a non-empty allow set is default-deny.
    pub fn verdict(&self, filename: &str) -> u16 {
        let ext = extension_of(filename);
        if self.forbidden.contains(&ext) {
            return UPLOAD_ERR_EXTENSION;
        }
        if !self.allowed.is_empty() && !self.allowed.contains(&ext) {
            return UPLOAD_ERR_EXTENSION;
        }
        UPLOAD_OK
    }

    /// Whether the configured directory can receive files right now.
    pub async fn dir_usable(&self) -> bool {
        match fs::metadata(&self.dir).await {
            Ok(meta) => meta.is_dir(),
            Err(_) => false,
        }
    }
}

fn normalize_ext(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

fn extension_of(filename: &str) -> String {
    match Path::new(filename).extension() {
        Some(ext) => format!(".{}", ext.to_string_lossy().to_ascii_lowercase()),
        None => String::new(),
    }
}

/// One multipart file part after policy resolution. Serialized into the wire
/// context for the worker; `error != 0` implies size 0 and no checksum.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadDescriptor {
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub error: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha512: Option<String>,
    #[serde(rename = "tmpName", skip_serializing_if = "Option::is_none")]
    pub tmp_path: Option<PathBuf>,
}

/// Store a single file part according to policy. Always yields a descriptor;
/// only multipart framing errors propagate (they fail the whole request).
pub async fn store_part(
    policy: &UploadPolicy,
    field: &mut Field<'_>,
    filename: String,
    mime: String,
    size_limit: u64,
    dir_ok: bool,
) -> Result<UploadDescriptor, MultipartError> {
    let mut desc = UploadDescriptor {
        name: filename,
        mime,
        ..Default::default()
    };

    let verdict = policy.verdict(&desc.name);
    if verdict != UPLOAD_OK {
        drain(field).await?;
        desc.error = verdict;
        return Ok(desc);
    }

    if !dir_ok {
        drain(field).await?;
        desc.error = UPLOAD_ERR_NO_TMP_DIR;
        return Ok(desc);
    }

    let path = policy.dir.join(format!("upload_{}.tmp", Uuid::new_v4()));
    let mut file = match fs::File::create(&path).await {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to create upload temp file");
            drain(field).await?;
            desc.error = UPLOAD_ERR_CANT_WRITE;
            return Ok(desc);
        }
    };

    let mut hasher = Sha512::new();
    let mut written: u64 = 0;

    loop {
        let chunk = match field.chunk().await? {
            Some(c) => c,
            None => break,
        };

        written += chunk.len() as u64;
        if size_limit != 0 && written > size_limit {
            discard(file, &path).await;
            drain(field).await?;
            desc.error = UPLOAD_ERR_OVERSIZED;
            return Ok(desc);
        }

        hasher.update(&chunk);
        if let Err(e) = file.write_all(&chunk).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to write upload temp file");
            discard(file, &path).await;
            drain(field).await?;
            desc.error = UPLOAD_ERR_CANT_WRITE;
            return Ok(desc);
        }
    }

    if let Err(e) = file.flush().await {
        tracing::warn!(path = %path.display(), error = %e, "failed to flush upload temp file");
        discard(file, &path).await;
        desc.error = UPLOAD_ERR_CANT_WRITE;
        return Ok(desc);
    }

    desc.size = written;
    desc.sha512 = Some(hex_lower(&hasher.finalize()));
    desc.tmp_path = Some(path);
    Ok(desc)
}

async fn drain(field: &mut Field<'_>) -> Result<(), MultipartError> {
    while field.chunk().await?.is_some() {}
    Ok(())
}

async fn discard(file: fs::File, path: &Path) {
    drop(file);
    if let Err(e) = fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove partial upload");
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    const LUT: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(LUT[(b >> 4) as usize] as char);
        out.push(LUT[(b & 0x0f) as usize] as char);
    }
    out
}
