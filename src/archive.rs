//! Password-protected ZIP decoding.
//!
//! Archives are decoded entirely in memory; entries are never written to
//! disk, so entry paths are only labels and cannot escape anywhere.
//!
//! # Supported encryption
//!
//! | Scheme | Support |
//! |--------|---------|
//! | None | yes |
//! | Traditional PKWARE (ZipCrypto) | yes |
//! | WinZip AES-128/192/256 (AE-1, AE-2) | yes (`zip` crate, `aes-crypto` feature) |
//! | PKWARE strong encryption | no, reported as [`DecodeError::UnsupportedEncryption`] |
//!
//! A wrong password and an unsupported scheme are reported as different
//! [`DecodeError`] variants.

use std::io::{Cursor, Read};

use zip::result::ZipError;

use crate::error::DecodeError;
use crate::models::ExtractedEntry;

/// Decodes one archive's raw bytes into its file entries.
pub trait ArchiveDecoder: Send + Sync {
    /// Return every file entry (directories excluded) as path plus text.
    ///
    /// Entries that cannot be read individually are skipped; only failures
    /// that make the whole archive unusable are returned as errors.
    fn extract(&self, bytes: &[u8], password: Option<&str>)
        -> Result<Vec<ExtractedEntry>, DecodeError>;
}

/// ZIP decoder backed by the `zip` crate.
pub struct ZipDecoder {
    /// Maximum decompressed bytes read from a single entry (zip-bomb protection).
    max_entry_bytes: u64,
    /// Maximum decompressed bytes kept from one archive across all entries.
    max_archive_bytes: u64,
    /// Lowercase suffixes worth decompressing; empty means every entry.
    only_suffixes: Vec<String>,
}

impl ZipDecoder {
    pub fn new(max_entry_bytes: u64) -> Self {
        Self {
            max_entry_bytes,
            max_archive_bytes: 1024 * 1024 * 1024,
            only_suffixes: Vec::new(),
        }
    }

    /// Fail the whole archive once its kept entries exceed `bytes` in total.
    pub fn max_archive_bytes(mut self, bytes: u64) -> Self {
        self.max_archive_bytes = bytes;
        self
    }

    /// Skip decompression of entries whose name does not end with one of
    /// `suffixes` (compared case-insensitively).
    pub fn only_suffixes<S: AsRef<str>>(mut self, suffixes: &[S]) -> Self {
        self.only_suffixes = suffixes
            .iter()
            .map(|s| s.as_ref().to_ascii_lowercase())
            .collect();
        self
    }

    fn wanted(&self, name: &str) -> bool {
        if self.only_suffixes.is_empty() {
            return true;
        }
        let lower = name.to_ascii_lowercase();
        self.only_suffixes.iter().any(|s| lower.ends_with(s.as_str()))
    }
}

impl Default for ZipDecoder {
    fn default() -> Self {
        Self::new(64 * 1024 * 1024)
    }
}

impl ArchiveDecoder for ZipDecoder {
    fn extract(
        &self,
        bytes: &[u8],
        password: Option<&str>,
    ) -> Result<Vec<ExtractedEntry>, DecodeError> {
        let password = password.filter(|p| !p.is_empty());
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(open_error)?;

        let mut entries = Vec::new();
        let mut total: u64 = 0;
        for i in 0..archive.len() {
            let (name, encrypted) = {
                let raw = archive.by_index_raw(i).map_err(open_error)?;
                if raw.is_dir() {
                    continue;
                }
                (raw.name().to_string(), raw.encrypted())
            };
            if !self.wanted(&name) {
                continue;
            }

            let entry = match (encrypted, password) {
                (true, None) => return Err(DecodeError::PasswordRequired),
                (true, Some(pw)) => archive.by_index_decrypt(i, pw.as_bytes()),
                (false, _) => archive.by_index(i),
            };
            let entry = match entry {
                Ok(entry) => entry,
                Err(ZipError::InvalidPassword) => return Err(DecodeError::WrongPassword),
                Err(ZipError::UnsupportedArchive(msg)) => {
                    let err = classify_unsupported(msg);
                    // Encryption problems apply to the whole archive; an
                    // unsupported compression method only loses this entry.
                    if matches!(err, DecodeError::Unsupported(_)) {
                        tracing::warn!(entry = %name, error = %err, "skipping entry");
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    tracing::warn!(entry = %name, error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            let remaining = self.max_archive_bytes.saturating_sub(total);
            let limit = self.max_entry_bytes.min(remaining);
            let mut buf = Vec::new();
            if let Err(e) = entry.take(limit.saturating_add(1)).read_to_end(&mut buf) {
                // ZipCrypto checks a single header byte, so a wrong password
                // can get this far and only fail on the entry checksum.
                if encrypted {
                    tracing::debug!(entry = %name, error = %e, "encrypted entry failed to decrypt");
                    return Err(DecodeError::WrongPassword);
                }
                tracing::warn!(entry = %name, error = %e, "skipping entry that failed to decompress");
                continue;
            }
            let len = buf.len() as u64;
            if len > self.max_entry_bytes {
                tracing::warn!(
                    entry = %name,
                    limit = self.max_entry_bytes,
                    "skipping entry that exceeds size limit"
                );
                continue;
            }
            if len > remaining {
                return Err(DecodeError::Unsupported(format!(
                    "archive expands past {} bytes",
                    self.max_archive_bytes
                )));
            }
            total += len;

            let content = match String::from_utf8(buf) {
                Ok(s) => s,
                Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
            };
            entries.push(ExtractedEntry {
                path: name,
                content,
            });
        }

        Ok(entries)
    }
}

fn open_error(e: ZipError) -> DecodeError {
    match e {
        ZipError::UnsupportedArchive(msg) => classify_unsupported(msg),
        other => DecodeError::Corrupt(other.to_string()),
    }
}

fn classify_unsupported(msg: &str) -> DecodeError {
    let lower = msg.to_ascii_lowercase();
    if lower.contains("password required") {
        DecodeError::PasswordRequired
    } else if lower.contains("encrypt") || lower.contains("aes") {
        DecodeError::UnsupportedEncryption(msg.to_string())
    } else {
        DecodeError::Unsupported(msg.to_string())
    }
}
