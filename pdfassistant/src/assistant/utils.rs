use sha2::{Digest, Sha256};
use std::fmt::Write;

use super::state::Reference;

pub const CHUNK_SIZE: usize = 2000;

/// Splits text on whitespace into chunks of at most `chunk_size` bytes. A
/// single word longer than `chunk_size` becomes its own chunk.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + word.len() + 1 > chunk_size {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// FNV-1a. Stable across builds, so stored embeddings stay valid.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Primary key of a stored chunk: sha256 of the document name and the chunk,
/// hex encoded. The same text under two documents gives two ids.
pub fn chunk_id(name: &str, chunk: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(chunk.as_bytes());

    let mut hex = String::with_capacity(64);
    for byte in hasher.finalize() {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

pub fn format_references(references: &[Reference]) -> String {
    references
        .iter()
        .enumerate()
        .map(|(i, reference)| {
            format!("Reference {} ({}):\n{}", i + 1, reference.name, reference.content)
        })
        .collect::<Vec<String>>()
        .join("\n\n")
}

/// Last path segment of a document URL, used as the document name.
pub fn document_name(url: &url::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.trim_end_matches(".pdf").to_string())
        .unwrap_or_else(|| url.to_string())
}
