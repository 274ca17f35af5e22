//! Local persistence for the peerchat node.
//!
//! - [`history`]: append-only per-peer log of sealed envelopes
//! - [`received`]: reassembly of incoming file transfers

pub mod history;
pub mod received;

/// Reduces an untrusted name to a single safe path component.
///
/// Directory parts are stripped, and characters that are awkward in
/// file names are replaced with `_`. Names that end up empty or equal
/// to `.`/`..` become `unnamed`.
pub fn safe_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}
