//! Identifier generation for chats and messages.

use base64::Engine;
use chrono::Utc;

/// Generate an opaque unique identifier.
///
/// The millisecond prefix keeps identifiers roughly sortable by creation
/// time; the random suffix disambiguates identifiers minted within the same
/// millisecond.
pub fn new_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let mut bytes = [0_u8; 6];
    if getrandom::fill(&mut bytes).is_err() {
        // Extremely unlikely, but ids must still come out unique-ish.
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        bytes[..4].copy_from_slice(&nanos.to_le_bytes());
    }
    let suffix = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    format!("{millis}-{suffix}")
}
