//! Deterministic message-identity tokens and their zero-width embedding.
//!
//! Every event derives a short keyed token that is appended to anchor and
//! clock-in messages as a run of zero-width characters. After a restart the
//! reconciliation scanner re-identifies bot messages by decoding that run,
//! independent of the visible content. The byte <-> zero-width mapping must
//! stay bit-for-bit stable so previously posted messages remain matchable.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Zero-width space, encodes a 0 bit.
const BIT_ZERO: char = '\u{200B}';
/// Zero-width non-joiner, encodes a 1 bit.
const BIT_ONE: char = '\u{200C}';
/// Word joiner, wraps the payload on both sides. Not part of the bit
/// alphabet so a delimiter scan can never misread payload bits.
const DELIMITER: char = '\u{2060}';

/// Fallback HMAC key when `HERALD_TOKEN_SECRET` is unset. Changing this
/// value orphans every anchor posted under the old derivation.
const FALLBACK_SECRET: &str = "herald-anchor-identity-v1";

const TOKEN_LENGTH: usize = 12;
const VISIBLE_MARKER_LENGTH: usize = 6;

/// Derives the stable identity token for an event id.
///
/// HMAC-SHA256 keyed by the process secret, base64-encoded, reduced to
/// alphanumerics and truncated to 12 characters.
pub fn generate_token(event_id: &str) -> String {
    let secret = std::env::var("HERALD_TOKEN_SECRET")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_SECRET.to_string());

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(event_id.as_bytes());
    let digest = mac.finalize().into_bytes();

    base64::engine::general_purpose::STANDARD
        .encode(digest)
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .take(TOKEN_LENGTH)
        .collect()
}

/// Encodes a token as an invisible character run: one delimiter, eight bit
/// characters per byte (most significant bit first), one delimiter.
pub fn encode_invisible(token: &str) -> String {
    let mut encoded = String::with_capacity(token.len() * 8 + 2);
    encoded.push(DELIMITER);
    for byte in token.bytes() {
        for shift in (0..8).rev() {
            encoded.push(if (byte >> shift) & 1 == 1 {
                BIT_ONE
            } else {
                BIT_ZERO
            });
        }
    }
    encoded.push(DELIMITER);
    encoded
}

/// Appends the invisible form of `token` to `text`.
pub fn embed_token(text: &str, token: &str) -> String {
    format!("{}{}", text, encode_invisible(token))
}

/// Extracts the first embedded token from `text`, or `None` when no
/// delimiter pair exists or nothing decodes between the delimiters.
///
/// Decoding is best-effort: characters outside the bit alphabet are skipped
/// and a trailing partial byte is truncated rather than rejected, so a
/// platform that injects formatting inside the run still yields the prefix.
pub fn find_token_in_text(text: &str) -> Option<String> {
    let mut chars = text.char_indices();
    let start = chars.find(|(_, ch)| *ch == DELIMITER)?.0;
    let rest = &text[start + DELIMITER.len_utf8()..];
    let end = rest.char_indices().find(|(_, ch)| *ch == DELIMITER)?.0;

    let mut bits = Vec::new();
    for ch in rest[..end].chars() {
        match ch {
            BIT_ZERO => bits.push(0_u8),
            BIT_ONE => bits.push(1_u8),
            _ => {}
        }
    }

    let mut bytes = Vec::with_capacity(bits.len() / 8);
    for chunk in bits.chunks_exact(8) {
        let mut byte = 0_u8;
        for bit in chunk {
            byte = (byte << 1) | bit;
        }
        bytes.push(byte);
    }
    if bytes.is_empty() {
        return None;
    }

    String::from_utf8(bytes).ok()
}

/// Renders the visible fallback marker for a token, e.g. `[#ab12cd]`.
///
/// Some platforms strip zero-width characters on edit or mobile render,
/// which would silently defeat token-based reconciliation. The marker is a
/// short visible suffix the scanner accepts as a secondary identifier.
pub fn visible_marker(token: &str) -> String {
    let short: String = token
        .chars()
        .take(VISIBLE_MARKER_LENGTH)
        .collect::<String>()
        .to_ascii_lowercase();
    format!("[#{short}]")
}

/// Returns true when `text` carries the visible fallback marker for `token`.
pub fn has_visible_marker(text: &str, token: &str) -> bool {
    text.contains(&visible_marker(token))
}
