//! Badge scan payload decoding.
//!
//! Current badges carry the bare occupant identifier. Older badges carry
//! a JSON object whose `o` field holds the identifier; those still
//! circulate, so both shapes decode.

use serde::Deserialize;

#[derive(Deserialize)]
struct LegacyTag {
    o: String,
}

/// Extract the occupant identifier from a scanned payload. Anything that
/// is not a legacy JSON tag is taken as the identifier itself, trimmed.
pub fn decode_tag(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('{')
        && let Ok(tag) = serde_json::from_str::<LegacyTag>(trimmed)
    {
        return tag.o;
    }
    trimmed.to_string()
}
