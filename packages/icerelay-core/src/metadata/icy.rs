//! ICY (Shoutcast) protocol metadata: parsing inline ingest blocks and
//! building egress blocks.
//!
//! Block shape on the wire: one length byte `L`, then `16*L` bytes of
//! NUL-padded payload. A single `\x00` byte means "no change" on egress.

use bytes::Bytes;

use crate::protocol_constants::ICY_MAX_BLOCK_BYTES;

/// Parsed `StreamTitle='...'; StreamUrl='...';` content from an ICY block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IcyTags {
    pub title: Option<String>,
    pub url: Option<String>,
}

/// Parses the payload of an ICY metadata block (everything after the length
/// byte, NUL padding included) into recognized tags.
///
/// Grammar: a sequence of `KEY='VALUE';` or `KEY=VALUE;` items. Unknown keys
/// are skipped to the next unescaped `;`. Trailing NUL padding terminates
/// scanning gracefully rather than erroring.
pub fn parse_icy_payload(payload: &[u8]) -> IcyTags {
    let text = String::from_utf8_lossy(payload);
    parse_icy_text(&text)
}

/// Same grammar as [`parse_icy_payload`], but over text that's already been
/// through charset conversion (see `crate::metadata::charset`), since ICY
/// ingest bytes aren't necessarily UTF-8 on the wire.
pub fn parse_icy_text(text: &str) -> IcyTags {
    // Stop at the first embedded NUL: padding starts there.
    let text = match text.find('\0') {
        Some(idx) => &text[..idx],
        None => text,
    };

    let mut tags = IcyTags::default();
    let mut rest = text;
    while let Some(eq) = rest.find('=') {
        let key = rest[..eq].trim();
        let after_eq = &rest[eq + 1..];

        let (value, consumed_to) = if let Some(stripped) = after_eq.strip_prefix('\'') {
            match stripped.find("';") {
                Some(end) => (stripped[..end].to_string(), eq + 1 + 1 + end + 2),
                None => break,
            }
        } else {
            match after_eq.find(';') {
                Some(end) => (after_eq[..end].to_string(), eq + 1 + end + 1),
                None => break,
            }
        };

        match key {
            "StreamTitle" => tags.title = Some(value),
            "StreamUrl" => tags.url = Some(value),
            _ => {}
        }

        if consumed_to >= rest.len() {
            break;
        }
        rest = &rest[consumed_to..];
    }

    tags
}

/// Builds a length-prefixed, NUL-padded ICY block for the given title/url.
///
/// Returns `None` if the encoded payload would need `L > 255` (see
/// [`ICY_MAX_BLOCK_BYTES`]); callers should treat that as "abort the update,
/// keep the previous metadata".
pub fn build_icy_block(artist: Option<&str>, title: Option<&str>, url: Option<&str>) -> Option<Bytes> {
    let stream_title = match (artist, title) {
        (Some(a), Some(t)) if !a.is_empty() => Some(format!("{} - {}", a, t)),
        (_, Some(t)) => Some(t.to_string()),
        (Some(a), None) => Some(a.to_string()),
        (None, None) => None,
    };

    if stream_title.is_none() && url.is_none() {
        return Some(Bytes::from_static(b"\x00"));
    }

    let mut meta = String::new();
    if let Some(t) = &stream_title {
        meta.push_str("StreamTitle='");
        meta.push_str(t);
        meta.push_str("';");
    } else {
        meta.push_str("StreamTitle='';");
    }
    if let Some(u) = url {
        meta.push_str("StreamUrl='");
        meta.push_str(u);
        meta.push_str("';");
    }

    let payload = meta.into_bytes();
    let num_blocks = payload.len().div_ceil(16);
    let padded_len = num_blocks * 16;
    if padded_len + 1 > ICY_MAX_BLOCK_BYTES {
        return None;
    }

    let mut out = Vec::with_capacity(padded_len + 1);
    out.push(num_blocks as u8);
    out.extend_from_slice(&payload);
    out.resize(padded_len + 1, 0);
    Some(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_title_and_url() {
        let block = build_icy_block(None, Some("Test Song"), Some("http://x")).unwrap();
        let tags = parse_icy_payload(&block[1..]);
        assert_eq!(tags.title.as_deref(), Some("Test Song"));
        assert_eq!(tags.url.as_deref(), Some("http://x"));
    }

    #[test]
    fn round_trips_artist_and_title() {
        let block = build_icy_block(Some("Artist"), Some("Song"), None).unwrap();
        let tags = parse_icy_payload(&block[1..]);
        assert_eq!(tags.title.as_deref(), Some("Artist - Song"));
        assert_eq!(tags.url, None);
    }

    #[test]
    fn empty_metadata_is_single_zero_byte() {
        let block = build_icy_block(None, None, None).unwrap();
        assert_eq!(&block[..], b"\x00");
    }

    #[test]
    fn exactly_4081_bytes_encodes_as_l_255() {
        // 4080 content bytes -> 255 blocks of 16 -> total 4081 with length byte.
        let title = "a".repeat(4080 - "StreamTitle='';".len());
        let block = build_icy_block(None, Some(&title), None).unwrap();
        assert_eq!(block[0], 255);
        assert_eq!(block.len(), 4081);
    }

    #[test]
    fn overflow_past_4081_bytes_is_dropped() {
        let title = "a".repeat(4081 - "StreamTitle='';".len());
        assert!(build_icy_block(None, Some(&title), None).is_none());
    }

    #[test]
    fn unknown_keys_are_skipped() {
        let payload = b"Foo='bar';StreamTitle='Hi';";
        let tags = parse_icy_payload(payload);
        assert_eq!(tags.title.as_deref(), Some("Hi"));
    }

    #[test]
    fn apostrophes_in_title_round_trip_unmodified() {
        let block = build_icy_block(None, Some("Guns N' Roses"), None).unwrap();
        let tags = parse_icy_payload(&block[1..]);
        assert_eq!(tags.title.as_deref(), Some("Guns N' Roses"));
    }
}
