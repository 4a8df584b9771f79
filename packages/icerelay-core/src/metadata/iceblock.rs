//! Iceblock: the custom binary metadata envelope used for the raw TCP
//! listener mode (neither ICY-interleaved nor FLV-wrapped).
//!
//! Wire shape: a 2-byte big-endian length, where the high bit marks whether
//! the following payload is a metadata record (set) or audio (clear); the
//! remaining 15 bits give the payload length. Metadata payloads are plain
//! text: `mode=updinfo\n` followed by `key=value\n` lines.

use bytes::Bytes;

const METADATA_FLAG: u16 = 0x8000;
const LENGTH_MASK: u16 = 0x7fff;

/// Wraps an audio chunk in an iceblock length-prefixed frame.
pub fn wrap_audio(chunk: &[u8]) -> Bytes {
    wrap(chunk, false)
}

/// Builds an iceblock metadata record announcing new artist/title/url.
pub fn build_iceblock_metadata(artist: Option<&str>, title: Option<&str>, url: Option<&str>) -> Bytes {
    let mut body = String::from("mode=updinfo\n");
    if let Some(a) = artist {
        body.push_str("artist=");
        body.push_str(a);
        body.push('\n');
    }
    if let Some(t) = title {
        body.push_str("title=");
        body.push_str(t);
        body.push('\n');
    }
    if let Some(u) = url {
        body.push_str("URL=");
        body.push_str(u);
        body.push('\n');
    }
    let mut body = body.into_bytes();
    body.push(0);
    wrap(&body, true)
}

fn wrap(payload: &[u8], is_metadata: bool) -> Bytes {
    assert!(payload.len() <= LENGTH_MASK as usize, "iceblock payload too large");
    let mut header = payload.len() as u16;
    if is_metadata {
        header |= METADATA_FLAG;
    }
    let mut out = Vec::with_capacity(2 + payload.len());
    out.extend_from_slice(&header.to_be_bytes());
    out.extend_from_slice(payload);
    Bytes::from(out)
}

/// Returns `(is_metadata, payload_len)` decoded from a 2-byte iceblock header.
pub fn decode_header(header: [u8; 2]) -> (bool, usize) {
    let raw = u16::from_be_bytes(header);
    (raw & METADATA_FLAG != 0, (raw & LENGTH_MASK) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_frame_has_clear_metadata_bit() {
        let frame = wrap_audio(b"1234");
        let (is_meta, len) = decode_header([frame[0], frame[1]]);
        assert!(!is_meta);
        assert_eq!(len, 4);
    }

    #[test]
    fn metadata_frame_has_set_metadata_bit_and_body() {
        let frame = build_iceblock_metadata(Some("Band"), Some("Song"), Some("http://x"));
        let (is_meta, len) = decode_header([frame[0], frame[1]]);
        assert!(is_meta);
        let body = &frame[2..2 + len];
        assert!(body.starts_with(b"mode=updinfo\n"));
        assert!(body.windows(11).any(|w| w == b"artist=Band"));
        assert!(body.windows(10).any(|w| w == b"title=Song"));
        assert!(body.windows(9).any(|w| w == b"URL=http:"));
        assert_eq!(body.last(), Some(&0u8));
    }

    #[test]
    fn metadata_with_no_tags_still_has_mode_header() {
        let frame = build_iceblock_metadata(None, None, None);
        let (is_meta, len) = decode_header([frame[0], frame[1]]);
        assert!(is_meta);
        assert_eq!(&frame[2..2 + len], b"mode=updinfo\n\0");
    }
}
