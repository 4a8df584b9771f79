//! FLV audio tag wrapping, defined as an external collaborator contract.
//!
//! Packaging audio into well-formed FLV (tag headers, timestamps,
//! `PreviousTagSize` trailers) is scoped out as something an embedder may
//! want to swap (e.g. for a muxer that also carries video); this module
//! defines the trait `ListenerWriter` depends on and ships a reference
//! in-memory implementation sufficient for tests and a bare FLV listener.

use bytes::{BufMut, Bytes, BytesMut};

use crate::metadata::{build_flv_script_tag, FlvMetadataFields};

const FLV_TAG_TYPE_AUDIO: u8 = 8;
const FLV_TAG_TYPE_SCRIPT: u8 = 18;

/// Wraps raw audio chunks and the `onMetaData` script tag into FLV tags.
pub trait FlvPackager: Send {
    /// The leading `onMetaData` script tag, sent once before any audio.
    fn script_tag(&self) -> Bytes;
    /// Wraps one chunk of raw audio as an FLV audio tag, advancing the
    /// packager's internal timestamp.
    fn wrap_audio(&mut self, audio: &[u8], codec_id: f64) -> Bytes;
}

fn write_tag(out: &mut BytesMut, tag_type: u8, timestamp_ms: u32, body: &[u8]) {
    let data_size = body.len() as u32;
    out.put_u8(tag_type);
    out.put_uint(data_size as u64, 3);
    out.put_uint((timestamp_ms & 0x00FF_FFFF) as u64, 3);
    out.put_u8(((timestamp_ms >> 24) & 0xFF) as u8);
    out.put_uint(0, 3); // StreamID, always 0
    out.extend_from_slice(body);
    let previous_tag_size = 11 + data_size;
    out.put_u32(previous_tag_size);
}

/// Wraps a raw AMF0 `onMetaData` body (e.g. [`crate::metadata::build_flv_script_tag`]'s
/// output) in an FLV script tag, for callers that build the body themselves
/// rather than going through [`InMemoryFlvPackager::script_tag`].
pub fn wrap_script_tag(body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(11 + body.len() + 4);
    write_tag(&mut out, FLV_TAG_TYPE_SCRIPT, 0, body);
    out.freeze()
}

/// The FLV file/stream header: signature, version, flags (audio-only), and
/// the 9-byte header's own `PreviousTagSize0` of 0.
pub fn flv_stream_header() -> Bytes {
    let mut out = BytesMut::with_capacity(13);
    out.extend_from_slice(b"FLV");
    out.put_u8(1); // version
    out.put_u8(0x04); // flags: audio present, no video
    out.put_u32(9); // header size
    out.put_u32(0); // PreviousTagSize0
    out.freeze()
}

/// Reference in-memory [`FlvPackager`]: wraps audio as MP3/AAC FLV sound
/// format tags (sound format 2 = MP3, 10 = AAC) and advances a millisecond
/// timestamp from an assumed constant bitrate.
pub struct InMemoryFlvPackager {
    name: String,
    description: String,
    artist: Option<String>,
    title: Option<String>,
    url: Option<String>,
    is_aac: bool,
    samplerate_hz: u32,
    bitrate_bps: u32,
    timestamp_ms: u32,
}

impl InMemoryFlvPackager {
    pub fn new(name: impl Into<String>, description: impl Into<String>, is_aac: bool, samplerate_hz: u32, bitrate_bps: u32) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            artist: None,
            title: None,
            url: None,
            is_aac,
            samplerate_hz,
            bitrate_bps,
            timestamp_ms: 0,
        }
    }

    pub fn set_tags(&mut self, artist: Option<String>, title: Option<String>, url: Option<String>) {
        self.artist = artist;
        self.title = title;
        self.url = url;
    }

    fn sound_format_byte(&self) -> u8 {
        // Sound format (4 bits) | sample rate (2) | sample size (1) | type (1).
        // MP3 = 2, AAC = 10; both declared 44.1kHz/16-bit/stereo here since
        // per-frame sound-format metadata is informational for this tag.
        let format = if self.is_aac { 10u8 } else { 2u8 };
        (format << 4) | (3 << 2) | (1 << 1) | 1
    }
}

impl FlvPackager for InMemoryFlvPackager {
    fn script_tag(&self) -> Bytes {
        let codec_id = if self.is_aac { 10.0 } else { 2.0 };
        let fields = FlvMetadataFields {
            name: &self.name,
            description: &self.description,
            stereo: true,
            audiosamplerate: Some(self.samplerate_hz as f64),
            audiodatarate: if self.bitrate_bps > 0 {
                Some(self.bitrate_bps as f64 / 1000.0)
            } else {
                None
            },
            audiocodecid: codec_id,
            artist: self.artist.as_deref(),
            title: self.title.as_deref(),
            url: self.url.as_deref(),
        };
        let script_body = build_flv_script_tag(&fields);
        let mut out = BytesMut::with_capacity(11 + script_body.len() + 4);
        write_tag(&mut out, FLV_TAG_TYPE_SCRIPT, 0, &script_body);
        out.freeze()
    }

    fn wrap_audio(&mut self, audio: &[u8], _codec_id: f64) -> Bytes {
        let mut body = BytesMut::with_capacity(1 + audio.len());
        body.put_u8(self.sound_format_byte());
        body.extend_from_slice(audio);

        let mut out = BytesMut::with_capacity(11 + body.len() + 4);
        write_tag(&mut out, FLV_TAG_TYPE_AUDIO, self.timestamp_ms, &body);

        if self.samplerate_hz > 0 && self.bitrate_bps > 0 {
            let bytes_per_sec = self.bitrate_bps / 8;
            if bytes_per_sec > 0 {
                self.timestamp_ms = self.timestamp_ms.wrapping_add((audio.len() as u32 * 1000) / bytes_per_sec);
            }
        }
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_tag_carries_onmetadata_body() {
        let packager = InMemoryFlvPackager::new("live", "a relay", false, 44100, 128_000);
        let tag = packager.script_tag();
        assert_eq!(tag[0], FLV_TAG_TYPE_SCRIPT);
        let body_len = u32::from_be_bytes([0, tag[1], tag[2], tag[3]]) as usize;
        assert_eq!(tag.len(), 11 + body_len + 4);
    }

    #[test]
    fn audio_tag_advances_timestamp() {
        let mut packager = InMemoryFlvPackager::new("live", "", false, 44100, 128_000);
        let audio = vec![0u8; 1000];
        let first = packager.wrap_audio(&audio, 2.0);
        assert_eq!(first[0], FLV_TAG_TYPE_AUDIO);
        let ts_before = packager.timestamp_ms;
        packager.wrap_audio(&audio, 2.0);
        assert!(packager.timestamp_ms >= ts_before);
    }

    #[test]
    fn stream_header_has_flv_signature() {
        let header = flv_stream_header();
        assert_eq!(&header[..3], b"FLV");
    }
}
