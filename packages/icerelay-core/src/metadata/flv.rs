//! FLV `onMetaData` AMF0 script-data tag builder.
//!
//! Produces the ECMA-array-encoded metadata tag that precedes audio in the
//! FLV side channel; actual audio-frame wrapping is delegated to an external
//! `FlvPackager` (see `crate::flv_packager`).

use bytes::Bytes;

/// Fields carried in the `onMetaData` ECMA array, in emission order.
pub struct FlvMetadataFields<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub stereo: bool,
    pub audiosamplerate: Option<f64>,
    pub audiodatarate: Option<f64>,
    /// AMF0 `audiocodecid`: 2.0 for MPEG layer >= 1, 10.0 for AAC.
    pub audiocodecid: f64,
    pub artist: Option<&'a str>,
    pub title: Option<&'a str>,
    pub url: Option<&'a str>,
}

fn amf0_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn amf0_number(buf: &mut Vec<u8>, n: f64) {
    buf.push(0x00); // AMF0 Number marker
    buf.extend_from_slice(&n.to_be_bytes());
}

fn amf0_bool(buf: &mut Vec<u8>, b: bool) {
    buf.push(0x01); // AMF0 Boolean marker
    buf.push(b as u8);
}

fn ecma_entry(buf: &mut Vec<u8>, key: &str, write_value: impl FnOnce(&mut Vec<u8>)) {
    amf0_string(buf, key);
    write_value(buf);
}

/// Builds the `onMetaData` script-data tag body as an AMF0 ECMA array.
pub fn build_flv_script_tag(fields: &FlvMetadataFields) -> Bytes {
    let mut buf = Vec::with_capacity(256);

    // AMF0 "String" marker + "onMetaData"
    buf.push(0x02);
    amf0_string(&mut buf, "onMetaData");

    // Count entries up front for the ECMA-array header.
    let mut count: u32 = 3; // name, description, stereo
    if fields.audiosamplerate.is_some() {
        count += 1;
    }
    if fields.audiodatarate.is_some() {
        count += 1;
    }
    count += 1; // audiocodecid always present
    if fields.artist.is_some() {
        count += 1;
    }
    if fields.title.is_some() {
        count += 1;
    }
    if fields.url.is_some() {
        count += 1;
    }

    buf.push(0x08); // AMF0 ECMA Array marker
    buf.extend_from_slice(&count.to_be_bytes());

    ecma_entry(&mut buf, "name", |b| amf0_string(b, fields.name));
    ecma_entry(&mut buf, "description", |b| amf0_string(b, fields.description));
    ecma_entry(&mut buf, "stereo", |b| amf0_bool(b, fields.stereo));
    if let Some(rate) = fields.audiosamplerate {
        ecma_entry(&mut buf, "audiosamplerate", |b| amf0_number(b, rate));
    }
    if let Some(rate) = fields.audiodatarate {
        ecma_entry(&mut buf, "audiodatarate", |b| amf0_number(b, rate));
    }
    ecma_entry(&mut buf, "audiocodecid", |b| amf0_number(b, fields.audiocodecid));
    if let Some(artist) = fields.artist {
        ecma_entry(&mut buf, "artist", |b| amf0_string(b, artist));
    }
    if let Some(title) = fields.title {
        ecma_entry(&mut buf, "title", |b| amf0_string(b, title));
    }
    if let Some(url) = fields.url {
        ecma_entry(&mut buf, "URL", |b| amf0_string(b, url));
    }

    // Object-end marker: empty key + end-of-object type (0x09).
    buf.extend_from_slice(&0u16.to_be_bytes());
    buf.push(0x09);

    Bytes::from(buf)
}

/// MPEG layer >= 1 AMF0 audiocodecid.
pub const AUDIOCODEC_MPEG: f64 = 2.0;
/// AAC AMF0 audiocodecid.
pub const AUDIOCODEC_AAC: f64 = 10.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_ends_with_object_end_marker() {
        let fields = FlvMetadataFields {
            name: "stream",
            description: "live",
            stereo: true,
            audiosamplerate: Some(44100.0),
            audiodatarate: Some(128.0),
            audiocodecid: AUDIOCODEC_MPEG,
            artist: Some("Artist"),
            title: Some("Title"),
            url: None,
        };
        let tag = build_flv_script_tag(&fields);
        assert_eq!(&tag[tag.len() - 3..], &[0x00, 0x00, 0x09]);
    }

    #[test]
    fn tag_starts_with_onmetadata_string() {
        let fields = FlvMetadataFields {
            name: "stream",
            description: "live",
            stereo: false,
            audiosamplerate: None,
            audiodatarate: None,
            audiocodecid: AUDIOCODEC_AAC,
            artist: None,
            title: None,
            url: None,
        };
        let tag = build_flv_script_tag(&fields);
        assert_eq!(tag[0], 0x02);
        let len = u16::from_be_bytes([tag[1], tag[2]]) as usize;
        assert_eq!(&tag[3..3 + len], b"onMetaData");
    }
}
