//! MPEG-1/2 Layer I/II/III and ADTS-AAC frame-boundary scanner.
//!
//! Trims a just-read chunk down to the last complete frame, carrying the
//! unprocessed tail forward via [`MpegSync::data_insert`] for the next read.
//! Declares sync only once `required_consecutive` frames chain cleanly,
//! matching the reference implementation's conservative default of three.

use bytes::Bytes;

const MIN_FRAME_HEADER_BYTES: usize = 4;
const DEFAULT_NUMFRAMES: u8 = 3;
const NO_SYNC_GIVEUP_BYTES: usize = 2500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Mp3LayerI,
    Mp3LayerII,
    Mp3LayerIII,
    Aac,
}

#[derive(Debug, Clone, Copy)]
struct FrameInfo {
    frame_len: usize,
    samplerate: u32,
    bitrate: u32,
    channels: u8,
    layer: Layer,
}

/// Per-stream frame-sync scanner. One instance per upstream connection;
/// `swap_client` on `SourceFormat` replaces it wholesale on reconnect.
pub struct MpegSync {
    tag: String,
    pending: Vec<u8>,
    unsynced_total: usize,
    required_consecutive: u8,
    pub layer: Option<Layer>,
    pub channels: Option<u8>,
    pub samplerate: Option<u32>,
    pub bitrate: Option<u32>,
}

impl MpegSync {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            pending: Vec::new(),
            unsynced_total: 0,
            required_consecutive: DEFAULT_NUMFRAMES,
            layer: None,
            channels: None,
            samplerate: None,
            bitrate: None,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// How many consecutive valid frames are required to declare sync.
    pub fn check_numframes(&mut self, n: u8) {
        self.required_consecutive = n.max(1);
    }

    /// Carries a cross-buffer leftover forward to prepend to the next
    /// `complete_frames` call.
    pub fn data_insert(&mut self, leftover: Bytes) {
        self.pending = leftover.to_vec();
    }

    /// True once accumulated unprocessed bytes (across repeated `-1`
    /// returns) exceed the give-up threshold and the stream should be
    /// treated as non-MPEG.
    pub fn should_give_up(&self) -> bool {
        self.unsynced_total > NO_SYNC_GIVEUP_BYTES
    }

    /// Trims `buf` down to its last complete frame boundary in place,
    /// returning the count of trailing unprocessed bytes, or `-1` if no
    /// sync was found anywhere in this chunk.
    pub fn complete_frames(&mut self, buf: &mut Vec<u8>) -> i64 {
        if !self.pending.is_empty() {
            let mut combined = std::mem::take(&mut self.pending);
            combined.extend_from_slice(buf);
            *buf = combined;
        }

        let mut pos = 0usize;
        let mut last_boundary: Option<usize> = None;

        while pos + MIN_FRAME_HEADER_BYTES <= buf.len() {
            match parse_frame_header(&buf[pos..]) {
                Some(info) if info.frame_len >= MIN_FRAME_HEADER_BYTES => {
                    if pos + info.frame_len > buf.len() {
                        break;
                    }
                    if self.layer.is_none() {
                        if has_consecutive_sync(&buf[pos..], info, self.required_consecutive) {
                            self.layer = Some(info.layer);
                            self.channels = Some(info.channels);
                            self.samplerate = Some(info.samplerate);
                            self.bitrate = Some(info.bitrate);
                        } else {
                            pos += 1;
                            continue;
                        }
                    }
                    pos += info.frame_len;
                    last_boundary = Some(pos);
                }
                _ => pos += 1,
            }
        }

        match last_boundary {
            Some(boundary) => {
                let trailing = (buf.len() - boundary) as i64;
                buf.truncate(boundary);
                self.unsynced_total = 0;
                trailing
            }
            None => {
                self.unsynced_total += buf.len();
                buf.clear();
                -1
            }
        }
    }
}

fn has_consecutive_sync(buf: &[u8], first: FrameInfo, required: u8) -> bool {
    let mut offset = first.frame_len;
    for _ in 1..required {
        if offset + MIN_FRAME_HEADER_BYTES > buf.len() {
            // Not enough data in this chunk to confirm further frames;
            // accept provisionally rather than stalling sync forever on
            // small reads.
            return true;
        }
        match parse_frame_header(&buf[offset..]) {
            Some(info) if info.frame_len >= MIN_FRAME_HEADER_BYTES => {
                if offset + info.frame_len > buf.len() {
                    return true;
                }
                offset += info.frame_len;
            }
            _ => return false,
        }
    }
    true
}

fn parse_frame_header(b: &[u8]) -> Option<FrameInfo> {
    parse_mp3_header(b).or_else(|| parse_adts_header(b))
}

// index 0 = MPEG2.5, 1 = reserved, 2 = MPEG2, 3 = MPEG1
const SAMPLE_RATES: [[u32; 3]; 4] = [
    [11025, 12000, 8000],
    [0, 0, 0],
    [22050, 24000, 16000],
    [44100, 48000, 32000],
];

fn bitrate_table(layer: Layer, is_mpeg1: bool) -> &'static [u16; 16] {
    match (layer, is_mpeg1) {
        (Layer::Mp3LayerI, true) => &[0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448, 0],
        (Layer::Mp3LayerII, true) => &[0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 0],
        (Layer::Mp3LayerIII, true) => &[0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0],
        (Layer::Mp3LayerI, false) => &[0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256, 0],
        (Layer::Mp3LayerII, false) | (Layer::Mp3LayerIII, false) => {
            &[0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0]
        }
        (Layer::Aac, _) => unreachable!("AAC never reaches the MP3 bitrate table"),
    }
}

fn parse_mp3_header(b: &[u8]) -> Option<FrameInfo> {
    if b.len() < 4 || b[0] != 0xFF || (b[1] & 0xE0) != 0xE0 {
        return None;
    }
    let version_bits = (b[1] >> 3) & 0x03;
    let layer_bits = (b[1] >> 1) & 0x03;
    if version_bits == 0x01 || layer_bits == 0x00 {
        return None;
    }
    let bitrate_index = (b[2] >> 4) & 0x0F;
    let samplerate_index = (b[2] >> 2) & 0x03;
    if bitrate_index == 0 || bitrate_index == 0x0F || samplerate_index == 0x03 {
        return None;
    }
    let padding = u32::from((b[2] >> 1) & 0x01);
    let channel_mode = (b[3] >> 6) & 0x03;

    let layer = match layer_bits {
        0b11 => Layer::Mp3LayerI,
        0b10 => Layer::Mp3LayerII,
        0b01 => Layer::Mp3LayerIII,
        _ => return None,
    };

    let is_mpeg1 = version_bits == 0b11;
    let samplerate = SAMPLE_RATES[version_bits as usize][samplerate_index as usize];
    if samplerate == 0 {
        return None;
    }
    let bitrate_kbps = bitrate_table(layer, is_mpeg1)[bitrate_index as usize] as u32;
    if bitrate_kbps == 0 {
        return None;
    }
    let bitrate = bitrate_kbps * 1000;

    let frame_len = match layer {
        Layer::Mp3LayerI => (12 * bitrate / samplerate + padding) * 4,
        Layer::Mp3LayerII => 144 * bitrate / samplerate + padding,
        Layer::Mp3LayerIII => {
            let base = if is_mpeg1 { 144 } else { 72 };
            base * bitrate / samplerate + padding
        }
        Layer::Aac => unreachable!("AAC never reaches the MP3 frame-length branch"),
    };

    let channels = if channel_mode == 0b11 { 1 } else { 2 };

    Some(FrameInfo {
        frame_len: frame_len as usize,
        samplerate,
        bitrate,
        channels,
        layer,
    })
}

const AAC_SAMPLE_RATES: [u32; 16] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350, 0, 0, 0,
];

fn parse_adts_header(b: &[u8]) -> Option<FrameInfo> {
    if b.len() < 7 || b[0] != 0xFF || (b[1] & 0xF0) != 0xF0 {
        return None;
    }
    let protection_absent = b[1] & 0x01;
    let sampling_index = ((b[2] >> 2) & 0x0F) as usize;
    let samplerate = AAC_SAMPLE_RATES[sampling_index];
    if samplerate == 0 {
        return None;
    }
    let channel_config = ((b[2] & 0x01) << 2) | ((b[3] >> 6) & 0x03);
    let frame_len = ((usize::from(b[3] & 0x03)) << 11) | (usize::from(b[4]) << 3) | (usize::from(b[5] >> 5) & 0x07);
    let header_len = if protection_absent == 1 { 7 } else { 9 };
    if frame_len < header_len {
        return None;
    }
    let channels = if channel_config == 0 { 2 } else { channel_config };

    Some(FrameInfo {
        frame_len,
        samplerate,
        // ADTS carries no per-frame bitrate; the field stays a declared
        // zero rather than an `Option` to keep `FrameInfo` uniform.
        bitrate: 0,
        channels,
        layer: Layer::Aac,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mp3_layer3_128k_44100_stereo_frame() -> Vec<u8> {
        let mut frame = vec![0xFF, 0xFB, 0x90, 0x00];
        frame.resize(417, 0);
        frame
    }

    #[test]
    fn syncs_after_required_consecutive_frames_and_publishes_fields() {
        let mut sync = MpegSync::new("test");
        let mut buf = Vec::new();
        for _ in 0..3 {
            buf.extend_from_slice(&mp3_layer3_128k_44100_stereo_frame());
        }
        buf.extend_from_slice(&[0u8; 200]); // trailing partial frame

        let trailing = sync.complete_frames(&mut buf);
        assert_eq!(trailing, 200);
        assert_eq!(buf.len(), 3 * 417);
        assert_eq!(sync.layer, Some(Layer::Mp3LayerIII));
        assert_eq!(sync.channels, Some(2));
        assert_eq!(sync.samplerate, Some(44100));
        assert_eq!(sync.bitrate, Some(128_000));
    }

    #[test]
    fn no_sync_in_garbage_returns_negative_one() {
        let mut sync = MpegSync::new("test");
        let mut buf = vec![0u8; 100];
        assert_eq!(sync.complete_frames(&mut buf), -1);
        assert!(buf.is_empty());
    }

    #[test]
    fn data_insert_carries_tail_into_next_call() {
        let mut sync = MpegSync::new("test");
        sync.check_numframes(2);
        let frame = mp3_layer3_128k_44100_stereo_frame();

        let mut first_chunk = Vec::new();
        first_chunk.extend_from_slice(&frame);
        first_chunk.extend_from_slice(&frame);
        first_chunk.extend_from_slice(&frame[..50]); // partial third frame

        let trailing = sync.complete_frames(&mut first_chunk);
        assert_eq!(trailing, 50);
        assert_eq!(first_chunk.len(), 2 * 417);
        assert_eq!(sync.layer, Some(Layer::Mp3LayerIII));

        sync.data_insert(Bytes::copy_from_slice(&frame[..50]));
        let mut second_chunk = frame[50..].to_vec();
        let trailing2 = sync.complete_frames(&mut second_chunk);
        assert_eq!(trailing2, 0);
        assert_eq!(second_chunk.len(), 417);
    }

    #[test]
    fn short_chunk_under_required_frames_gives_up_conservatively() {
        let mut sync = MpegSync::new("test");
        let mut buf = mp3_layer3_128k_44100_stereo_frame();
        let trailing = sync.complete_frames(&mut buf);
        // Only one full frame available; provisional-accept path publishes sync.
        assert_eq!(trailing, 0);
        assert_eq!(sync.layer, Some(Layer::Mp3LayerIII));
    }

    #[test]
    fn adts_header_is_recognized() {
        // AAC-LC, 44100Hz, stereo, protection absent, frame_len = 200.
        let frame_len: usize = 200;
        let mut frame = vec![0u8; frame_len];
        frame[0] = 0xFF;
        frame[1] = 0xF1; // MPEG4, layer 00, protection_absent=1
        frame[2] = (1 << 6) | (4 << 2); // profile=1(LC), sampling_index=4(44100)
        frame[3] = ((2u8 & 0x03) << 6) | ((frame_len >> 11) as u8 & 0x03);
        frame[4] = ((frame_len >> 3) & 0xFF) as u8;
        frame[5] = (((frame_len & 0x07) as u8) << 5) | 0x1F;
        frame[6] = 0xFC;

        let mut sync = MpegSync::new("aac");
        let mut buf = frame.clone();
        buf.extend_from_slice(&frame);
        buf.extend_from_slice(&frame);
        let trailing = sync.complete_frames(&mut buf);
        assert_eq!(trailing, 0);
        assert_eq!(sync.layer, Some(Layer::Aac));
        assert_eq!(sync.samplerate, Some(44100));
    }

    #[test]
    fn repeated_garbage_eventually_trips_give_up_threshold() {
        let mut sync = MpegSync::new("test");
        for _ in 0..30 {
            let mut buf = vec![0u8; 100];
            sync.complete_frames(&mut buf);
        }
        assert!(sync.should_give_up());
    }
}
