//! `SourceFormat`: turns a raw upstream mp3/aac byte stream into synced,
//! metadata-tagged [`AudioBlock`]s.
//!
//! Grounded on the teacher's `IcyMetadataInjector` (cached-metadata-block,
//! byte-position-tracking pattern) generalized in the opposite direction:
//! where the teacher injects ICY into egress, this module *strips* inline
//! ICY out of ingest and republishes it as the three egress envelopes.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::config::MountConfig;
use crate::error::SourceError;
use crate::metadata::{
    build_flv_script_tag, build_iceblock_metadata, build_icy_block, charset, parse_icy_text, FlvMetadataFields,
    AUDIOCODEC_AAC, AUDIOCODEC_MPEG,
};
use crate::mpeg_sync::{Layer, MpegSync};
use crate::protocol_constants::MPEG_SYNC_DEAD_THRESHOLD;
use crate::refbuf::{blank_icy_block, AudioBlock};

#[derive(Default)]
struct TagState {
    title: Option<String>,
    artist: Option<String>,
    url: Option<String>,
    dirty: bool,
}

struct MetadataTrio {
    icy: Bytes,
    flv: Bytes,
    iceblock: Bytes,
}

impl Default for MetadataTrio {
    fn default() -> Self {
        Self {
            icy: blank_icy_block(),
            flv: build_flv_script_tag(&FlvMetadataFields {
                name: "",
                description: "",
                stereo: true,
                audiosamplerate: None,
                audiodatarate: None,
                audiocodecid: AUDIOCODEC_MPEG,
                artist: None,
                title: None,
                url: None,
            }),
            iceblock: build_iceblock_metadata(None, None, None),
        }
    }
}

#[derive(Default)]
struct FilterMetaState {
    /// Audio bytes produced since the last embedded ICY block was consumed.
    offset: usize,
    /// Scanned-clean prefix of `read_data`: bytes before this index are
    /// confirmed pure audio (any inline ICY block within them already
    /// stripped out).
    scanned_len: usize,
    build_metadata: Vec<u8>,
    build_metadata_len: usize,
}

/// One source's ingest pipeline: accumulates raw bytes, strips inline ICY
/// metadata if configured, validates MPEG/AAC frame sync, and attaches the
/// currently committed metadata trio to each produced block.
pub struct SourceFormat {
    tag: String,
    sync: MpegSync,
    charset: String,
    queue_block_size: usize,
    inline_metadata_interval: usize,
    read_data: Vec<u8>,
    filter: FilterMetaState,
    tags: Mutex<TagState>,
    trio: RwLock<MetadataTrio>,
    metadata_generation: AtomicU64,
    stream_name: String,
    stream_description: String,
    dump_disabled: bool,
    dump_file: Option<std::fs::File>,
    /// Set once `MpegSync` gives up looking for frame boundaries; from then
    /// on every chunk is forwarded unsynced instead of being withheld.
    raw_forward: bool,
}

impl SourceFormat {
    pub fn new(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        Self {
            sync: MpegSync::new(tag.clone()),
            tag,
            charset: "ISO-8859-1".to_string(),
            queue_block_size: 1400,
            inline_metadata_interval: 0,
            read_data: Vec::new(),
            filter: FilterMetaState::default(),
            tags: Mutex::new(TagState::default()),
            trio: RwLock::new(MetadataTrio::default()),
            metadata_generation: AtomicU64::new(0),
            stream_name: String::new(),
            stream_description: String::new(),
            dump_disabled: false,
            dump_file: None,
            raw_forward: false,
        }
    }

    pub fn apply_settings(&mut self, mount_config: &MountConfig) {
        self.charset = mount_config.charset.clone();
        self.queue_block_size = mount_config.queue_block_size.max(1);
        self.sync.check_numframes(mount_config.sync_numframes);
        self.stream_name = mount_config.stream_name.clone().unwrap_or_default();
        self.stream_description = mount_config.stream_description.clone().unwrap_or_default();
        match &mount_config.dump_file {
            Some(path) => match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    self.dump_file = Some(file);
                    self.dump_disabled = false;
                }
                Err(e) => {
                    log::warn!("[{}] could not open dump file {}: {}", self.tag, path, e);
                    self.dump_file = None;
                    self.dump_disabled = true;
                }
            },
            None => {
                self.dump_file = None;
                self.dump_disabled = false;
            }
        }
    }

    /// Appends a produced block's audio to the configured dump file, if any.
    /// On a short or failed write, warns and disables the dump file instead
    /// of erroring the whole ingest pipeline.
    pub fn write_buf_to_file(&mut self, block: &AudioBlock) {
        if self.dump_disabled || block.audio.is_empty() {
            return;
        }
        let Some(file) = self.dump_file.as_mut() else { return };
        use std::io::Write;
        if let Err(e) = file.write_all(&block.audio) {
            log::warn!("[{}] write to dump file failed, disabling: {}", self.tag, e);
            self.dump_disabled = true;
            self.dump_file = None;
        }
    }

    /// Overrides the inline ICY interval; normally set from the upstream
    /// response's `icy-metaint` header once the relay connection is made.
    pub fn set_inline_metadata_interval(&mut self, interval: usize) {
        self.inline_metadata_interval = interval;
    }

    /// Replaces the frame-sync scanner on reconnect, carrying forward its
    /// consecutive-frame requirement.
    pub fn swap_client(&mut self, mut new_sync: MpegSync) {
        new_sync.check_numframes(3);
        self.sync = new_sync;
        self.read_data.clear();
        self.filter = FilterMetaState::default();
    }

    /// `tag = None` commits whatever title/artist/url are currently
    /// pending into a freshly built metadata trio.
    pub fn set_tag(&self, tag: Option<&str>, value: &str, charset_name: &str) {
        let decoded = charset::decode_tag_value(value.as_bytes(), charset_name);
        let mut state = self.tags.lock();
        match tag {
            Some("title") => state.title = Some(decoded),
            Some("artist") => state.artist = Some(decoded),
            Some("url") => state.url = Some(decoded),
            Some(_) => {}
            None => state.dirty = true,
        }
        if state.dirty {
            let title = state.title.clone();
            let artist = state.artist.clone();
            let url = state.url.clone();
            state.dirty = false;
            drop(state);
            self.commit_metadata(title.as_deref(), artist.as_deref(), url.as_deref());
        }
    }

    fn commit_metadata(&self, title: Option<&str>, artist: Option<&str>, url: Option<&str>) {
        let icy = match build_icy_block(artist, title, url) {
            Some(icy) => icy,
            None => {
                log::warn!("[{}] metadata update overflowed ICY block limit, keeping previous", self.tag);
                return;
            }
        };
        let codec_id = match self.sync.layer {
            Some(Layer::Aac) => AUDIOCODEC_AAC,
            _ => AUDIOCODEC_MPEG,
        };
        let flv = build_flv_script_tag(&FlvMetadataFields {
            name: &self.stream_name,
            description: &self.stream_description,
            stereo: self.sync.channels.map(|c| c > 1).unwrap_or(true),
            audiosamplerate: self.sync.samplerate.map(|r| r as f64),
            audiodatarate: self.sync.bitrate.filter(|b| *b > 0).map(|b| b as f64 / 1000.0),
            audiocodecid: codec_id,
            artist,
            title,
            url,
        });
        let iceblock = build_iceblock_metadata(artist, title, url);

        *self.trio.write() = MetadataTrio { icy, flv, iceblock };
        self.metadata_generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn metadata_generation(&self) -> u64 {
        self.metadata_generation.load(Ordering::Acquire)
    }

    /// The codec family `MpegSync` has locked onto, if sync has been
    /// achieved at least once.
    pub fn sync_layer(&self) -> Option<Layer> {
        self.sync.layer
    }

    pub fn sync_samplerate(&self) -> Option<u32> {
        self.sync.samplerate
    }

    pub fn sync_bitrate(&self) -> Option<u32> {
        self.sync.bitrate
    }

    /// Appends freshly read upstream bytes to the internal accumulator.
    pub fn push_bytes(&mut self, chunk: &[u8]) {
        self.read_data.extend_from_slice(chunk);
    }

    /// One producer step: returns a new synced, metadata-tagged block if
    /// one filled, else `None`. Call in a loop after each `push_bytes`
    /// until it stops returning blocks.
    pub fn get_buffer(&mut self) -> Result<Option<AudioBlock>, SourceError> {
        if self.inline_metadata_interval == 0 {
            self.get_buffer_no_meta()
        } else {
            self.get_buffer_filter_meta()
        }
    }

    fn get_buffer_no_meta(&mut self) -> Result<Option<AudioBlock>, SourceError> {
        if self.read_data.len() < self.queue_block_size {
            return Ok(None);
        }
        let chunk: Vec<u8> = self.read_data.drain(..self.queue_block_size).collect();
        self.sync_and_publish(chunk)
    }

    fn get_buffer_filter_meta(&mut self) -> Result<Option<AudioBlock>, SourceError> {
        self.strip_inline_metadata()?;
        if self.filter.scanned_len < self.queue_block_size {
            return Ok(None);
        }
        let chunk: Vec<u8> = self.read_data.drain(..self.queue_block_size).collect();
        self.filter.scanned_len -= self.queue_block_size;
        self.sync_and_publish(chunk)
    }

    /// Steps 1-5 of the filter-meta state machine: advance the scanned-clean
    /// prefix of `read_data` past any embedded ICY blocks, removing them as
    /// they're found and committing their tags.
    fn strip_inline_metadata(&mut self) -> Result<(), SourceError> {
        loop {
            if self.filter.build_metadata_len == 0 {
                let available = self.read_data.len() - self.filter.scanned_len;
                if available == 0 {
                    return Ok(());
                }
                let mp3_block = self.inline_metadata_interval.saturating_sub(self.filter.offset);
                if available <= mp3_block {
                    self.filter.offset += available;
                    self.filter.scanned_len += available;
                    return Ok(());
                }
                self.filter.scanned_len += mp3_block;
                self.filter.offset = 0;
                if self.filter.scanned_len >= self.read_data.len() {
                    return Ok(());
                }
                let length_byte = self.read_data[self.filter.scanned_len];
                self.filter.build_metadata_len = 16 * length_byte as usize + 1;
                self.filter.build_metadata.clear();
            }

            let need = self.filter.build_metadata_len - self.filter.build_metadata.len();
            let have = self.read_data.len() - self.filter.scanned_len;
            let take = need.min(have);
            self.filter
                .build_metadata
                .extend_from_slice(&self.read_data[self.filter.scanned_len..self.filter.scanned_len + take]);

            if self.filter.build_metadata.len() < self.filter.build_metadata_len {
                return Ok(());
            }

            let icy_start = self.filter.scanned_len;
            let icy_end = icy_start + self.filter.build_metadata_len;
            self.read_data.drain(icy_start..icy_end);

            if self.filter.build_metadata_len > 1 {
                let decoded = charset::decode_tag_value(&self.filter.build_metadata[1..], &self.charset);
                let tags = parse_icy_text(&decoded);
                if tags.title.is_some() || tags.url.is_some() {
                    if let Some(title) = &tags.title {
                        self.set_tag(Some("title"), title, "UTF-8");
                    }
                    if let Some(url) = &tags.url {
                        self.set_tag(Some("url"), url, "UTF-8");
                    }
                    self.set_tag(None, "", "UTF-8");
                }
            }

            self.filter.build_metadata_len = 0;
            self.filter.build_metadata.clear();
        }
    }

    fn sync_and_publish(&mut self, chunk: Vec<u8>) -> Result<Option<AudioBlock>, SourceError> {
        if self.raw_forward {
            return Ok(Some(self.publish_raw(chunk)));
        }

        let original = chunk.clone();
        let mut chunk = chunk;
        let trailing = self.sync.complete_frames(&mut chunk);

        if trailing < 0 {
            if self.sync.should_give_up() {
                log::warn!(
                    "[{}] no frame sync found after {} bytes, forwarding unsynced",
                    self.tag,
                    crate::protocol_constants::MPEG_SYNC_GIVEUP_BYTES
                );
                self.raw_forward = true;
                return Ok(Some(self.publish_raw(original)));
            }
            return Ok(None);
        }
        let trailing = trailing as usize;
        if trailing > MPEG_SYNC_DEAD_THRESHOLD {
            return Err(SourceError::Sync(crate::error::SyncError::SyncLost(trailing)));
        }
        if trailing > 0 {
            let tail_start = original.len() - trailing;
            self.sync.data_insert(Bytes::copy_from_slice(&original[tail_start..]));
        }
        if chunk.is_empty() {
            return Ok(None);
        }

        let generation = self.metadata_generation();
        let trio = self.trio.read();
        let block = AudioBlock::new(Bytes::from(chunk), generation)
            .synced()
            .with_metadata(trio.icy.clone(), trio.flv.clone(), trio.iceblock.clone());
        Ok(Some(block))
    }

    /// Publishes a chunk without frame validation, once `MpegSync` has given
    /// up looking for a boundary. Still metadata-tagged, just not `.synced()`.
    fn publish_raw(&self, chunk: Vec<u8>) -> AudioBlock {
        let generation = self.metadata_generation();
        let trio = self.trio.read();
        AudioBlock::new(Bytes::from(chunk), generation).with_metadata(trio.icy.clone(), trio.flv.clone(), trio.iceblock.clone())
    }
}
