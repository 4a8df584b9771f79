//! The audio block: a reference-counted immutable buffer with optional
//! metadata side channels.
//!
//! The original server chains these as `RefBuf.associated` linked blocks
//! (audio -> ICY -> FLV -> iceblock), each with a manual refcount. Since
//! `bytes::Bytes` is already `Arc`-backed and immutable-once-shared, that
//! whole chain collapses to a handful of `Option<Bytes>` fields picked by
//! name instead of walked by pointer.

use std::sync::OnceLock;

use bytes::Bytes;

use crate::protocol_constants::BLANK_ICY_BLOCK;

bitflags::bitflags! {
    /// Per-block flags (mirrors `RefBuf.flags` bitset in the original).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockFlags: u8 {
        /// Set once `MpegSync` has validated this block ends on a frame boundary.
        const SOURCE_BLOCK_SYNC = 0b0000_0001;
    }
}

/// One queued unit of audio, with the metadata that was current when it was
/// produced carried alongside as sibling envelopes.
///
/// `metadata_generation` increases every time the source commits new title/
/// artist/url metadata; listeners compare it against their own last-seen
/// generation to decide whether to (re)send an ICY/iceblock metadata record,
/// which replaces the original's pointer-equality test against `associated`.
#[derive(Clone)]
pub struct AudioBlock {
    pub audio: Bytes,
    pub flags: BlockFlags,
    /// Monotonically increasing metadata version this block was tagged with.
    pub metadata_generation: u64,
    pub icy: Option<Bytes>,
    pub flv: Option<Bytes>,
    pub iceblock: Option<Bytes>,
}

impl AudioBlock {
    pub fn new(audio: Bytes, metadata_generation: u64) -> Self {
        Self {
            audio,
            flags: BlockFlags::empty(),
            metadata_generation,
            icy: None,
            flv: None,
            iceblock: None,
        }
    }

    pub fn with_metadata(mut self, icy: Bytes, flv: Bytes, iceblock: Bytes) -> Self {
        self.icy = Some(icy);
        self.flv = Some(flv);
        self.iceblock = Some(iceblock);
        self
    }

    pub fn synced(mut self) -> Self {
        self.flags |= BlockFlags::SOURCE_BLOCK_SYNC;
        self
    }

    pub fn is_synced(&self) -> bool {
        self.flags.contains(BlockFlags::SOURCE_BLOCK_SYNC)
    }

    /// Invariant check used by tests: the metadata trio is all-present or
    /// all-absent, never partial.
    pub fn metadata_is_consistent(&self) -> bool {
        self.icy.is_some() == self.flv.is_some() && self.flv.is_some() == self.iceblock.is_some()
    }
}

/// The process-wide blank metadata block: `\x01StreamTitle='';`. Shared by
/// every mount that hasn't had a title set yet, and by every listener that
/// hasn't pulled a real metadata block yet (`UsingBlankMeta`). Never dropped.
pub fn blank_icy_block() -> Bytes {
    static BLANK: OnceLock<Bytes> = OnceLock::new();
    BLANK
        .get_or_init(|| Bytes::from_static(BLANK_ICY_BLOCK))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_block_is_seventeen_bytes() {
        assert_eq!(blank_icy_block().len(), 17);
    }

    #[test]
    fn fresh_block_has_no_metadata_and_is_consistent() {
        let block = AudioBlock::new(Bytes::from_static(b"abc"), 0);
        assert!(block.metadata_is_consistent());
        assert!(!block.is_synced());
    }

    #[test]
    fn with_metadata_sets_all_three_envelopes() {
        let block = AudioBlock::new(Bytes::from_static(b"abc"), 1).with_metadata(
            Bytes::from_static(b"icy"),
            Bytes::from_static(b"flv"),
            Bytes::from_static(b"ice"),
        );
        assert!(block.metadata_is_consistent());
        assert!(block.icy.is_some() && block.flv.is_some() && block.iceblock.is_some());
    }
}
