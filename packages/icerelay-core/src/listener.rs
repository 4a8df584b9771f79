//! `ListenerWriter`: per-listener cursor into a [`MountQueue`], choosing
//! between plain/ICY-interleaved/iceblock/FLV wire shapes.
//!
//! Grounded on the teacher's `StreamState::subscribe` (atomic prefill +
//! live-receiver handoff) generalized to a cursor into the shared ring
//! instead of a per-listener `broadcast::Receiver`, so a listener that
//! falls behind resumes from wherever the ring currently starts rather than
//! silently skipping to "now".

use bytes::{Bytes, BytesMut};

use crate::metadata::{build_iceblock_metadata, wrap_iceblock_audio};
use crate::protocol_constants::LISTENER_WRITE_CAP;
use crate::refbuf::blank_icy_block;
use crate::source::queue::{MountQueue, QueueRead};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ListenerFlags: u8 {
        /// Set while a partially-sent ICY header still has bytes queued.
        const IN_METADATA = 0b0000_0001;
        /// Set while this listener has never pulled a real metadata block.
        const USING_BLANK_META = 0b0000_0010;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerMode {
    Plain,
    IcyInterleaved,
    Iceblock,
    Flv,
}

/// What the listener's writer task should do after one `step`.
pub enum ListenerStep {
    /// Bytes ready to send downstream.
    Data(Bytes),
    /// FLV audio payload, plus a fresh `onMetaData` body if the source's
    /// metadata generation advanced since the last step.
    FlvData { audio: Bytes, new_meta: Option<Bytes> },
    /// Nothing new in the queue yet; caller should wait on
    /// `MountQueue::notified` before stepping again.
    Pending,
    /// This listener's cursor fell off the back of the ring; it has been
    /// fast-forwarded to `resume_at` and should step again immediately.
    Overran { resume_at: u64 },
}

pub struct ListenerWriter {
    mode: ListenerMode,
    cursor: u64,
    pos: usize,
    interval: usize,
    since_meta_block: usize,
    last_seen_metadata: u64,
    queue_pos: u64,
    flags: ListenerFlags,
    /// Remaining unsent bytes of an ICY header that didn't fit in one
    /// `LISTENER_WRITE_CAP`-sized step.
    pending_header: Option<Bytes>,
}

impl ListenerWriter {
    /// `start_cursor` is typically `queue.tail_seq()` (new audio only) or
    /// `queue.head_seq()` (replay the retained backlog).
    pub fn new(mode: ListenerMode, start_cursor: u64, interval: usize) -> Self {
        Self {
            mode,
            cursor: start_cursor,
            pos: 0,
            interval,
            since_meta_block: 0,
            last_seen_metadata: 0,
            queue_pos: 0,
            flags: ListenerFlags::USING_BLANK_META,
            pending_header: None,
        }
    }

    pub fn queue_pos(&self) -> u64 {
        self.queue_pos
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// One write step. Caller is responsible for actually pushing the
    /// returned bytes to the listener's sink and re-stepping.
    pub fn step(&mut self, queue: &MountQueue) -> ListenerStep {
        if let Some(header) = self.pending_header.take() {
            return ListenerStep::Data(self.resume_header(header));
        }

        match queue.read_at(self.cursor) {
            QueueRead::Pending => ListenerStep::Pending,
            QueueRead::Overrun(resume_at) => {
                self.cursor = resume_at;
                self.pos = 0;
                ListenerStep::Overran { resume_at }
            }
            QueueRead::Ready(block) if self.mode == ListenerMode::Flv => {
                let (audio, new_meta) = self.step_flv(&block.audio, block.metadata_generation, block.flv.as_ref());
                if self.pos >= block.audio.len() {
                    self.cursor += 1;
                    self.pos = 0;
                }
                ListenerStep::FlvData { audio, new_meta }
            }
            QueueRead::Ready(block) => {
                let data = match self.mode {
                    ListenerMode::Plain => self.step_plain(&block.audio),
                    ListenerMode::IcyInterleaved => {
                        self.step_icy(&block.audio, block.metadata_generation, block.icy.as_ref())
                    }
                    ListenerMode::Iceblock => {
                        self.step_iceblock(&block.audio, block.metadata_generation, block.iceblock.as_ref())
                    }
                    ListenerMode::Flv => unreachable!("handled above"),
                };
                if self.pos >= block.audio.len() {
                    self.cursor += 1;
                    self.pos = 0;
                }
                ListenerStep::Data(data)
            }
        }
    }

    /// Sends up to `LISTENER_WRITE_CAP` bytes of `header`, stashing the rest
    /// in `pending_header` to resume on the next step if it didn't fit.
    fn resume_header(&mut self, header: Bytes) -> Bytes {
        let n = header.len().min(LISTENER_WRITE_CAP);
        let out = header.slice(0..n);
        if n < header.len() {
            self.pending_header = Some(header.slice(n..));
            self.flags.insert(ListenerFlags::IN_METADATA);
        } else {
            self.flags.remove(ListenerFlags::IN_METADATA);
        }
        out
    }

    fn take_n(&self, audio: &[u8], cap: usize) -> usize {
        (audio.len() - self.pos).min(cap)
    }

    fn step_plain(&mut self, audio: &Bytes) -> Bytes {
        let n = self.take_n(audio, LISTENER_WRITE_CAP);
        let out = audio.slice(self.pos..self.pos + n);
        self.pos += n;
        self.queue_pos += n as u64;
        out
    }

    fn step_icy(&mut self, audio: &Bytes, generation: u64, icy: Option<&Bytes>) -> Bytes {
        if self.interval > 0 && self.since_meta_block >= self.interval {
            let header = if generation != self.last_seen_metadata || self.flags.contains(ListenerFlags::USING_BLANK_META) {
                self.last_seen_metadata = generation;
                self.flags.remove(ListenerFlags::USING_BLANK_META);
                icy.cloned().unwrap_or_else(blank_icy_block)
            } else {
                Bytes::from_static(&[0u8])
            };
            self.since_meta_block = 0;
            return self.resume_header(header);
        }

        let mut out = BytesMut::new();
        let remaining_to_boundary = if self.interval > 0 {
            self.interval - self.since_meta_block
        } else {
            usize::MAX
        };
        let n = self.take_n(audio, remaining_to_boundary.min(LISTENER_WRITE_CAP));
        out.extend_from_slice(&audio[self.pos..self.pos + n]);
        self.pos += n;
        self.since_meta_block += n;
        self.queue_pos += n as u64;

        out.freeze()
    }

    /// FLV mode never interleaves metadata into the audio payload itself —
    /// the caller wraps `new_meta` as its own script tag alongside the audio
    /// tag, so this just mirrors `step_plain` plus a generation check.
    fn step_flv(&mut self, audio: &Bytes, generation: u64, flv: Option<&Bytes>) -> (Bytes, Option<Bytes>) {
        let new_meta = if generation != self.last_seen_metadata || self.flags.contains(ListenerFlags::USING_BLANK_META) {
            self.last_seen_metadata = generation;
            self.flags.remove(ListenerFlags::USING_BLANK_META);
            flv.cloned()
        } else {
            None
        };

        let n = self.take_n(audio, LISTENER_WRITE_CAP);
        let out = audio.slice(self.pos..self.pos + n);
        self.pos += n;
        self.queue_pos += n as u64;

        (out, new_meta)
    }

    fn step_iceblock(&mut self, audio: &Bytes, generation: u64, iceblock: Option<&Bytes>) -> Bytes {
        let mut out = BytesMut::new();

        if generation != self.last_seen_metadata || self.flags.contains(ListenerFlags::USING_BLANK_META) {
            self.last_seen_metadata = generation;
            self.flags.remove(ListenerFlags::USING_BLANK_META);
            let meta = iceblock.cloned().unwrap_or_else(|| build_iceblock_metadata(None, None, None));
            out.extend_from_slice(&meta);
        }

        let budget = LISTENER_WRITE_CAP.saturating_sub(out.len()).saturating_sub(2);
        let n = self.take_n(audio, budget);
        let frame = wrap_iceblock_audio(&audio[self.pos..self.pos + n]);
        out.extend_from_slice(&frame);
        self.pos += n;
        self.queue_pos += n as u64;

        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refbuf::AudioBlock;

    fn queue_with_one_block(audio: &[u8]) -> MountQueue {
        let q = MountQueue::new(4);
        q.push(AudioBlock::new(Bytes::copy_from_slice(audio), 1));
        q
    }

    #[test]
    fn plain_mode_streams_whole_small_block_in_one_step() {
        let q = queue_with_one_block(&[1, 2, 3, 4]);
        let mut w = ListenerWriter::new(ListenerMode::Plain, 0, 0);
        match w.step(&q) {
            ListenerStep::Data(d) => assert_eq!(&d[..], &[1, 2, 3, 4]),
            _ => panic!("expected data"),
        }
        assert_eq!(w.queue_pos(), 4);
        assert_eq!(w.cursor(), 1);
    }

    #[test]
    fn pending_when_listener_caught_up() {
        let q = MountQueue::new(4);
        let mut w = ListenerWriter::new(ListenerMode::Plain, 0, 0);
        assert!(matches!(w.step(&q), ListenerStep::Pending));
    }

    #[test]
    fn icy_mode_sends_blank_meta_block_before_first_real_one() {
        let q = MountQueue::new(4);
        q.push(AudioBlock::new(Bytes::copy_from_slice(&[0u8; 4]), 0));
        let mut w = ListenerWriter::new(ListenerMode::IcyInterleaved, 0, 4);
        match w.step(&q) {
            ListenerStep::Data(d) => {
                // interval==since_meta_block(0)? No: interval=4, since_meta_block starts 0,
                // so header only sent once since_meta_block has reached interval.
                assert_eq!(d.len(), 4);
            }
            _ => panic!("expected data"),
        }
    }

    #[test]
    fn icy_mode_inserts_header_at_interval_boundary() {
        let q = MountQueue::new(4);
        q.push(AudioBlock::new(Bytes::copy_from_slice(&[9u8; 8]), 5).with_metadata(
            Bytes::from_static(b"\x01StreamTitle='X';"),
            Bytes::new(),
            Bytes::new(),
        ));
        let mut w = ListenerWriter::new(ListenerMode::IcyInterleaved, 0, 4);
        let ListenerStep::Data(first) = w.step(&q) else { panic!() };
        // First step: since_meta_block(0) < interval(4), no header, sends up to 4 bytes.
        assert_eq!(first.len(), 4);
        assert_eq!(w.queue_pos(), 4);
    }

    #[test]
    fn flv_mode_emits_new_meta_only_on_generation_change() {
        let q = MountQueue::new(4);
        q.push(
            AudioBlock::new(Bytes::copy_from_slice(&[1u8; 4]), 1).with_metadata(
                Bytes::new(),
                Bytes::from_static(b"first-meta"),
                Bytes::new(),
            ),
        );
        q.push(
            AudioBlock::new(Bytes::copy_from_slice(&[2u8; 4]), 1).with_metadata(
                Bytes::new(),
                Bytes::from_static(b"first-meta"),
                Bytes::new(),
            ),
        );
        let mut w = ListenerWriter::new(ListenerMode::Flv, 0, 0);

        let ListenerStep::FlvData { audio, new_meta } = w.step(&q) else { panic!("expected FlvData") };
        assert_eq!(&audio[..], &[1, 1, 1, 1]);
        assert_eq!(new_meta.as_deref(), Some(&b"first-meta"[..]));

        let ListenerStep::FlvData { audio, new_meta } = w.step(&q) else { panic!("expected FlvData") };
        assert_eq!(&audio[..], &[2, 2, 2, 2]);
        assert!(new_meta.is_none(), "same generation should not resend metadata");
    }

    #[test]
    fn icy_header_longer_than_write_cap_resumes_across_steps() {
        let q = MountQueue::new(4);
        q.push(AudioBlock::new(Bytes::copy_from_slice(&[9u8; 4]), 1).with_metadata(
            Bytes::from(vec![b'x'; LISTENER_WRITE_CAP + 50]),
            Bytes::new(),
            Bytes::new(),
        ));
        let mut w = ListenerWriter::new(ListenerMode::IcyInterleaved, 0, 100_000);
        w.since_meta_block = 100_000; // force header emission on first step

        let ListenerStep::Data(first) = w.step(&q) else { panic!("expected data") };
        assert_eq!(first.len(), LISTENER_WRITE_CAP);
        assert!(w.flags.contains(ListenerFlags::IN_METADATA));

        let ListenerStep::Data(second) = w.step(&q) else { panic!("expected data") };
        assert_eq!(second.len(), 50);
        assert!(!w.flags.contains(ListenerFlags::IN_METADATA));

        // Header fully flushed; this step should now emit audio.
        let ListenerStep::Data(third) = w.step(&q) else { panic!("expected data") };
        assert_eq!(&third[..], &[9, 9, 9, 9]);
    }

    #[test]
    fn overran_cursor_fast_forwards_to_head() {
        let q = MountQueue::new(1);
        q.push(AudioBlock::new(Bytes::copy_from_slice(&[1]), 0));
        q.push(AudioBlock::new(Bytes::copy_from_slice(&[2]), 0)); // evicts seq 0
        let mut w = ListenerWriter::new(ListenerMode::Plain, 0, 0);
        match w.step(&q) {
            ListenerStep::Overran { resume_at } => assert_eq!(resume_at, 1),
            _ => panic!("expected Overran"),
        }
        assert_eq!(w.cursor(), 1);
    }
}
