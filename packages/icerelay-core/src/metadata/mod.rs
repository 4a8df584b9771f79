//! Metadata encoders/decoders for the three egress formats plus the inline
//! ICY ingest parser and charset helpers they all share.

pub mod charset;
pub mod flv;
pub mod iceblock;
pub mod icy;

pub use charset::decode_tag_value;
pub use flv::{build_flv_script_tag, FlvMetadataFields, AUDIOCODEC_AAC, AUDIOCODEC_MPEG};
pub use iceblock::{build_iceblock_metadata, wrap_audio as wrap_iceblock_audio};
pub use icy::{build_icy_block, parse_icy_payload, parse_icy_text, IcyTags};
