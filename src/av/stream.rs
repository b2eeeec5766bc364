use super::{CodecData, CodecId, MediaType};
use crate::format::ts::mp4::SlConfig;
use bytes::Bytes;

/// Accessibility and role flags of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Disposition {
    pub hearing_impaired: bool,
    pub visual_impaired: bool,
    pub descriptions: bool,
    pub clean_effects: bool,
    pub dependent: bool,
    pub still_image: bool,
}

impl Disposition {
    /// Sets every flag that is set in `other`.
    pub fn merge(&mut self, other: Disposition) {
        self.hearing_impaired |= other.hearing_impaired;
        self.visual_impaired |= other.visual_impaired;
        self.descriptions |= other.descriptions;
        self.clean_effects |= other.clean_effects;
        self.dependent |= other.dependent;
        self.still_image |= other.still_image;
    }

    pub fn is_empty(&self) -> bool {
        *self == Disposition::default()
    }
}

/// Dolby Vision decoder configuration record (DOVI video stream descriptor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DoviConfig {
    pub version_major: u8,
    pub version_minor: u8,
    pub profile: u8,
    pub level: u8,
    pub rpu_present: bool,
    pub el_present: bool,
    pub bl_present: bool,
    /// PID of the base layer when this stream only carries the enhancement layer.
    pub dependency_pid: Option<u16>,
    pub bl_signal_compatibility_id: u8,
    pub md_compression: u8,
}

/// Codec profile selected from descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// ARIB STD-B24 captions for fixed receivers.
    AribProfileA,
    /// ARIB STD-B24 captions for one-segment receivers.
    AribProfileC,
}

/// An elementary stream discovered in the transport stream.
#[derive(Debug, Clone, Default)]
pub struct Stream {
    /// Position in the demuxer's stream list.
    pub index: usize,
    /// PID carrying the stream.
    pub pid: u16,
    /// PMT stream_type, 0 when the stream was guessed.
    pub stream_type: u8,
    pub media_type: MediaType,
    pub codec_id: CodecId,
    /// Little-endian four-character code, or the stream_type when no
    /// registration descriptor was seen.
    pub codec_tag: u32,
    /// Comma-separated ISO 639 codes.
    pub language: Option<String>,
    pub disposition: Disposition,
    /// Component tag from the stream identifier descriptor.
    pub stream_identifier: Option<u8>,
    pub extradata: Option<Bytes>,
    pub dovi: Option<DoviConfig>,
    pub profile: Option<Profile>,
    pub sl: Option<SlConfig>,
    /// Packets of discarded streams are dropped before reassembly.
    pub discard: bool,
    /// Created from a PES header on a PID no PMT announced.
    pub auto_guessed: bool,
}

impl Stream {
    pub fn new(index: usize, pid: u16) -> Self {
        Self {
            index,
            pid,
            ..Default::default()
        }
    }

    pub fn set_codec(&mut self, media_type: MediaType, codec_id: CodecId) {
        self.media_type = media_type;
        self.codec_id = codec_id;
    }
}

impl CodecData for Stream {
    fn codec_id(&self) -> CodecId {
        self.codec_id
    }

    fn media_type(&self) -> MediaType {
        self.media_type
    }

    fn extra_data(&self) -> Option<&[u8]> {
        self.extradata.as_deref()
    }
}

/// Packs a four-character code the way codec tags are stored.
pub const fn fourcc(tag: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*tag)
}
