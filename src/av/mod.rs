/// Broad category of an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaType {
    Video,
    Audio,
    Subtitle,
    #[default]
    Data,
}

/// Codec identity as far as the transport layer can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecId {
    #[default]
    None,
    Mpeg1Video,
    Mpeg2Video,
    Mpeg4,
    H264,
    Hevc,
    Vvc,
    Av1,
    Cavs,
    Avs2,
    Avs3,
    Dirac,
    Vc1,
    Jpeg2000,
    Mp2,
    Mp3,
    Aac,
    AacLatm,
    Ac3,
    Eac3,
    Dts,
    TrueHd,
    PcmBluray,
    S302m,
    Opus,
    HdmvPgsSubtitle,
    HdmvTextSubtitle,
    DvbTeletext,
    DvbSubtitle,
    AribCaption,
    SmpteKlv,
    TimedId3,
    Scte35,
    Epg,
    BinData,
    /// Whole transport packets, as delivered by the raw reader.
    Mpeg2Ts,
}

/// Read-only view of a stream's codec parameters.
pub trait CodecData: Send + Sync {
    fn codec_id(&self) -> CodecId;
    fn media_type(&self) -> MediaType;
    fn extra_data(&self) -> Option<&[u8]>;
}

mod packet;
mod stream;
pub use packet::*;
pub use stream::*;
