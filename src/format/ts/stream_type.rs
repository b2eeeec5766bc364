//! Mapping of PMT stream types, registration tags and descriptor tags onto
//! codecs.

use super::types::*;
use crate::av::{fourcc, CodecId, MediaType, Stream};
use log::debug;

/// One row of a stream type lookup table.
#[derive(Debug, Clone, Copy)]
pub struct StreamType {
    pub key: u32,
    pub media_type: MediaType,
    pub codec_id: CodecId,
}

const fn st(key: u32, media_type: MediaType, codec_id: CodecId) -> StreamType {
    StreamType {
        key,
        media_type,
        codec_id,
    }
}

use CodecId as C;
use MediaType::{Audio, Data, Subtitle, Video};

/// ISO/IEC 13818-1 stream types.
pub const ISO_TYPES: &[StreamType] = &[
    st(0x01, Video, C::Mpeg2Video),
    st(0x02, Video, C::Mpeg2Video),
    st(0x03, Audio, C::Mp3),
    st(0x04, Audio, C::Mp3),
    st(0x0f, Audio, C::Aac),
    st(0x10, Video, C::Mpeg4),
    st(0x11, Audio, C::AacLatm),
    st(0x1b, Video, C::H264),
    st(0x1c, Audio, C::Aac),
    st(0x20, Video, C::H264),
    st(0x21, Video, C::Jpeg2000),
    st(0x24, Video, C::Hevc),
    st(0x33, Video, C::Vvc),
    st(0x42, Video, C::Cavs),
    st(0xd1, Video, C::Dirac),
    st(0xd2, Video, C::Avs2),
    st(0xd4, Video, C::Avs3),
    st(0xea, Video, C::Vc1),
];

/// Blu-ray private stream types, valid under an "HDMV" or "HDPR" registration.
pub const HDMV_TYPES: &[StreamType] = &[
    st(0x80, Audio, C::PcmBluray),
    st(0x81, Audio, C::Ac3),
    st(0x82, Audio, C::Dts),
    st(0x83, Audio, C::TrueHd),
    st(0x84, Audio, C::Eac3),
    st(0x85, Audio, C::Dts),
    st(0x86, Audio, C::Dts),
    st(0xa1, Audio, C::Eac3),
    st(0xa2, Audio, C::Dts),
    st(0x90, Subtitle, C::HdmvPgsSubtitle),
    st(0x92, Subtitle, C::HdmvTextSubtitle),
];

/// ATSC and other private stream types.
pub const MISC_TYPES: &[StreamType] = &[
    st(0x81, Audio, C::Ac3),
    st(0x87, Audio, C::Eac3),
    st(0x8a, Audio, C::Dts),
];

/// SCTE stream types.
pub const SCTE_TYPES: &[StreamType] = &[st(0x86, Data, C::Scte35)];

/// Registration descriptor format identifiers.
pub const REGD_TYPES: &[StreamType] = &[
    st(fourcc(b"drac"), Video, C::Dirac),
    st(fourcc(b"AC-3"), Audio, C::Ac3),
    st(fourcc(b"BSSD"), Audio, C::S302m),
    st(fourcc(b"DTS1"), Audio, C::Dts),
    st(fourcc(b"DTS2"), Audio, C::Dts),
    st(fourcc(b"DTS3"), Audio, C::Dts),
    st(fourcc(b"EAC3"), Audio, C::Eac3),
    st(fourcc(b"HEVC"), Video, C::Hevc),
    st(fourcc(b"VVC "), Video, C::Vvc),
    st(fourcc(b"KLVA"), Data, C::SmpteKlv),
    st(fourcc(b"ID3 "), Data, C::TimedId3),
    st(fourcc(b"VC-1"), Video, C::Vc1),
    st(fourcc(b"Opus"), Audio, C::Opus),
    st(fourcc(b"AV01"), Video, C::Av1),
];

/// Metadata descriptor format identifiers.
pub const METADATA_TYPES: &[StreamType] = &[
    st(fourcc(b"KLVA"), Data, C::SmpteKlv),
    st(fourcc(b"ID3 "), Data, C::TimedId3),
];

/// DVB descriptors that identify the codec of a private data stream.
pub const DESC_TYPES: &[StreamType] = &[
    st(0x6a, Audio, C::Ac3),
    st(0x7a, Audio, C::Eac3),
    st(0x7b, Audio, C::Dts),
    st(0x56, Subtitle, C::DvbTeletext),
    st(0x59, Subtitle, C::DvbSubtitle),
];

pub fn find_stream_type(types: &[StreamType], key: u32) -> Option<(MediaType, CodecId)> {
    types
        .iter()
        .find(|t| t.key == key)
        .map(|t| (t.media_type, t.codec_id))
}

fn is_hdmv(prog_reg_desc: Option<u32>) -> bool {
    prog_reg_desc == Some(fourcc(b"HDMV")) || prog_reg_desc == Some(fourcc(b"HDPR"))
}

/// Whether entries of this type carry PES packets rather than sections.
pub fn is_pes_stream(stream_type: u8, prog_reg_desc: Option<u32>) -> bool {
    !(stream_type == STREAM_TYPE_DSMCC_B
        || (stream_type == STREAM_TYPE_SCTE35 && prog_reg_desc == Some(fourcc(b"CUEI"))))
}

/// Classifies `stream` by its PMT stream_type.
///
/// Returns true for an HDMV TrueHD stream, whose PID also carries an AC-3
/// core that needs a stream of its own.
pub fn set_stream_info(stream: &mut Stream, stream_type: u8, prog_reg_desc: Option<u32>) -> bool {
    let (old_media_type, old_codec_id) = (stream.media_type, stream.codec_id);

    stream.stream_type = stream_type;
    stream.codec_tag = stream_type as u32;
    stream.set_codec(Data, C::None);
    debug!(
        "stream={} stream_type={:#x} pid={:#x}",
        stream.index, stream_type, stream.pid
    );

    let mut needs_sub_stream = false;
    let key = stream_type as u32;
    let mut found = find_stream_type(ISO_TYPES, key);
    if found.is_none() && is_hdmv(prog_reg_desc) {
        found = find_stream_type(HDMV_TYPES, key);
        needs_sub_stream = stream_type == STREAM_TYPE_BLURAY_TRUEHD;
    }
    if found.is_none() {
        found = find_stream_type(MISC_TYPES, key);
    }

    match found {
        Some((media_type, codec_id)) => stream.set_codec(media_type, codec_id),
        None => stream.set_codec(old_media_type, old_codec_id),
    }
    needs_sub_stream
}

/// Best guess of a stream's media type from its PES stream_id.
pub fn media_type_from_stream_id(stream_id: u8) -> MediaType {
    match stream_id {
        0xc0..=0xdf => Audio,
        0xe0..=0xef => Video,
        _ => Data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_iso_types() {
        let mut stream = Stream::new(0, 0x101);
        assert!(!set_stream_info(&mut stream, STREAM_TYPE_H264, None));
        assert_eq!(stream.codec_id, CodecId::H264);
        assert_eq!(stream.media_type, MediaType::Video);
        assert_eq!(stream.codec_tag, 0x1b);
    }

    #[test]
    fn test_hdmv_types_need_registration() {
        let mut stream = Stream::new(0, 0x1100);
        set_stream_info(&mut stream, 0x83, None);
        assert_eq!(stream.codec_id, CodecId::None);

        let mut stream = Stream::new(0, 0x1100);
        assert!(set_stream_info(&mut stream, 0x83, Some(fourcc(b"HDMV"))));
        assert_eq!(stream.codec_id, CodecId::TrueHd);

        // 0x81 is AC-3 both on Blu-ray and in ATSC
        let mut stream = Stream::new(0, 0x1100);
        set_stream_info(&mut stream, 0x81, None);
        assert_eq!(stream.codec_id, CodecId::Ac3);
    }

    #[test]
    fn test_unknown_type_keeps_previous_codec() {
        let mut stream = Stream::new(0, 0x200);
        stream.set_codec(MediaType::Audio, CodecId::Opus);
        set_stream_info(&mut stream, 0x06, None);
        assert_eq!(stream.codec_id, CodecId::Opus);
        assert_eq!(stream.stream_type, 0x06);
    }

    #[test]
    fn test_pes_stream_classification() {
        assert!(is_pes_stream(0x1b, None));
        assert!(!is_pes_stream(0x13, None));
        assert!(is_pes_stream(0x86, None));
        assert!(!is_pes_stream(0x86, Some(fourcc(b"CUEI"))));
    }

    #[test]
    fn test_registration_lookup() {
        assert_eq!(
            find_stream_type(REGD_TYPES, fourcc(b"Opus")),
            Some((MediaType::Audio, CodecId::Opus))
        );
        assert_eq!(find_stream_type(REGD_TYPES, fourcc(b"XXXX")), None);
        assert_eq!(media_type_from_stream_id(0xc3), MediaType::Audio);
        assert_eq!(media_type_from_stream_id(0xe0), MediaType::Video);
        assert_eq!(media_type_from_stream_id(0xbd), MediaType::Data);
    }
}
