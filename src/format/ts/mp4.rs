//! MPEG-4 Systems descriptors carried in transport streams.
//!
//! A PMT may carry an InitialObjectDescriptor (IOD) whose ES descriptors
//! describe the decoder configuration and SL packetization of MPEG-4
//! elementary streams. SL and FMC descriptors on the PMT entries then refer
//! to those ES descriptors by ES_ID.

use crate::av::{CodecId, MediaType};
use crate::error::{Result, TsError};
use crate::utils::{BitReader, ByteReader};
use log::debug;

pub const MP4_OD_DESCR_TAG: u8 = 0x01;
pub const MP4_IOD_DESCR_TAG: u8 = 0x02;
pub const MP4_ES_DESCR_TAG: u8 = 0x03;
pub const MP4_DEC_CONFIG_DESCR_TAG: u8 = 0x04;
pub const MP4_DEC_SPECIFIC_DESCR_TAG: u8 = 0x05;
pub const MP4_SL_DESCR_TAG: u8 = 0x06;

/// Maximum number of ES descriptors kept from one IOD.
pub const MAX_MP4_DESCR_COUNT: usize = 16;
const MAX_LEVEL: usize = 4;

/// SL packet header configuration (SLConfigDescriptor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlConfig {
    pub use_au_start: bool,
    pub use_au_end: bool,
    pub use_rand_acc_pt: bool,
    pub use_padding: bool,
    pub use_timestamps: bool,
    pub use_idle: bool,
    pub timestamp_res: u32,
    pub timestamp_len: u32,
    pub ocr_len: u32,
    pub au_len: u32,
    pub inst_bitrate_len: u32,
    pub degr_prior_len: u32,
    pub au_seq_num_len: u32,
    pub packet_seq_num_len: u32,
}

/// One ES descriptor out of an IOD.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Mp4Descr {
    pub es_id: u16,
    /// Raw DecoderConfigDescriptor body.
    pub dec_config_descr: Vec<u8>,
    pub sl: SlConfig,
}

/// Codec parameters decoded from a DecoderConfigDescriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    pub object_type: u8,
    pub media_type: MediaType,
    pub codec_id: CodecId,
    pub extradata: Option<Vec<u8>>,
}

/// Maps an MPEG-4 objectTypeIndication onto a codec.
pub fn codec_from_object_type(object_type: u8) -> (MediaType, CodecId) {
    match object_type {
        0x20 => (MediaType::Video, CodecId::Mpeg4),
        0x21 => (MediaType::Video, CodecId::H264),
        0x23 => (MediaType::Video, CodecId::Hevc),
        0x40 | 0x66..=0x68 => (MediaType::Audio, CodecId::Aac),
        0x60..=0x65 => (MediaType::Video, CodecId::Mpeg2Video),
        0x69 | 0x6b => (MediaType::Audio, CodecId::Mp3),
        0x6a => (MediaType::Video, CodecId::Mpeg1Video),
        0xa5 => (MediaType::Audio, CodecId::Ac3),
        0xa6 => (MediaType::Audio, CodecId::Eac3),
        0xa9 => (MediaType::Audio, CodecId::Dts),
        0xad => (MediaType::Audio, CodecId::Opus),
        _ => (MediaType::Data, CodecId::None),
    }
}

/// Reads a descriptor tag and its expandable (up to 4 byte) length.
fn read_descr(reader: &mut ByteReader<'_>) -> Result<(u8, usize)> {
    let tag = reader.read_u8()?;
    let mut len = 0usize;
    for _ in 0..4 {
        let c = reader.read_u8()?;
        len = (len << 7) | (c & 0x7f) as usize;
        if c & 0x80 == 0 {
            break;
        }
    }
    Ok((tag, len))
}

impl DecoderConfig {
    /// Decodes a DecoderConfigDescriptor body.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);
        let object_type = reader.read_u8()?;
        // streamType, bufferSizeDB, maxBitrate, avgBitrate
        reader.skip(12)?;
        let (media_type, codec_id) = codec_from_object_type(object_type);

        let mut extradata = None;
        if !reader.is_empty() {
            let (tag, len) = read_descr(&mut reader)?;
            if tag == MP4_DEC_SPECIFIC_DESCR_TAG {
                let len = len.min(reader.remaining());
                extradata = Some(reader.read_bytes(len)?.to_vec());
            }
        }

        Ok(Self {
            object_type,
            media_type,
            codec_id,
            extradata,
        })
    }
}

struct DescrParser<'d> {
    descrs: &'d mut Vec<Mp4Descr>,
    active: Option<usize>,
    level: usize,
    predefined_sl_seen: bool,
}

impl DescrParser<'_> {
    /// Parses one descriptor out of `reader`, which must be bounded to the
    /// enclosing descriptor. The reader is always advanced past it.
    fn parse_descr(&mut self, reader: &mut ByteReader<'_>, target_tag: Option<u8>) -> Result<()> {
        let (tag, len) = read_descr(reader)?;
        if len > reader.remaining() {
            return Err(TsError::InvalidData(format!(
                "mp4 descriptor {:#04x} length {} exceeds {} bytes left",
                tag,
                len,
                reader.remaining()
            )));
        }
        let mut body = reader.sub_reader(len)?;

        self.level += 1;
        let result = if self.level > MAX_LEVEL {
            Err(TsError::InvalidData("mp4 descriptors nested too deep".into()))
        } else if target_tag.is_some_and(|t| t != tag) {
            debug!("found mp4 descriptor tag {:#04x}, expected {:?}", tag, target_tag);
            Ok(())
        } else {
            match tag {
                MP4_IOD_DESCR_TAG => self.parse_iod(&mut body),
                MP4_OD_DESCR_TAG => self.parse_od(&mut body),
                MP4_ES_DESCR_TAG => self.parse_es(&mut body),
                MP4_DEC_CONFIG_DESCR_TAG => self.parse_dec_config(&mut body),
                MP4_SL_DESCR_TAG => self.parse_sl(&mut body),
                _ => Ok(()),
            }
        };
        self.level -= 1;
        result
    }

    fn parse_descr_arr(&mut self, reader: &mut ByteReader<'_>) -> Result<()> {
        while !reader.is_empty() {
            self.parse_descr(reader, None)?;
        }
        Ok(())
    }

    fn parse_iod(&mut self, reader: &mut ByteReader<'_>) -> Result<()> {
        // ObjectDescriptorID and flags, then five profile level indications
        reader.skip(2)?;
        reader.skip(5)?;
        self.parse_descr_arr(reader)
    }

    fn parse_od(&mut self, reader: &mut ByteReader<'_>) -> Result<()> {
        if reader.remaining() < 2 {
            return Ok(());
        }
        let id_flags = reader.read_u16()?;
        if id_flags & 0x0020 == 0 {
            self.parse_descr_arr(reader)
        } else {
            Ok(())
        }
    }

    fn parse_es(&mut self, reader: &mut ByteReader<'_>) -> Result<()> {
        if self.descrs.len() >= MAX_MP4_DESCR_COUNT {
            return Err(TsError::InvalidData("too many mp4 ES descriptors".into()));
        }
        let es_id = parse_es_descr_header(reader)?;
        self.descrs.push(Mp4Descr {
            es_id,
            ..Default::default()
        });
        self.active = Some(self.descrs.len() - 1);

        let result = self.parse_es_children(reader);
        self.active = None;
        result
    }

    fn parse_es_children(&mut self, reader: &mut ByteReader<'_>) -> Result<()> {
        self.parse_descr(reader, Some(MP4_DEC_CONFIG_DESCR_TAG))?;
        if !reader.is_empty() {
            self.parse_descr(reader, Some(MP4_SL_DESCR_TAG))?;
        }
        Ok(())
    }

    fn active(&mut self) -> Result<&mut Mp4Descr> {
        match self.active {
            Some(i) => Ok(&mut self.descrs[i]),
            None => Err(TsError::InvalidData(
                "mp4 descriptor outside of an ES descriptor".into(),
            )),
        }
    }

    fn parse_dec_config(&mut self, reader: &mut ByteReader<'_>) -> Result<()> {
        let body = reader.rest().to_vec();
        self.active()?.dec_config_descr = body;
        Ok(())
    }

    fn parse_sl(&mut self, reader: &mut ByteReader<'_>) -> Result<()> {
        self.active()?;
        let predefined = reader.read_u8()?;
        if predefined != 0 {
            if !self.predefined_sl_seen {
                debug!("predefined SLConfigDescriptor {} is not supported", predefined);
                self.predefined_sl_seen = true;
            }
            return Ok(());
        }
        let sl = SlConfig::parse_custom(reader)?;
        self.active()?.sl = sl;
        Ok(())
    }
}

/// Reads the ES_Descriptor fixed part and returns the ES_ID.
fn parse_es_descr_header(reader: &mut ByteReader<'_>) -> Result<u16> {
    let es_id = reader.read_u16()?;
    let flags = reader.read_u8()?;
    if flags & 0x80 != 0 {
        // dependsOn_ES_ID
        reader.skip(2)?;
    }
    if flags & 0x40 != 0 {
        let url_len = reader.read_u8()? as usize;
        reader.skip(url_len)?;
    }
    if flags & 0x20 != 0 {
        // OCR_ES_Id
        reader.skip(2)?;
    }
    Ok(es_id)
}

impl SlConfig {
    /// Parses the body of a custom (predefined == 0) SLConfigDescriptor.
    fn parse_custom(reader: &mut ByteReader<'_>) -> Result<Self> {
        let flags = reader.read_u8()?;
        let timestamp_res = reader.read_u32()?;
        // OCRResolution
        reader.read_u32()?;

        let clip = |v: u8, max: u32, name: &str| -> Result<u32> {
            if v as u32 > max {
                Err(TsError::InvalidData(format!("SL {} {} exceeds {}", name, v, max)))
            } else {
                Ok(v as u32)
            }
        };
        let timestamp_len = clip(reader.read_u8()?, 63, "timestamp_len")?;
        let ocr_len = clip(reader.read_u8()?, 63, "ocr_len")?;
        let au_len = clip(reader.read_u8()?, 31, "au_len")?;
        let inst_bitrate_len = reader.read_u8()? as u32;
        let lengths = reader.read_u16()? as u32;

        Ok(SlConfig {
            use_au_start: flags & 0x80 != 0,
            use_au_end: flags & 0x40 != 0,
            use_rand_acc_pt: flags & 0x20 != 0,
            use_padding: flags & 0x08 != 0,
            use_timestamps: flags & 0x04 != 0,
            use_idle: flags & 0x02 != 0,
            timestamp_res,
            timestamp_len,
            ocr_len,
            au_len,
            inst_bitrate_len,
            degr_prior_len: lengths >> 12,
            au_seq_num_len: (lengths >> 7) & 0x1f,
            packet_seq_num_len: (lengths >> 2) & 0x1f,
        })
    }
}

/// Parses an InitialObjectDescriptor and returns its ES descriptors.
///
/// Descriptors parsed before an error are kept.
pub fn read_iod(data: &[u8]) -> Vec<Mp4Descr> {
    let mut descrs = Vec::new();
    let mut parser = DescrParser {
        descrs: &mut descrs,
        active: None,
        level: 0,
        predefined_sl_seen: false,
    };
    let mut reader = ByteReader::new(data);
    if let Err(e) = parser.parse_descr(&mut reader, Some(MP4_IOD_DESCR_TAG)) {
        debug!("IOD parsing stopped: {}", e);
    }
    descrs
}

/// Timestamps and header size read from an SL packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlHeader {
    pub dts: Option<i64>,
    pub cts: Option<i64>,
    /// Bytes of payload occupied by the header.
    pub size: usize,
}

/// Reads the SL packet header at the start of `buf`. At most the first 128
/// bytes are examined.
pub fn read_sl_header(sl: &SlConfig, buf: &[u8]) -> Result<SlHeader> {
    let mut gb = BitReader::new(&buf[..buf.len().min(128)]);
    let mut au_start = false;
    let mut ocr_flag = false;
    let mut idle_flag = false;
    let mut padding_flag = false;
    let mut padding_bits = 0;
    let mut inst_bitrate_flag = false;
    let mut dts_flag = false;
    let mut cts_flag = false;
    let mut header = SlHeader::default();

    if sl.use_au_start {
        au_start = gb.read_bit()?;
    }
    if sl.use_au_end {
        gb.read_bit()?;
    }
    if !sl.use_au_start && !sl.use_au_end {
        au_start = true;
    }
    if sl.ocr_len > 0 {
        ocr_flag = gb.read_bit()?;
    }
    if sl.use_idle {
        idle_flag = gb.read_bit()?;
    }
    if sl.use_padding {
        padding_flag = gb.read_bit()?;
    }
    if padding_flag {
        padding_bits = gb.read_bits(3)?;
    }

    if !idle_flag && (!padding_flag || padding_bits != 0) {
        gb.skip_bits(sl.packet_seq_num_len)?;
        if sl.degr_prior_len > 0 && gb.read_bit()? {
            gb.skip_bits(sl.degr_prior_len)?;
        }
        if ocr_flag {
            gb.skip_bits(sl.ocr_len)?;
        }
        if au_start {
            if sl.use_rand_acc_pt {
                gb.read_bit()?;
            }
            gb.skip_bits(sl.au_seq_num_len)?;
            if sl.use_timestamps {
                dts_flag = gb.read_bit()?;
                cts_flag = gb.read_bit()?;
            }
        }
        if sl.inst_bitrate_len > 0 {
            inst_bitrate_flag = gb.read_bit()?;
        }
        if dts_flag {
            header.dts = Some(gb.read_bits_u64(sl.timestamp_len)? as i64);
        }
        if cts_flag {
            header.cts = Some(gb.read_bits_u64(sl.timestamp_len)? as i64);
        }
        gb.skip_bits(sl.au_len)?;
        if inst_bitrate_flag {
            gb.skip_bits(sl.inst_bitrate_len)?;
        }
    }

    header.size = gb.bytes_touched();
    Ok(header)
}
