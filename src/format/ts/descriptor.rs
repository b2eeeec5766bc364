//! PMT elementary stream descriptors.
//!
//! Each descriptor is turned into a [`StreamPatch`] computed from the
//! descriptor body and the current state of the stream, then applied. The
//! body handed to [`parse_descriptor`] is already cut to the descriptor
//! length, so no case can read past it.

use super::mp4::{DecoderConfig, Mp4Descr, SlConfig};
use super::parser::DescriptorIter;
use super::stream_type::{find_stream_type, DESC_TYPES, METADATA_TYPES, REGD_TYPES};
use super::types::STREAM_TYPE_PRIVATE_DATA;
use crate::av::{fourcc, CodecId, Disposition, DoviConfig, MediaType, Profile, Stream};
use crate::error::{Result, TsError};
use crate::utils::ByteReader;
use bytes::Bytes;
use log::{debug, trace};

pub const VIDEO_STREAM_DESCRIPTOR: u8 = 0x02;
pub const REGISTRATION_DESCRIPTOR: u8 = 0x05;
pub const ISO_639_LANGUAGE_DESCRIPTOR: u8 = 0x0a;
pub const IOD_DESCRIPTOR: u8 = 0x1d;
pub const SL_DESCRIPTOR: u8 = 0x1e;
pub const FMC_DESCRIPTOR: u8 = 0x1f;
pub const METADATA_DESCRIPTOR: u8 = 0x26;
pub const STREAM_IDENTIFIER_DESCRIPTOR: u8 = 0x52;
pub const TELETEXT_DESCRIPTOR: u8 = 0x56;
pub const SUBTITLING_DESCRIPTOR: u8 = 0x59;
pub const AC3_DESCRIPTOR: u8 = 0x6a;
pub const ENHANCED_AC3_DESCRIPTOR: u8 = 0x7a;
pub const EXTENSION_DESCRIPTOR: u8 = 0x7f;
pub const DOVI_VIDEO_STREAM_DESCRIPTOR: u8 = 0xb0;
pub const ARIB_DATA_CODING_DESCRIPTOR: u8 = 0xfd;

const SUPPLEMENTARY_AUDIO_DESCRIPTOR: u8 = 0x06;

/// A language to attach to a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguagePatch {
    pub value: String,
    /// ISO 639 descriptors do not replace a language set by a more
    /// specific descriptor.
    pub overwrite: bool,
}

/// Changes one descriptor makes to a stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamPatch {
    pub codec: Option<(MediaType, CodecId)>,
    pub codec_tag: Option<u32>,
    pub language: Option<LanguagePatch>,
    pub disposition: Disposition,
    pub stream_identifier: Option<u8>,
    pub extradata: Option<Bytes>,
    pub dovi: Option<DoviConfig>,
    pub profile: Option<Profile>,
    pub sl: Option<SlConfig>,
    /// ES_ID referenced by an SL descriptor.
    pub es_id: Option<u16>,
}

impl StreamPatch {
    pub fn is_empty(&self) -> bool {
        *self == StreamPatch::default()
    }

    pub fn apply(self, stream: &mut Stream) {
        if let Some((media_type, codec_id)) = self.codec {
            stream.set_codec(media_type, codec_id);
        }
        if let Some(tag) = self.codec_tag {
            stream.codec_tag = tag;
        }
        if let Some(language) = self.language {
            if language.overwrite || stream.language.is_none() {
                stream.language = Some(language.value);
            }
        }
        stream.disposition.merge(self.disposition);
        if self.stream_identifier.is_some() {
            stream.stream_identifier = self.stream_identifier;
        }
        if self.extradata.is_some() {
            stream.extradata = self.extradata;
        }
        if self.dovi.is_some() {
            stream.dovi = self.dovi;
        }
        if self.profile.is_some() {
            stream.profile = self.profile;
        }
        if self.sl.is_some() {
            stream.sl = self.sl;
        }
    }
}

fn invalid(what: &str) -> TsError {
    TsError::InvalidData(format!("{} descriptor: bad length", what))
}

fn read_language(reader: &mut ByteReader<'_>) -> Result<String> {
    Ok(String::from_utf8_lossy(reader.read_bytes(3)?).into_owned())
}

/// Computes the effect of one descriptor on `stream`.
///
/// `pid` is the elementary PID of the entry and `mp4_descrs` the ES
/// descriptors of the program's IOD.
pub fn parse_descriptor(
    stream: &Stream,
    stream_type: u8,
    tag: u8,
    body: &[u8],
    mp4_descrs: &[Mp4Descr],
    pid: u16,
) -> Result<StreamPatch> {
    trace!("tag: {:#04x} len={}", tag, body.len());
    let mut patch = StreamPatch::default();
    let mut codec_id = stream.codec_id;

    if codec_id == CodecId::None && stream_type == STREAM_TYPE_PRIVATE_DATA {
        if let Some(found) = find_stream_type(DESC_TYPES, tag as u32) {
            patch.codec = Some(found);
            codec_id = found.1;
        }
    }

    let mut r = ByteReader::new(body);
    match tag {
        VIDEO_STREAM_DESCRIPTOR => {
            if r.read_u8()? & 0x01 != 0 {
                patch.disposition.still_image = true;
            }
        }
        SL_DESCRIPTOR => {
            let Ok(es_id) = r.read_u16() else {
                return Ok(patch);
            };
            patch.es_id = Some(es_id);
            if let Some(descr) = mp4_descrs
                .iter()
                .find(|d| !d.dec_config_descr.is_empty() && d.es_id == es_id)
            {
                apply_decoder_config(&mut patch, descr)?;
            }
        }
        FMC_DESCRIPTOR => {
            if r.read_u16().is_err() {
                return Ok(patch);
            }
            if let Some(descr) = mp4_descrs.first() {
                let applicable = matches!(codec_id, CodecId::AacLatm | CodecId::None);
                if applicable && !descr.dec_config_descr.is_empty() && descr.es_id == pid {
                    apply_decoder_config(&mut patch, descr)?;
                }
            }
        }
        TELETEXT_DESCRIPTOR => {
            if body.len() % 5 != 0 {
                return Err(invalid("teletext"));
            }
            if !body.is_empty() {
                // language, then the 2-byte page type/magazine/page field
                let mut languages = Vec::with_capacity(body.len() / 5);
                let mut extradata = Vec::with_capacity(body.len() / 5 * 2);
                while !r.is_empty() {
                    languages.push(read_language(&mut r)?);
                    extradata.extend_from_slice(r.read_bytes(2)?);
                }
                patch.language = Some(LanguagePatch {
                    value: languages.join(","),
                    overwrite: true,
                });
                patch.extradata = Some(Bytes::from(extradata));
            }
        }
        SUBTITLING_DESCRIPTOR => {
            if body.len() % 8 != 0 {
                return Err(invalid("subtitling"));
            }
            if body.len() > 8 {
                debug!("DVB subtitles with multiple languages");
            }
            if !body.is_empty() {
                let mut languages = Vec::with_capacity(body.len() / 8);
                let mut extradata = Vec::with_capacity(body.len() / 8 * 5);
                while !r.is_empty() {
                    languages.push(read_language(&mut r)?);
                    let subtitling_type = r.read_u8()?;
                    // DVB subtitles for the hard of hearing
                    if (0x20..=0x25).contains(&subtitling_type) {
                        patch.disposition.hearing_impaired = true;
                    }
                    // composition_page_id and ancillary_page_id, then the type
                    extradata.extend_from_slice(r.read_bytes(4)?);
                    extradata.push(subtitling_type);
                }
                patch.language = Some(LanguagePatch {
                    value: languages.join(","),
                    overwrite: true,
                });
                patch.extradata = Some(Bytes::from(extradata));
            }
        }
        ISO_639_LANGUAGE_DESCRIPTOR => {
            let mut languages = Vec::new();
            while r.remaining() >= 4 {
                languages.push(read_language(&mut r)?);
                match r.read_u8()? {
                    0x01 => patch.disposition.clean_effects = true,
                    0x02 => patch.disposition.hearing_impaired = true,
                    0x03 => {
                        patch.disposition.visual_impaired = true;
                        patch.disposition.descriptions = true;
                    }
                    _ => {}
                }
            }
            if languages.first().is_some_and(|l| !l.starts_with('\0')) {
                patch.language = Some(LanguagePatch {
                    value: languages.join(","),
                    overwrite: false,
                });
            }
        }
        REGISTRATION_DESCRIPTOR => {
            let tag = fourcc(&r.read_fourcc()?);
            trace!("reg_desc={}", String::from_utf8_lossy(&tag.to_le_bytes()));
            patch.codec_tag = Some(tag);
            if codec_id == CodecId::None {
                if let Some(found) = find_stream_type(REGD_TYPES, tag) {
                    patch.codec = Some(found);
                }
            }
        }
        STREAM_IDENTIFIER_DESCRIPTOR => {
            patch.stream_identifier = Some(r.read_u8()?);
        }
        METADATA_DESCRIPTOR => {
            if r.read_u16()? == 0xffff {
                r.skip(4)?;
            }
            if r.read_u8()? == 0xff {
                let tag = fourcc(&r.read_fourcc()?);
                patch.codec_tag = Some(tag);
                if codec_id == CodecId::None {
                    if let Some(found) = find_stream_type(METADATA_TYPES, tag) {
                        patch.codec = Some(found);
                    }
                }
            }
        }
        EXTENSION_DESCRIPTOR => {
            let ext_tag = r.read_u8()?;
            if ext_tag == SUPPLEMENTARY_AUDIO_DESCRIPTOR {
                let flags = r.read_u8().map_err(|_| invalid("supplementary audio"))?;
                // mix_type
                if flags & 0x80 == 0 {
                    patch.disposition.dependent = true;
                }
                match (flags >> 2) & 0x1f {
                    0x01 => {
                        patch.disposition.visual_impaired = true;
                        patch.disposition.descriptions = true;
                    }
                    0x02 => patch.disposition.hearing_impaired = true,
                    0x03 => patch.disposition.visual_impaired = true,
                    _ => {}
                }
                if flags & 0x01 != 0 {
                    let language = read_language(&mut r).map_err(|_| invalid("supplementary audio"))?;
                    if !language.starts_with('\0') {
                        patch.language = Some(LanguagePatch {
                            value: language,
                            overwrite: true,
                        });
                    }
                }
            }
        }
        AC3_DESCRIPTOR | ENHANCED_AC3_DESCRIPTOR => {
            if r.read_u8()? & 0x80 != 0 {
                let component_type = r.read_u8()?;
                // service_type 0b010 is a visually impaired mix
                if (component_type & 0x38) >> 3 == 0x02 {
                    patch.disposition.descriptions = true;
                    debug!("stream {} (pid {:#x}) carries audio descriptions", stream.index, pid);
                }
            }
        }
        ARIB_DATA_CODING_DESCRIPTOR if stream_type == STREAM_TYPE_PRIVATE_DATA => {
            let data_component_id = r.read_u16()?;
            let component_tag = stream.stream_identifier;
            let profile = match (data_component_id, component_tag) {
                (0x0008, Some(0x30..=0x37)) => Some(Profile::AribProfileA),
                (0x0012, Some(0x87)) => Some(Profile::AribProfileC),
                _ => None,
            };
            if let Some(profile) = profile {
                patch.codec = Some((MediaType::Subtitle, CodecId::AribCaption));
                patch.profile = Some(profile);
            }
        }
        DOVI_VIDEO_STREAM_DESCRIPTOR => {
            if body.len() < 4 {
                return Err(invalid("dolby vision"));
            }
            let version_major = r.read_u8()?;
            let version_minor = r.read_u8()?;
            let buf = r.read_u16()?;
            let mut dovi = DoviConfig {
                version_major,
                version_minor,
                profile: ((buf >> 9) & 0x7f) as u8,
                level: ((buf >> 3) & 0x3f) as u8,
                rpu_present: (buf >> 2) & 0x01 != 0,
                el_present: (buf >> 1) & 0x01 != 0,
                bl_present: buf & 0x01 != 0,
                ..Default::default()
            };
            if !dovi.bl_present && r.remaining() >= 2 {
                dovi.dependency_pid = Some(r.read_u16()? >> 3);
            }
            if let Ok(b) = r.read_u8() {
                dovi.bl_signal_compatibility_id = (b >> 4) & 0x0f;
                dovi.md_compression = (b >> 2) & 0x03;
            }
            patch.dovi = Some(dovi);
        }
        _ => {}
    }
    Ok(patch)
}

fn apply_decoder_config(patch: &mut StreamPatch, descr: &Mp4Descr) -> Result<()> {
    let config = DecoderConfig::parse(&descr.dec_config_descr)?;
    debug!(
        "ES_ID {} object type {:#04x} -> {:?}",
        descr.es_id, config.object_type, config.codec_id
    );
    if config.codec_id != CodecId::None {
        patch.codec = Some((config.media_type, config.codec_id));
    }
    if let Some(extradata) = config.extradata {
        patch.extradata = Some(Bytes::from(extradata));
    }
    patch.sl = Some(descr.sl);
    Ok(())
}

/// Returns the component tag of the first stream identifier descriptor of
/// a descriptor loop.
pub fn find_stream_identifier(descriptors: &[u8]) -> Option<u8> {
    DescriptorIter::new(descriptors)
        .map_while(|d| d.ok())
        .find(|(tag, body)| *tag == STREAM_IDENTIFIER_DESCRIPTOR && !body.is_empty())
        .map(|(_, body)| body[0])
}

/// Applies a whole descriptor loop to `stream`. Parsing stops at the first
/// malformed descriptor, keeping the effects of the ones before it.
pub fn apply_descriptors(
    stream: &mut Stream,
    stream_type: u8,
    descriptors: &[u8],
    mp4_descrs: &[Mp4Descr],
    pid: u16,
) {
    for descriptor in DescriptorIter::new(descriptors) {
        let patch = match descriptor {
            Ok((tag, body)) => parse_descriptor(stream, stream_type, tag, body, mp4_descrs, pid),
            Err(e) => Err(e),
        };
        match patch {
            Ok(patch) => patch.apply(stream),
            Err(e) => {
                debug!("pid {:#x}: {}", pid, e);
                break;
            }
        }
    }
}

/// Registration tag of a program descriptor loop, little-endian.
pub fn program_registration(program_info: &[u8]) -> Option<u32> {
    let mut tag = None;
    for (t, body) in DescriptorIter::new(program_info).map_while(|d| d.ok()) {
        if t == REGISTRATION_DESCRIPTOR && body.len() >= 4 {
            tag = Some(fourcc(&[body[0], body[1], body[2], body[3]]));
        }
    }
    tag
}
