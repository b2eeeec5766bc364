use super::types::*;
use crate::error::{Result, TsError};
use crate::utils::ByteReader;

/// Stateless parser for transport packet headers and PSI/SI table bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct TSPacketParser;

impl TSPacketParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_header(&self, data: &[u8]) -> Result<TSHeader> {
        if data.len() < TS_HEADER_SIZE {
            return Err(TsError::InvalidData("TS packet too short".into()));
        }

        if data[0] != SYNC_BYTE {
            return Err(TsError::InvalidData("Invalid sync byte".into()));
        }

        Ok(TSHeader {
            sync_byte: data[0],
            transport_error: (data[1] & 0x80) != 0,
            payload_unit_start: (data[1] & 0x40) != 0,
            transport_priority: (data[1] & 0x20) != 0,
            pid: (((data[1] & 0x1F) as u16) << 8) | data[2] as u16,
            scrambling_control: (data[3] >> 6) & 0x03,
            adaptation_field_exists: (data[3] & 0x20) != 0,
            contains_payload: (data[3] & 0x10) != 0,
            continuity_counter: data[3] & 0x0F,
        })
    }

    /// Offset of the payload inside `data`, past the header and any
    /// adaptation field. The offset may lie at or beyond the end of the
    /// packet when the adaptation field fills it.
    pub fn payload_offset(&self, data: &[u8]) -> usize {
        if data.len() > TS_HEADER_SIZE && (data[3] & 0x20) != 0 {
            TS_HEADER_SIZE + 1 + data[TS_HEADER_SIZE] as usize
        } else {
            TS_HEADER_SIZE
        }
    }

    pub fn parse_adaptation_field(&self, data: &[u8]) -> Result<Option<AdaptationField>> {
        let offset = TS_HEADER_SIZE;
        if data.len() <= offset || (data[3] & 0x20) == 0 {
            return Ok(None);
        }

        let adaptation_field_length = data[offset] as usize;
        if adaptation_field_length == 0 {
            return Ok(None);
        }

        if data.len() < offset + adaptation_field_length + 1 {
            return Err(TsError::InvalidData("Adaptation field too short".into()));
        }
        let end = offset + 1 + adaptation_field_length;

        let flags = data[offset + 1];
        let mut field = AdaptationField {
            length: adaptation_field_length,
            discontinuity: (flags & 0x80) != 0,
            random_access: (flags & 0x40) != 0,
            es_priority: (flags & 0x20) != 0,
            pcr_flag: (flags & 0x10) != 0,
            opcr_flag: (flags & 0x08) != 0,
            splicing_point_flag: (flags & 0x04) != 0,
            private_data_flag: (flags & 0x02) != 0,
            extension_flag: (flags & 0x01) != 0,
            ..Default::default()
        };

        let mut pos = offset + 2;

        if field.pcr_flag {
            if end < pos + 6 {
                return Err(TsError::InvalidData("PCR data too short".into()));
            }
            field.pcr = Some(read_clock_reference(&data[pos..pos + 6]));
            pos += 6;
        }

        if field.opcr_flag {
            if end < pos + 6 {
                return Err(TsError::InvalidData("OPCR data too short".into()));
            }
            field.opcr = Some(read_clock_reference(&data[pos..pos + 6]));
            pos += 6;
        }

        if field.splicing_point_flag {
            if end < pos + 1 {
                return Err(TsError::InvalidData("Splice countdown too short".into()));
            }
            field.splice_countdown = Some(data[pos] as i8);
            pos += 1;
        }

        if field.private_data_flag {
            if end < pos + 1 {
                return Err(TsError::InvalidData(
                    "Private data length byte missing".into(),
                ));
            }
            let private_data_length = data[pos] as usize;
            pos += 1;
            if end < pos + private_data_length {
                return Err(TsError::InvalidData("Private data too short".into()));
            }
            field.private_data = Some(data[pos..pos + private_data_length].to_vec());
        }
        Ok(Some(field))
    }

    /// The 27 MHz PCR of a packet, if its adaptation field carries one.
    pub fn parse_pcr(&self, data: &[u8]) -> Option<u64> {
        if data.len() < 12 || (data[3] & 0x20) == 0 {
            return None;
        }
        let len = data[4] as usize;
        if len < 7 || (data[5] & 0x10) == 0 {
            return None;
        }
        Some(read_clock_reference(&data[6..12]))
    }

    /// Reads the 8-byte long-form section header.
    pub fn parse_section_header(&self, reader: &mut ByteReader<'_>) -> Result<SectionHeader> {
        let table_id = reader.read_u8()?;
        reader.skip(2)?;
        let id = reader.read_u16()?;
        let val = reader.read_u8()?;
        let section_number = reader.read_u8()?;
        let last_section_number = reader.read_u8()?;
        Ok(SectionHeader {
            table_id,
            id,
            version: (val >> 1) & 0x1f,
            current_next: (val & 1) != 0,
            section_number,
            last_section_number,
        })
    }

    /// Parses PAT program loop entries. A truncated trailing entry ends the loop.
    pub fn parse_pat(&self, reader: &mut ByteReader<'_>) -> Vec<PATEntry> {
        let mut entries = Vec::new();
        while let (Ok(program_number), Ok(pid)) = (reader.read_u16(), reader.read_u16()) {
            entries.push(PATEntry {
                program_number,
                pid: pid & 0x1fff,
            });
        }
        entries
    }

    /// Parses a PMT body. Elementary stream entries are read until one is
    /// truncated or its descriptor loop overruns the section.
    pub fn parse_pmt<'a>(&self, reader: &mut ByteReader<'a>) -> Result<PMT<'a>> {
        let pcr_pid = reader.read_u16()? & 0x1fff;
        let program_info_length = (reader.read_u16()? & 0xfff) as usize;
        let program_info = reader.read_bytes(program_info_length)?;

        let mut pmt = PMT {
            pcr_pid,
            program_info,
            elementary_stream_infos: Vec::new(),
        };

        while pmt.elementary_stream_infos.len() < MAX_STREAMS_PER_PROGRAM {
            let Ok(stream_type) = reader.read_u8() else {
                break;
            };
            let Ok(pid) = reader.read_u16() else {
                break;
            };
            let Ok(es_info_length) = reader.read_u16() else {
                break;
            };
            let Ok(descriptors) = reader.read_bytes((es_info_length & 0xfff) as usize) else {
                break;
            };
            pmt.elementary_stream_infos.push(ElementaryStreamInfo {
                stream_type,
                elementary_pid: pid & 0x1fff,
                descriptors,
            });
        }

        Ok(pmt)
    }

    /// Parses the SDT service loop that follows the section header.
    pub fn parse_sdt(&self, reader: &mut ByteReader<'_>) -> Result<Vec<SDTService>> {
        let _original_network_id = reader.read_u16()?;
        reader.read_u8()?;

        let mut services = Vec::new();
        loop {
            let Ok(service_id) = reader.read_u16() else {
                break;
            };
            if reader.read_u8().is_err() {
                break;
            }
            let Ok(desc_list_len) = reader.read_u16() else {
                break;
            };
            let Ok(desc_list) = reader.read_bytes((desc_list_len & 0xfff) as usize) else {
                break;
            };

            let mut service = SDTService {
                service_id,
                ..Default::default()
            };
            for descriptor in DescriptorIter::new(desc_list) {
                let Ok((tag, body)) = descriptor else {
                    break;
                };
                if tag != 0x48 {
                    continue;
                }
                let mut body = ByteReader::new(body);
                let Ok(service_type) = body.read_u8() else {
                    break;
                };
                let Ok(provider) = body.read_str8() else {
                    break;
                };
                service.service_type = Some(service_type);
                service.provider_name = Some(decode_dvb_string(provider));
                service.service_name = body.read_str8().ok().map(decode_dvb_string);
            }
            services.push(service);
        }
        Ok(services)
    }
}

/// Decodes a 48-bit clock reference field into 27 MHz units.
fn read_clock_reference(b: &[u8]) -> u64 {
    let base = ((b[0] as u64) << 25)
        | ((b[1] as u64) << 17)
        | ((b[2] as u64) << 9)
        | ((b[3] as u64) << 1)
        | ((b[4] & 0x80) as u64 >> 7);
    let ext = (((b[4] & 0x01) as u64) << 8) | (b[5] as u64);
    base * 300 + ext
}

/// Decodes a DVB SI text field, dropping any leading character table selector.
pub fn decode_dvb_string(raw: &[u8]) -> String {
    let text = match raw.first() {
        Some(0x10) => raw.get(3..).unwrap_or_default(),
        Some(&b) if b < 0x20 => &raw[1..],
        _ => raw,
    };
    String::from_utf8_lossy(text).into_owned()
}

/// Iterator over `(tag, body)` pairs of a descriptor loop.
///
/// A descriptor whose length runs past the loop yields one error and ends
/// the iteration, so no body ever extends past the end of the loop.
#[derive(Debug, Clone)]
pub struct DescriptorIter<'a> {
    reader: ByteReader<'a>,
    failed: bool,
}

impl<'a> DescriptorIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            reader: ByteReader::new(data),
            failed: false,
        }
    }
}

impl<'a> DescriptorIter<'a> {
    fn read_descriptor(&mut self) -> Result<(u8, &'a [u8])> {
        let tag = self.reader.read_u8()?;
        let len = self.reader.read_u8()? as usize;
        let body = self.reader.read_bytes(len)?;
        Ok((tag, body))
    }
}

impl<'a> Iterator for DescriptorIter<'a> {
    type Item = Result<(u8, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.is_empty() {
            return None;
        }
        let item = self.read_descriptor();
        if item.is_err() {
            self.failed = true;
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_ts_header() {
        let parser = TSPacketParser::new();
        let data = [
            0x47, // Sync byte
            0x40, // Payload unit start indicator set
            0x00, // PID (high bits)
            0x10, // Payload only, cc 0
        ];

        let header = parser.parse_header(&data).unwrap();
        assert_eq!(header.sync_byte, 0x47);
        assert!(header.payload_unit_start);
        assert_eq!(header.pid, 0);
        assert_eq!(header.continuity_counter, 0);
        assert_eq!(header.adaptation_field_control(), 1);
        assert!(parser.parse_header(&[0x46, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_parse_pcr() {
        let parser = TSPacketParser::new();
        let mut data = vec![0xffu8; TS_PACKET_SIZE];
        data[..4].copy_from_slice(&[0x47, 0x01, 0x01, 0x20]);
        data[4] = 183;
        data[5] = 0x10;
        // base = 90000 (one second), ext = 0
        let base: u64 = 90_000;
        data[6] = (base >> 25) as u8;
        data[7] = (base >> 17) as u8;
        data[8] = (base >> 9) as u8;
        data[9] = (base >> 1) as u8;
        data[10] = (((base & 1) << 7) as u8) | 0x7e;
        data[11] = 0;

        assert_eq!(parser.parse_pcr(&data), Some(27_000_000));
        let af = parser.parse_adaptation_field(&data).unwrap().unwrap();
        assert_eq!(af.pcr, Some(27_000_000));
        assert!(!af.discontinuity);
        assert_eq!(parser.payload_offset(&data), TS_PACKET_SIZE);
    }

    #[test]
    fn test_parse_pat() {
        let parser = TSPacketParser::new();
        let data = [
            0x00, 0x01, // Program number
            0xf0, 0x00, // PID
            0x00, 0x02, // Program number
            0xe2, 0x00, // PID
            0x00, // truncated entry
        ];

        let entries = parser.parse_pat(&mut ByteReader::new(&data));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].program_number, 1);
        assert_eq!(entries[0].pid, 0x1000);
        assert_eq!(entries[1].program_number, 2);
        assert_eq!(entries[1].pid, 0x0200);
    }

    #[test]
    fn test_parse_pmt_stops_at_overrun() {
        let parser = TSPacketParser::new();
        let data = [
            0xe1, 0x01, // PCR PID
            0xf0, 0x00, // no program info
            0x1b, 0xe1, 0x01, 0xf0, 0x03, 0x52, 0x01, 0x07, // H.264 + stream identifier
            0x0f, 0xe1, 0x02, 0xf0, 0x09, 0x0a, // AAC with an overrunning loop
        ];
        let pmt = parser.parse_pmt(&mut ByteReader::new(&data)).unwrap();
        assert_eq!(pmt.pcr_pid, 0x101);
        assert_eq!(pmt.elementary_stream_infos.len(), 1);
        assert_eq!(pmt.elementary_stream_infos[0].descriptors, &[0x52, 0x01, 0x07]);
    }

    #[test]
    fn test_descriptor_iter_is_bounded() {
        let data = [0x52, 0x01, 0x07, 0x0a, 0x08, b'e'];
        let items: Vec<_> = DescriptorIter::new(&data).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &(0x52, &[0x07][..]));
        assert!(items[1].is_err());
    }

    #[test]
    fn test_dvb_strings() {
        assert_eq!(decode_dvb_string(b"\x05News"), "News");
        assert_eq!(decode_dvb_string(b"\x10\x00\x01Sport"), "Sport");
        assert_eq!(decode_dvb_string(b"Plain"), "Plain");
    }
}
