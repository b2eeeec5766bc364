use bytes::{BufMut, BytesMut};
use std::time::Duration;

// PIDs
pub const PID_PAT: u16 = 0x0000;
pub const PID_SDT: u16 = 0x0011;
pub const PID_EIT: u16 = 0x0012;
pub const PID_NULL: u16 = 0x1fff;
pub const NB_PID_MAX: usize = 8192;

// Table IDs
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_PMT: u8 = 0x02;
pub const TABLE_ID_SDT: u8 = 0x42;
pub const TABLE_ID_EIT_FIRST: u8 = 0x4e;
pub const TABLE_ID_EIT_LAST: u8 = 0x6f;

// Elementary stream types that need special handling
pub const STREAM_TYPE_PRIVATE_DATA: u8 = 0x06;
pub const STREAM_TYPE_MPEG4_SL: u8 = 0x12;
pub const STREAM_TYPE_DSMCC_B: u8 = 0x13;
pub const STREAM_TYPE_METADATA: u8 = 0x15;
pub const STREAM_TYPE_H264: u8 = 0x1b;
pub const STREAM_TYPE_HEVC: u8 = 0x24;
pub const STREAM_TYPE_AAC: u8 = 0x0f;
pub const STREAM_TYPE_BLURAY_TRUEHD: u8 = 0x83;
pub const STREAM_TYPE_SCTE35: u8 = 0x86;

// PES stream ids
pub const STREAM_ID_PROGRAM_STREAM_MAP: u8 = 0xbc;
pub const STREAM_ID_PADDING_STREAM: u8 = 0xbe;
pub const STREAM_ID_PRIVATE_STREAM_2: u8 = 0xbf;
pub const STREAM_ID_ECM_STREAM: u8 = 0xf0;
pub const STREAM_ID_EMM_STREAM: u8 = 0xf1;
pub const STREAM_ID_DSMCC_STREAM: u8 = 0xf2;
pub const STREAM_ID_TYPE_E_STREAM: u8 = 0xf8;
pub const STREAM_ID_METADATA_STREAM: u8 = 0xfc;
pub const STREAM_ID_PROGRAM_STREAM_DIRECTORY: u8 = 0xff;

// Sizes
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_DVHS_PACKET_SIZE: usize = 192;
pub const TS_FEC_PACKET_SIZE: usize = 204;
pub const TS_HEADER_SIZE: usize = 4;
pub const SYNC_BYTE: u8 = 0x47;
pub const MAX_SECTION_SIZE: usize = 4096;
pub const PES_START_SIZE: usize = 6;
pub const PES_HEADER_SIZE: usize = 9;
pub const MAX_PES_HEADER_SIZE: usize = 9 + 255;
pub const MAX_STREAMS_PER_PROGRAM: usize = 128;
pub const MAX_PIDS_PER_PROGRAM: usize = MAX_STREAMS_PER_PROGRAM + 2;

pub const PTS_HZ: u64 = 90_000;
pub const PCR_HZ: u64 = 27_000_000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdaptationField {
    pub length: usize,
    pub discontinuity: bool,
    pub random_access: bool,
    pub es_priority: bool,
    pub pcr_flag: bool,
    pub opcr_flag: bool,
    pub splicing_point_flag: bool,
    pub private_data_flag: bool,
    pub extension_flag: bool,
    /// 27 MHz program clock reference (`base * 300 + ext`).
    pub pcr: Option<u64>,
    pub opcr: Option<u64>,
    pub splice_countdown: Option<i8>,
    pub private_data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TSHeader {
    pub sync_byte: u8, // Always 0x47
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub transport_priority: bool,
    pub pid: u16,
    pub scrambling_control: u8,
    pub adaptation_field_exists: bool,
    pub contains_payload: bool,
    pub continuity_counter: u8,
}

impl Default for TSHeader {
    fn default() -> Self {
        Self {
            sync_byte: SYNC_BYTE,
            transport_error: false,
            payload_unit_start: false,
            transport_priority: false,
            pid: 0,
            scrambling_control: 0,
            adaptation_field_exists: false,
            contains_payload: true,
            continuity_counter: 0,
        }
    }
}

impl TSHeader {
    /// Value of the 2-bit adaptation_field_control field.
    pub fn adaptation_field_control(&self) -> u8 {
        (u8::from(self.adaptation_field_exists) << 1) | u8::from(self.contains_payload)
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.sync_byte);

        let mut b1 = 0u8;
        if self.transport_error {
            b1 |= 0x80;
        }
        if self.payload_unit_start {
            b1 |= 0x40;
        }
        if self.transport_priority {
            b1 |= 0x20;
        }
        b1 |= ((self.pid >> 8) & 0x1f) as u8;
        buf.put_u8(b1);

        buf.put_u8((self.pid & 0xff) as u8);

        let mut b3 = self.scrambling_control << 6;
        if self.adaptation_field_exists {
            b3 |= 0x20;
        }
        if self.contains_payload {
            b3 |= 0x10;
        }
        b3 |= self.continuity_counter & 0x0f;
        buf.put_u8(b3);
    }
}

/// Common header fields of a long-form PSI/SI section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub table_id: u8,
    /// transport_stream_id, program_number or service_id depending on the table.
    pub id: u16,
    pub version: u8,
    pub current_next: bool,
    pub section_number: u8,
    pub last_section_number: u8,
}

/// One program_number to PID mapping of a PAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PATEntry {
    pub program_number: u16,
    /// PMT PID, or the network PID when `program_number` is 0.
    pub pid: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementaryStreamInfo<'a> {
    pub stream_type: u8,
    pub elementary_pid: u16,
    /// Raw ES_info descriptor loop.
    pub descriptors: &'a [u8],
}

/// Body of a PMT section, borrowed from the section buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PMT<'a> {
    pub pcr_pid: u16,
    pub program_info: &'a [u8],
    pub elementary_stream_infos: Vec<ElementaryStreamInfo<'a>>,
}

/// One service of an SDT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SDTService {
    pub service_id: u16,
    pub service_type: Option<u8>,
    pub provider_name: Option<String>,
    pub service_name: Option<String>,
}

// Time conversion utilities

/// Converts a 27 MHz clock value to 90 kHz ticks.
pub fn pcr_to_pts(pcr: u64) -> i64 {
    (pcr / 300) as i64
}

pub fn pcr_to_time(pcr: u64) -> Duration {
    Duration::from_nanos(((pcr as u128 * 1_000_000_000) / PCR_HZ as u128) as u64)
}

pub fn pts_to_time(pts: u64) -> Duration {
    Duration::from_nanos(((pts as u128 * 1_000_000_000) / PTS_HZ as u128) as u64)
}

pub fn time_to_pts(time: Duration) -> u64 {
    (time.as_nanos() * PTS_HZ as u128 / 1_000_000_000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_header_write() {
        let header = TSHeader {
            payload_unit_start: true,
            pid: 0x101,
            adaptation_field_exists: true,
            continuity_counter: 7,
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        header.write_to(&mut buf);
        assert_eq!(&buf[..], &[0x47, 0x41, 0x01, 0x37]);
        assert_eq!(header.adaptation_field_control(), 3);
    }

    #[test]
    fn test_time_conversions() {
        assert_eq!(pcr_to_pts(27_000_000), 90_000);
        assert_eq!(pcr_to_time(27_000_000), Duration::from_secs(1));
        assert_eq!(pts_to_time(45_000), Duration::from_millis(500));
        assert_eq!(time_to_pts(Duration::from_secs(2)), 180_000);
    }
}
