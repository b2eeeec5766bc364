//! Builders for synthetic transport streams used by the tests.

use super::types::*;
use crate::utils::Crc32Mpeg2;
use std::collections::HashMap;

/// Encodes a 33-bit PTS/DTS field with the given 4-bit prefix.
pub fn encode_timestamp(prefix: u8, ts: i64) -> [u8; 5] {
    [
        (prefix << 4) | ((((ts >> 30) & 0x07) as u8) << 1) | 1,
        (ts >> 22) as u8,
        ((((ts >> 15) & 0x7f) as u8) << 1) | 1,
        (ts >> 7) as u8,
        (((ts & 0x7f) as u8) << 1) | 1,
    ]
}

/// A PES packet with an optional PTS and DTS. `bounded` sets
/// PES_packet_length, otherwise it is left at 0.
pub fn pes_packet(
    stream_id: u8,
    pts: Option<i64>,
    dts: Option<i64>,
    payload: &[u8],
    bounded: bool,
) -> Vec<u8> {
    let mut header = Vec::new();
    let flags = match (pts, dts) {
        (Some(_), Some(_)) => 0xc0,
        (Some(_), None) => 0x80,
        _ => 0x00,
    };
    if let Some(pts) = pts {
        header.extend_from_slice(&encode_timestamp(if dts.is_some() { 0x3 } else { 0x2 }, pts));
    }
    if let (Some(_), Some(dts)) = (pts, dts) {
        header.extend_from_slice(&encode_timestamp(0x1, dts));
    }
    let len = if bounded { 3 + header.len() + payload.len() } else { 0 };
    let mut out = vec![0, 0, 1, stream_id, (len >> 8) as u8, len as u8];
    out.extend_from_slice(&[0x80, flags, header.len() as u8]);
    out.extend_from_slice(&header);
    out.extend_from_slice(payload);
    out
}

/// A long-form PSI section with a valid CRC.
pub fn psi_section(table_id: u8, id: u16, version: u8, body: &[u8]) -> Vec<u8> {
    let len = 5 + body.len() + 4;
    let mut s = vec![table_id, 0xb0 | (len >> 8) as u8, len as u8];
    s.extend_from_slice(&id.to_be_bytes());
    s.push(0xc1 | (version & 0x1f) << 1);
    s.extend_from_slice(&[0, 0]);
    s.extend_from_slice(body);
    let crc = Crc32Mpeg2::new().calculate(&s);
    s.extend_from_slice(&crc.to_be_bytes());
    s
}

pub fn pat_section(tsid: u16, version: u8, programs: &[(u16, u16)]) -> Vec<u8> {
    let mut body = Vec::new();
    for &(program, pid) in programs {
        body.extend_from_slice(&program.to_be_bytes());
        body.extend_from_slice(&(0xe000 | pid).to_be_bytes());
    }
    psi_section(TABLE_ID_PAT, tsid, version, &body)
}

/// One PMT entry: stream_type, elementary PID and descriptor loop.
pub type PmtEntry<'a> = (u8, u16, &'a [u8]);

pub fn pmt_section(
    program: u16,
    version: u8,
    pcr_pid: u16,
    program_info: &[u8],
    entries: &[PmtEntry<'_>],
) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(0xe000 | pcr_pid).to_be_bytes());
    body.extend_from_slice(&(0xf000 | program_info.len() as u16).to_be_bytes());
    body.extend_from_slice(program_info);
    for &(stream_type, pid, descriptors) in entries {
        body.push(stream_type);
        body.extend_from_slice(&(0xe000 | pid).to_be_bytes());
        body.extend_from_slice(&(0xf000 | descriptors.len() as u16).to_be_bytes());
        body.extend_from_slice(descriptors);
    }
    psi_section(TABLE_ID_PMT, program, version, &body)
}

/// An SDT with one service descriptor per `(service_id, provider, name)`.
pub fn sdt_section(tsid: u16, version: u8, services: &[(u16, &str, &str)]) -> Vec<u8> {
    let mut body = vec![0x00, 0x01, 0xff];
    for &(service_id, provider, name) in services {
        let mut desc = vec![0x48, 0, 0x01, provider.len() as u8];
        desc.extend_from_slice(provider.as_bytes());
        desc.push(name.len() as u8);
        desc.extend_from_slice(name.as_bytes());
        desc[1] = (desc.len() - 2) as u8;

        body.extend_from_slice(&service_id.to_be_bytes());
        body.push(0xfc);
        body.extend_from_slice(&(0x8000 | desc.len() as u16).to_be_bytes());
        body.extend_from_slice(&desc);
    }
    psi_section(TABLE_ID_SDT, tsid, version, &body)
}

/// A present/following EIT for `service_id` with no events.
pub fn eit_section(service_id: u16, version: u8) -> Vec<u8> {
    psi_section(TABLE_ID_EIT_FIRST, service_id, version, &[0, 1, 0, 1, 0, 0x4e])
}

/// A descriptor: tag, length, body.
pub fn descriptor(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut d = vec![tag, body.len() as u8];
    d.extend_from_slice(body);
    d
}

/// Assembles a transport stream packet by packet, keeping a continuity
/// counter per PID.
pub struct TsBuilder {
    out: Vec<u8>,
    cc: HashMap<u16, u8>,
    raw_packet_size: usize,
}

impl Default for TsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TsBuilder {
    pub fn new() -> Self {
        Self::with_packet_size(TS_PACKET_SIZE)
    }

    /// Appends `raw_packet_size - 188` trailing bytes to every packet.
    pub fn with_packet_size(raw_packet_size: usize) -> Self {
        Self {
            out: Vec::new(),
            cc: HashMap::new(),
            raw_packet_size,
        }
    }

    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    fn next_cc(&mut self, pid: u16) -> u8 {
        let cc = self.cc.entry(pid).or_insert(0x0f);
        *cc = (*cc + 1) & 0x0f;
        *cc
    }

    fn last_cc(&self, pid: u16) -> u8 {
        self.cc.get(&pid).copied().unwrap_or(0)
    }

    /// Skips `n` continuity counter values on `pid`.
    pub fn skip_cc(&mut self, pid: u16, n: u8) {
        let cc = self.cc.entry(pid).or_insert(0x0f);
        *cc = (*cc + n) & 0x0f;
    }

    /// Appends a finished 188-byte packet plus the framing trailer.
    pub fn raw(&mut self, packet: [u8; TS_PACKET_SIZE]) -> &mut Self {
        self.out.extend_from_slice(&packet);
        let extra = self.raw_packet_size - TS_PACKET_SIZE;
        self.out.extend(std::iter::repeat(0u8).take(extra));
        self
    }

    /// Appends arbitrary bytes, such as garbage between packets.
    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.out.extend_from_slice(data);
        self
    }

    /// One packet carrying at most 184 bytes of `payload`, padded with
    /// adaptation field stuffing. Returns the number of payload bytes used.
    pub fn packet(&mut self, pid: u16, pusi: bool, payload: &[u8], flags: PacketFlags) -> usize {
        let cc = self.next_cc(pid);
        let mut packet = [0xffu8; TS_PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = (u8::from(flags.tei) << 7) | (u8::from(pusi) << 6) | (pid >> 8) as u8 & 0x1f;
        packet[2] = pid as u8;

        let mut adaptation = Vec::new();
        if flags.discontinuity || flags.pcr.is_some() {
            let mut af_flags = 0u8;
            if flags.discontinuity {
                af_flags |= 0x80;
            }
            adaptation.push(af_flags);
            if let Some(pcr) = flags.pcr {
                adaptation[0] |= 0x10;
                adaptation.extend_from_slice(&encode_pcr(pcr));
            }
        }

        let room = TS_PACKET_SIZE - TS_HEADER_SIZE;
        let used = if adaptation.is_empty() {
            payload.len().min(room)
        } else {
            payload.len().min(room - 1 - adaptation.len())
        };
        let needs_af = !adaptation.is_empty() || used < room;
        let af_len = if needs_af { room - 1 - used } else { 0 };

        packet[3] = (if needs_af { 0x30 } else { 0x10 }) | cc;
        let mut at = TS_HEADER_SIZE;
        if needs_af {
            packet[at] = af_len as u8;
            at += 1;
            if af_len > 0 {
                if adaptation.is_empty() {
                    adaptation.push(0);
                }
                packet[at..at + adaptation.len()].copy_from_slice(&adaptation);
                at += af_len;
            }
        }
        packet[at..at + used].copy_from_slice(&payload[..used]);
        self.raw(packet);
        used
    }

    /// Splits `data` over as many packets as needed, the first one flagged
    /// as a unit start.
    pub fn payload(&mut self, pid: u16, data: &[u8]) -> &mut Self {
        let mut rest = data;
        let mut first = true;
        loop {
            let used = self.packet(pid, first, rest, PacketFlags::default());
            rest = &rest[used..];
            first = false;
            if rest.is_empty() {
                break;
            }
        }
        self
    }

    /// Like [`payload`](Self::payload) but without a unit start.
    pub fn continuation(&mut self, pid: u16, data: &[u8]) -> &mut Self {
        let mut rest = data;
        while !rest.is_empty() {
            let used = self.packet(pid, false, rest, PacketFlags::default());
            rest = &rest[used..];
        }
        self
    }

    /// A section behind a zero pointer field.
    pub fn section(&mut self, pid: u16, section: &[u8]) -> &mut Self {
        let mut data = vec![0u8];
        data.extend_from_slice(section);
        self.payload(pid, &data)
    }

    pub fn pes(&mut self, pid: u16, pes: &[u8]) -> &mut Self {
        self.payload(pid, pes)
    }

    /// An adaptation-only packet carrying a 27 MHz PCR. The continuity
    /// counter does not advance.
    pub fn pcr_packet(&mut self, pid: u16, pcr: u64) -> &mut Self {
        let cc = self.last_cc(pid);
        let mut packet = [0xffu8; TS_PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = (pid >> 8) as u8 & 0x1f;
        packet[2] = pid as u8;
        packet[3] = 0x20 | cc;
        packet[4] = (TS_PACKET_SIZE - TS_HEADER_SIZE - 1) as u8;
        packet[5] = 0x10;
        packet[6..12].copy_from_slice(&encode_pcr(pcr));
        self.raw(packet)
    }

    pub fn null_packet(&mut self) -> &mut Self {
        let mut packet = [0xffu8; TS_PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = 0x1f;
        packet[2] = 0xff;
        packet[3] = 0x10;
        self.raw(packet)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }
}

/// Header and adaptation field options of a single packet.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketFlags {
    pub tei: bool,
    pub discontinuity: bool,
    pub pcr: Option<u64>,
}

fn encode_pcr(pcr: u64) -> [u8; 6] {
    let base = pcr / 300;
    let ext = pcr % 300;
    [
        (base >> 25) as u8,
        (base >> 17) as u8,
        (base >> 9) as u8,
        (base >> 1) as u8,
        ((base & 1) as u8) << 7 | 0x7e | (ext >> 8) as u8 & 0x01,
        ext as u8,
    ]
}
