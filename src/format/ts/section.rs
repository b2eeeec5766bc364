use super::types::MAX_SECTION_SIZE;
use crate::utils::Crc32Mpeg2;
use bytes::Bytes;
use log::warn;

/// Initial and reset value of the per-PID CRC trust counter.
pub const CRC_VALIDITY_MAX: i8 = 100;
/// Once the counter has decayed to this value, sections are delivered
/// even with a bad CRC.
pub const CRC_VALIDITY_MIN: i8 = -10;

/// Which table handler a section filter feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Pat,
    Pmt,
    Sdt,
    Eit,
    /// SCTE-35 splice information on a PMT-announced PID.
    Scte35,
}

/// A complete section cut out of the filter buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// The whole section including its CRC.
    pub data: Bytes,
    /// CRC_32 field of the section.
    pub crc: u32,
    /// Delivered despite a CRC failure because the PID's trust counter ran out.
    pub crc_forced: bool,
}

/// Reassembles PSI/SI sections from transport packet payloads.
#[derive(Debug, Clone)]
pub struct SectionFilter {
    pub kind: SectionKind,
    buf: Vec<u8>,
    h_size: Option<usize>,
    end_of_section_reached: bool,
    check_crc: bool,
    dedup: bool,
    last_ver: Option<u8>,
    last_crc: u32,
    crc32: Crc32Mpeg2,
}

impl SectionFilter {
    pub fn new(kind: SectionKind) -> Self {
        Self {
            kind,
            buf: Vec::with_capacity(MAX_SECTION_SIZE),
            h_size: None,
            end_of_section_reached: false,
            check_crc: true,
            // EIT and SCTE-35 sections are forwarded as data, repeats included
            dedup: !matches!(kind, SectionKind::Eit | SectionKind::Scte35),
            last_ver: None,
            last_crc: 0,
            crc32: Crc32Mpeg2::new(),
        }
    }

    pub fn with_check_crc(mut self, check_crc: bool) -> Self {
        self.check_crc = check_crc;
        self
    }

    /// Feeds one payload fragment. `is_start` restarts assembly at offset 0;
    /// continuation data is appended up to [`MAX_SECTION_SIZE`] bytes.
    ///
    /// `crc_validity` is the trust counter of the PID this filter serves.
    /// Returns every section completed by this fragment.
    pub fn write(&mut self, data: &[u8], is_start: bool, crc_validity: &mut i8) -> Vec<Section> {
        let mut out = Vec::new();

        if is_start {
            self.buf.clear();
            let len = data.len().min(MAX_SECTION_SIZE);
            self.buf.extend_from_slice(&data[..len]);
            self.h_size = None;
            self.end_of_section_reached = false;
        } else {
            if self.end_of_section_reached {
                return out;
            }
            let len = (MAX_SECTION_SIZE - self.buf.len()).min(data.len());
            self.buf.extend_from_slice(&data[..len]);
        }

        let mut offset = 0;
        while offset < self.buf.len() && self.buf[offset] != 0xff {
            if self.h_size.is_none() && self.buf.len() - offset >= 3 {
                let len = (u16::from_be_bytes([self.buf[offset + 1], self.buf[offset + 2]]) & 0xfff)
                    as usize
                    + 3;
                if offset + len > MAX_SECTION_SIZE {
                    return out;
                }
                self.h_size = Some(len);
            }

            let Some(h_size) = self.h_size.filter(|&h| self.buf.len() >= offset + h) else {
                self.h_size = None;
                self.end_of_section_reached = false;
                break;
            };

            self.end_of_section_reached = true;
            let section = &self.buf[offset..offset + h_size];
            let crc = if h_size >= 4 {
                u32::from_be_bytes([
                    section[h_size - 4],
                    section[h_size - 3],
                    section[h_size - 2],
                    section[h_size - 1],
                ])
            } else {
                0
            };

            let mut deliver = true;
            let mut crc_forced = false;
            if self.check_crc {
                if self.crc32.verify(section) {
                    *crc_validity = CRC_VALIDITY_MAX;
                } else if *crc_validity > CRC_VALIDITY_MIN {
                    *crc_validity -= 1;
                    warn!(
                        "{:?} section CRC mismatch, dropped (validity {})",
                        self.kind, crc_validity
                    );
                    deliver = false;
                } else {
                    crc_forced = true;
                }
            }
            if deliver {
                out.push(Section {
                    data: Bytes::copy_from_slice(section),
                    crc,
                    crc_forced,
                });
            }

            offset += h_size;
            self.h_size = None;
        }
        // delivered sections are not scanned again by the next continuation
        self.buf.drain(..offset);
        out
    }

    /// Returns true when this (version, crc) pair was the last one handled,
    /// otherwise remembers it.
    pub fn skip_identical(&mut self, version: u8, crc: u32) -> bool {
        if !self.dedup {
            return false;
        }
        if self.last_ver == Some(version) && self.last_crc == crc {
            return true;
        }
        self.last_ver = Some(version);
        self.last_crc = crc;
        false
    }

    /// Forgets the last handled version so the next section is processed
    /// whatever its version.
    pub fn forget_version(&mut self) {
        self.last_ver = None;
    }

    /// Drops any partially assembled section.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.h_size = None;
        self.end_of_section_reached = false;
    }
}
