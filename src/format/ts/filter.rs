use super::pes::PesFilter;
use super::section::{SectionFilter, SectionKind, CRC_VALIDITY_MAX};
use super::types::*;
use crate::error::{Result, TsError};
use crate::utils::BufferPool;
use log::debug;

/// What a PID's payload is routed to.
#[derive(Debug)]
pub enum FilterKind {
    Section(SectionFilter),
    Pes(Box<PesFilter>),
    /// Only the adaptation field is looked at.
    Pcr,
}

/// Per-PID demux state.
#[derive(Debug)]
pub struct PidFilter {
    pub pid: u16,
    pub last_cc: Option<u8>,
    /// Last PCR seen on this PID, 27 MHz.
    pub last_pcr: Option<u64>,
    pub discard: bool,
    pub kind: FilterKind,
}

impl PidFilter {
    fn new(pid: u16, kind: FilterKind) -> Self {
        Self {
            pid,
            last_cc: None,
            last_pcr: None,
            discard: false,
            kind,
        }
    }

    pub fn is_pes(&self) -> bool {
        matches!(self.kind, FilterKind::Pes(_))
    }

    pub fn section_kind(&self) -> Option<SectionKind> {
        match &self.kind {
            FilterKind::Section(s) => Some(s.kind),
            _ => None,
        }
    }

    pub fn pes(&self) -> Option<&PesFilter> {
        match &self.kind {
            FilterKind::Pes(p) => Some(&**p),
            _ => None,
        }
    }

    pub fn pes_mut(&mut self) -> Option<&mut PesFilter> {
        match &mut self.kind {
            FilterKind::Pes(p) => Some(&mut **p),
            _ => None,
        }
    }

    /// Checks `cc` against the last counter and records it.
    ///
    /// The counter only advances on packets carrying payload. The first
    /// packet, the NULL PID and packets flagged as a discontinuity always
    /// pass.
    pub fn check_continuity(&mut self, cc: u8, has_payload: bool, discontinuity: bool) -> bool {
        let ok = match self.last_cc {
            None => true,
            Some(last) => {
                let expected = if has_payload { (last + 1) & 0x0f } else { last };
                let ok = self.pid == PID_NULL || discontinuity || expected == cc;
                if !ok {
                    debug!(
                        "continuity check failed for pid {:#x} expected {} got {}",
                        self.pid, expected, cc
                    );
                }
                ok
            }
        };
        self.last_cc = Some(cc);
        ok
    }

    /// Drops physical-layer and reassembly state, as after a seek.
    fn flush(&mut self, pool: &mut BufferPool) {
        match &mut self.kind {
            FilterKind::Pes(pes) => pes.flush(pool),
            FilterKind::Section(section) => section.reset(),
            FilterKind::Pcr => {}
        }
        self.last_cc = None;
        self.last_pcr = None;
    }
}

/// Owner of the filter of every PID.
///
/// During dispatch the filter of the current PID is taken out of its slot
/// and handed back afterwards, so table handlers can open and close the
/// filters of other PIDs meanwhile.
pub struct PidFilterTable {
    slots: Vec<Option<PidFilter>>,
    crc_validity: Vec<i8>,
    taken: Option<u16>,
    taken_closed: bool,
}

impl Default for PidFilterTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PidFilterTable {
    pub fn new() -> Self {
        Self {
            slots: (0..NB_PID_MAX).map(|_| None).collect(),
            crc_validity: vec![CRC_VALIDITY_MAX; NB_PID_MAX],
            taken: None,
            taken_closed: false,
        }
    }

    fn open(&mut self, pid: u16, kind: FilterKind) -> Result<&mut PidFilter> {
        let slot = pid as usize;
        if slot >= NB_PID_MAX || self.slots[slot].is_some() || self.taken == Some(pid) {
            return Err(TsError::AlreadyFiltered(pid));
        }
        debug!("filter: pid={:#x} type={}", pid, kind_name(&kind));
        Ok(self.slots[slot].insert(PidFilter::new(pid, kind)))
    }

    pub fn open_section(&mut self, pid: u16, kind: SectionKind) -> Result<&mut PidFilter> {
        self.open(pid, FilterKind::Section(SectionFilter::new(kind)))
    }

    pub fn open_pes(&mut self, pid: u16, stream_type: u8) -> Result<&mut PidFilter> {
        self.open(pid, FilterKind::Pes(Box::new(PesFilter::new(pid, stream_type))))
    }

    pub fn open_pcr(&mut self, pid: u16) -> Result<&mut PidFilter> {
        self.open(pid, FilterKind::Pcr)
    }

    /// Frees the slot of `pid` and returns its filter. Closing the filter
    /// currently being dispatched drops it once dispatch completes.
    pub fn close(&mut self, pid: u16) -> Option<PidFilter> {
        if self.taken == Some(pid) {
            debug!("closing filter of pid {:#x} after dispatch", pid);
            self.taken_closed = true;
            return None;
        }
        let filter = self.slots.get_mut(pid as usize)?.take();
        if filter.is_some() {
            debug!("closed filter: pid={:#x}", pid);
        }
        filter
    }

    /// True when `pid` has a filter, the one being dispatched included.
    pub fn contains(&self, pid: u16) -> bool {
        (self.taken == Some(pid) && !self.taken_closed)
            || self.slots.get(pid as usize).is_some_and(|s| s.is_some())
    }

    pub fn get(&self, pid: u16) -> Option<&PidFilter> {
        self.slots.get(pid as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, pid: u16) -> Option<&mut PidFilter> {
        self.slots.get_mut(pid as usize)?.as_mut()
    }

    /// Moves the filter of `pid` out of the table for dispatch.
    pub fn take(&mut self, pid: u16) -> Option<PidFilter> {
        let filter = self.slots.get_mut(pid as usize)?.take()?;
        self.taken = Some(pid);
        self.taken_closed = false;
        Some(filter)
    }

    /// Returns a filter obtained from [`take`](Self::take). Returns `None`
    /// when it was put back, or the filter itself when it was closed
    /// meanwhile.
    pub fn restore(&mut self, filter: PidFilter) -> Option<PidFilter> {
        let closed = self.taken_closed;
        self.taken = None;
        self.taken_closed = false;
        if closed {
            return Some(filter);
        }
        let slot = filter.pid as usize;
        self.slots[slot] = Some(filter);
        None
    }

    /// Whether the filter taken for dispatch has been closed meanwhile.
    pub fn taken_closed(&self) -> bool {
        self.taken_closed
    }

    pub fn crc_validity_mut(&mut self, pid: u16) -> &mut i8 {
        &mut self.crc_validity[pid as usize & (NB_PID_MAX - 1)]
    }

    pub fn iter(&self) -> impl Iterator<Item = &PidFilter> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PidFilter> {
        self.slots.iter_mut().flatten()
    }

    /// Resets continuity, PCR and reassembly state of every filter.
    pub fn flush_all(&mut self, pool: &mut BufferPool) {
        for filter in self.slots.iter_mut().flatten() {
            filter.flush(pool);
        }
    }

    /// Closes every filter.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }
}

fn kind_name(kind: &FilterKind) -> &'static str {
    match kind {
        FilterKind::Section(_) => "section",
        FilterKind::Pes(_) => "pes",
        FilterKind::Pcr => "pcr",
    }
}
