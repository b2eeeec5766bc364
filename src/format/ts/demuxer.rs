use super::filter::{FilterKind, PidFilter, PidFilterTable};
use super::parser::TSPacketParser;
use super::pes::PesContext;
use super::program::{stream_discarded, Program, ProgramRegistry};
use super::section::SectionKind;
use super::stream_type::{media_type_from_stream_id, set_stream_info};
use super::types::*;
use crate::av::{CodecData, CodecId, Packet, Stream};
use crate::config::{self, DemuxConfig};
use crate::error::{Result, TsError};
use crate::format::Demuxer;
use crate::utils::BufferPool;
use async_trait::async_trait;
use log::{debug, info, trace, warn};
use std::collections::{HashMap, VecDeque};
use tokio::io::{AsyncRead, AsyncSeek};

use super::reader::PacketReader;

/// A timestamp and the byte offset of the packet that carried it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub pos: u64,
    pub timestamp: i64,
}

/// Everything the demuxer knows about the transport stream, independent of
/// where the packets come from.
pub(super) struct DemuxState {
    pub(super) config: DemuxConfig,
    pub(super) parser: TSPacketParser,
    pub(super) filters: PidFilterTable,
    pub(super) programs: ProgramRegistry,
    pub(super) streams: Vec<Stream>,
    pub(super) pool: BufferPool,
    pub(super) queue: VecDeque<Packet>,
    pub(super) services: HashMap<u16, SDTService>,
    pub(super) transport_stream_id: Option<u16>,
    pub(super) epg_stream: Option<usize>,
    /// Data packets (EPG, SCTE-35) are only queued once this is set.
    pub(super) header_read: bool,
    /// Open PES filters for PIDs no PMT announced.
    pub(super) auto_guess: bool,
    /// A PMT with at least one entry was parsed.
    pub(super) pmt_seen: bool,
}

impl DemuxState {
    pub(super) fn new(config: DemuxConfig) -> Self {
        Self {
            config,
            parser: TSPacketParser::new(),
            filters: PidFilterTable::new(),
            programs: ProgramRegistry::new(),
            streams: Vec::new(),
            pool: BufferPool::new(),
            queue: VecDeque::new(),
            services: HashMap::new(),
            transport_stream_id: None,
            epg_stream: None,
            header_read: false,
            auto_guess: false,
            pmt_seen: false,
        }
    }

    /// Opens the filters of the tables every transport stream may carry.
    fn open_base_filters(&mut self) -> Result<()> {
        self.filters.open_section(PID_PAT, SectionKind::Pat)?;
        self.filters.open_section(PID_SDT, SectionKind::Sdt)?;
        self.filters.open_section(PID_EIT, SectionKind::Eit)?;
        Ok(())
    }

    /// Appends a stream carried on `pid` and returns its index.
    pub(super) fn add_stream(&mut self, pid: u16) -> usize {
        let index = self.streams.len();
        self.streams.push(Stream::new(index, pid));
        index
    }

    /// Closes the filter of `pid`, if any, and recycles its buffers.
    pub(super) fn close_filter(&mut self, pid: u16) {
        if let Some(filter) = self.filters.close(pid) {
            self.release(filter);
        }
    }

    fn release(&mut self, mut filter: PidFilter) {
        if let Some(pes) = filter.pes_mut() {
            pes.flush(&mut self.pool);
        }
    }

    /// Runs one 188-byte transport packet through its PID filter.
    pub(super) fn handle_packet(&mut self, packet: &[u8; TS_PACKET_SIZE], pos: u64) -> Result<()> {
        let header = self.parser.parse_header(packet)?;
        let pid = header.pid;
        if pid == PID_NULL {
            return Ok(());
        }

        let is_start = header.payload_unit_start;
        if is_start && self.auto_guess && !self.filters.contains(pid) {
            debug!("auto-guessing PES stream on pid {:#x}", pid);
            self.filters.open_pes(pid, 0)?;
        }

        let Some(mut filter) = self.filters.take(pid) else {
            return Ok(());
        };
        let result = self.dispatch(&mut filter, packet, &header, pos);
        if let Some(closed) = self.filters.restore(filter) {
            self.release(closed);
        }
        result
    }

    fn dispatch(
        &mut self,
        filter: &mut PidFilter,
        packet: &[u8; TS_PACKET_SIZE],
        header: &TSHeader,
        pos: u64,
    ) -> Result<()> {
        let pid = header.pid;
        let is_start = header.payload_unit_start;
        if is_start {
            filter.discard = self.programs.is_pid_discarded(pid);
        }
        if filter.discard {
            return Ok(());
        }

        let afc = header.adaptation_field_control();
        if afc == 0 {
            return Ok(());
        }
        let has_adaptation = afc & 0x02 != 0;
        let has_payload = afc & 0x01 != 0;
        let discontinuity = has_adaptation && packet[4] != 0 && packet[5] & 0x80 != 0;

        let cc_ok = filter.check_continuity(header.continuity_counter, has_payload, discontinuity);
        if !cc_ok || header.transport_error {
            if header.transport_error {
                debug!("packet on pid {:#x} had TEI flag set, marking as corrupt", pid);
            }
            if let Some(pes) = filter.pes_mut() {
                pes.mark_corrupt();
            }
        }

        if has_adaptation {
            if let Some(pcr) = self.parser.parse_pcr(packet) {
                filter.last_pcr = Some(pcr);
            }
        }

        let offset = self.parser.payload_offset(packet);
        if offset >= TS_PACKET_SIZE || !has_payload {
            return Ok(());
        }
        let payload = &packet[offset..];
        let last_pcr = filter.last_pcr;

        match &mut filter.kind {
            FilterKind::Section(section_filter) => {
                if is_start {
                    let len = payload[0] as usize;
                    let rest = &payload[1..];
                    if len > rest.len() {
                        return Ok(());
                    }
                    if len > 0 && cc_ok {
                        self.write_section(pid, section_filter, &rest[..len], false, pos);
                        if self.filters.taken_closed() {
                            return Ok(());
                        }
                    }
                    if len < rest.len() {
                        self.write_section(pid, section_filter, &rest[len..], true, pos);
                    }
                } else if cc_ok {
                    self.write_section(pid, section_filter, payload, false, pos);
                }
            }
            FilterKind::Pes(pes) => {
                let packets = {
                    let mut ctx = self.context(pid, last_pcr);
                    pes.push(&mut ctx, payload, is_start, pos)?
                };
                self.queue.extend(packets);
            }
            FilterKind::Pcr => {}
        }
        Ok(())
    }

    /// Borrows the parts of the state a PES filter of `pid` works with.
    pub(super) fn context(&mut self, current_pid: u16, current_pcr: Option<u64>) -> DemuxContext<'_> {
        DemuxContext {
            config: &self.config,
            pool: &mut self.pool,
            streams: &mut self.streams,
            programs: &self.programs,
            filters: &self.filters,
            current_pid,
            current_pcr,
        }
    }

    /// Emits the partial units still buffered in PES filters.
    pub(super) fn finish_all(&mut self) {
        let pids: Vec<u16> = self.filters.iter().filter(|f| f.is_pes()).map(|f| f.pid).collect();
        for pid in pids {
            let Some(mut filter) = self.filters.take(pid) else {
                continue;
            };
            let last_pcr = filter.last_pcr;
            if let Some(pes) = filter.pes_mut() {
                let mut ctx = self.context(pid, last_pcr);
                if let Some(packet) = pes.finish(&mut ctx) {
                    self.queue.push_back(packet);
                }
            }
            if let Some(closed) = self.filters.restore(filter) {
                self.release(closed);
            }
        }
    }

    /// Resets every filter and drops the queued packets, as after a seek.
    pub(super) fn flush(&mut self) {
        self.filters.flush_all(&mut self.pool);
        while let Some(packet) = self.queue.pop_front() {
            self.recycle(packet);
        }
    }

    pub(super) fn recycle(&mut self, packet: Packet) {
        self.pool.put(Vec::from(packet.data));
    }

    /// True once the header scan has seen what it waits for.
    fn header_complete(&self) -> bool {
        if self.config.scan_all_pmts.enabled() {
            !self.programs.is_empty() && self.programs.all_pmts_found()
        } else {
            self.pmt_seen
        }
    }
}

/// Last PCR, in 90 kHz ticks, of the first non-discarded program carrying
/// `stream_index`.
pub(super) fn program_pcr(
    programs: &ProgramRegistry,
    filters: &PidFilterTable,
    stream_index: usize,
    current_pid: u16,
    current_pcr: Option<u64>,
) -> Option<i64> {
    programs
        .with_stream(stream_index)
        .filter(|p| !p.discard)
        .find_map(|p| {
            let pcr_pid = p.pcr_pid?;
            let pcr = if pcr_pid == current_pid {
                current_pcr
            } else {
                filters
                    .get(pcr_pid)
                    .filter(|f| !f.discard)
                    .and_then(|f| f.last_pcr)
            };
            pcr.map(pcr_to_pts)
        })
}

/// The view of the demuxer a PES filter gets while reassembling.
pub(super) struct DemuxContext<'a> {
    config: &'a DemuxConfig,
    pool: &'a mut BufferPool,
    streams: &'a mut Vec<Stream>,
    programs: &'a ProgramRegistry,
    filters: &'a PidFilterTable,
    current_pid: u16,
    current_pcr: Option<u64>,
}

impl PesContext for DemuxContext<'_> {
    fn config(&self) -> &DemuxConfig {
        self.config
    }

    fn pool(&mut self) -> &mut BufferPool {
        self.pool
    }

    fn new_stream(&mut self, pid: u16, stream_type: u8, stream_id: u8) -> usize {
        let index = self.streams.len();
        let mut stream = Stream::new(index, pid);
        set_stream_info(&mut stream, stream_type, None);
        if stream.codec_id == CodecId::None {
            stream.media_type = media_type_from_stream_id(stream_id);
        }
        stream.auto_guessed = true;
        info!(
            "new stream {} on pid {:#x} from PES stream_id {:#x}",
            index, pid, stream_id
        );
        self.streams.push(stream);
        index
    }

    fn is_discarded(&self, stream_index: usize) -> bool {
        self.streams
            .get(stream_index)
            .is_some_and(|s| stream_discarded(self.programs, s))
    }

    fn codec_id(&self, stream_index: usize) -> CodecId {
        self.streams
            .get(stream_index)
            .map_or(CodecId::None, |s| s.codec_id)
    }

    fn program_pcr(&self, stream_index: usize) -> Option<i64> {
        program_pcr(
            self.programs,
            self.filters,
            stream_index,
            self.current_pid,
            self.current_pcr,
        )
    }
}

/// MPEG transport stream demuxer.
///
/// Follows the PAT and PMTs to discover programs and elementary streams,
/// reassembles PES packets and forwards EPG and SCTE-35 sections as data
/// packets. Handles 188, 192 and 204 byte packet framings.
pub struct TSDemuxer<R> {
    reader: PacketReader<R>,
    state: DemuxState,
    index: Vec<Vec<IndexEntry>>,
    /// Offset of the last packet read, keeps seeks packet-aligned.
    pos47: u64,
    data_start: u64,
    eof: bool,
}

impl<R: AsyncRead + AsyncSeek + Unpin + Send> TSDemuxer<R> {
    /// Creates a demuxer using the process-wide configuration.
    pub fn new(reader: R) -> Self {
        Self::with_config(reader, config::current())
    }

    pub fn with_config(reader: R, config: DemuxConfig) -> Self {
        Self {
            reader: PacketReader::new(reader, config.resync_size),
            state: DemuxState::new(config),
            index: Vec::new(),
            pos47: 0,
            data_start: 0,
            eof: false,
        }
    }

    pub fn config(&self) -> &DemuxConfig {
        &self.state.config
    }

    /// Size of one packet on the wire: 188, 192 or 204.
    pub fn raw_packet_size(&self) -> usize {
        self.reader.raw_packet_size()
    }

    /// Scans the start of the input for programs and streams, then rewinds.
    pub async fn read_header(&mut self) -> Result<()> {
        if self.state.header_read {
            return Ok(());
        }
        let start = self.reader.position().await?;
        self.data_start = start;

        match self.reader.probe_packet_size().await? {
            Some(size) => self.reader.set_raw_packet_size(size),
            None => {
                warn!("could not detect TS packet size, defaulting to non-FEC/DVHS");
                self.reader.set_raw_packet_size(TS_PACKET_SIZE);
            }
        }
        debug!("raw packet size {}", self.reader.raw_packet_size());

        self.state.open_base_filters()?;

        let max_packets = self.state.config.probe_size / self.reader.raw_packet_size();
        let mut count = 0;
        while count < max_packets && !self.state.header_complete() {
            let Some((pos, packet)) = self.reader.read_packet().await? else {
                break;
            };
            self.pos47 = pos;
            count += 1;
            if let Err(e) = self.state.handle_packet(&packet, pos) {
                if !e.is_recoverable() {
                    return Err(e);
                }
                debug!("header scan: {}", e);
            }
        }
        debug!(
            "header scan read {} packets: {} programs, {} streams",
            count,
            self.state.programs.len(),
            self.state.streams.len()
        );

        self.reader.seek(start).await?;
        self.state.flush();
        self.state.header_read = true;
        self.state.auto_guess = self.state.config.auto_guess;
        Ok(())
    }

    /// Returns the next demuxed packet, or `None` once the input is
    /// exhausted and every buffered unit has been delivered.
    pub async fn read_packet(&mut self) -> Result<Option<Packet>> {
        if !self.state.header_read {
            self.read_header().await?;
        }
        loop {
            if let Some(packet) = self.state.queue.pop_front() {
                return Ok(Some(packet));
            }
            if self.eof {
                return Ok(None);
            }
            let Some((pos, packet)) = self.reader.read_packet().await? else {
                self.eof = true;
                self.state.finish_all();
                continue;
            };
            self.pos47 = pos;
            if let Err(e) = self.state.handle_packet(&packet, pos) {
                if !e.is_recoverable() {
                    return Err(e);
                }
                debug!("pos {}: {}", pos, e);
            }
        }
    }

    /// Returns a packet's payload buffer to the demuxer for reuse.
    pub fn recycle_packet(&mut self, packet: Packet) {
        self.state.recycle(packet);
    }

    /// Moves to byte offset `pos` and drops all reassembly state.
    pub async fn seek_to_byte(&mut self, pos: u64) -> Result<()> {
        self.reader.seek(pos).await?;
        self.state.flush();
        self.eof = false;
        Ok(())
    }

    /// Reads from the packet boundary at or after `pos` until a packet of
    /// `stream_index` with a DTS turns up, indexing every timestamp seen on
    /// the way. Returns that packet's offset and DTS.
    pub async fn get_dts(
        &mut self,
        stream_index: usize,
        pos: u64,
        pos_limit: u64,
    ) -> Result<Option<(u64, i64)>> {
        let raw = self.reader.raw_packet_size() as u64;
        let phase = self.pos47 % raw;
        let mut cur = (pos + raw - 1 - phase) / raw * raw + phase;
        self.seek_to_byte(cur).await?;

        while cur < pos_limit {
            let Some(packet) = self.read_packet().await? else {
                return Ok(None);
            };
            let found = match (packet.dts, packet.pos) {
                (Some(dts), Some(packet_pos)) => {
                    self.add_index_entry(packet.stream_index, packet_pos, dts);
                    (packet.stream_index == stream_index && packet_pos >= pos)
                        .then_some((packet_pos, dts))
                }
                _ => None,
            };
            if let Some(packet_pos) = packet.pos {
                cur = packet_pos;
            }
            self.recycle_packet(packet);
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    fn add_index_entry(&mut self, stream_index: usize, pos: u64, timestamp: i64) {
        if self.index.len() <= stream_index {
            self.index.resize_with(stream_index + 1, Vec::new);
        }
        let entries = &mut self.index[stream_index];
        match entries.binary_search_by_key(&timestamp, |e| e.timestamp) {
            Ok(i) => entries[i].pos = pos,
            Err(i) => entries.insert(i, IndexEntry { pos, timestamp }),
        }
    }

    /// Timestamps learned while seeking, ordered by timestamp.
    pub fn index_entries(&self, stream_index: usize) -> &[IndexEntry] {
        self.index
            .get(stream_index)
            .map_or(&[][..], |entries| entries.as_slice())
    }

    /// Positions the demuxer on the last packet of `stream_index` whose DTS
    /// does not exceed `timestamp`, bisecting over byte offsets. Returns
    /// the new byte offset.
    pub async fn seek(&mut self, stream_index: usize, timestamp: i64) -> Result<u64> {
        if !self.state.header_read {
            self.read_header().await?;
        }
        if stream_index >= self.state.streams.len() {
            return Err(TsError::InvalidData(format!(
                "no stream with index {}",
                stream_index
            )));
        }
        let raw = self.reader.raw_packet_size() as u64;

        let mut lo = self.data_start;
        if let Some(entry) = self
            .index_entries(stream_index)
            .iter()
            .rev()
            .find(|e| e.timestamp <= timestamp)
        {
            lo = lo.max(entry.pos);
        }
        let mut hi = self.reader.len().await?;
        let mut best = lo;

        while lo + raw < hi {
            let mid = lo + (hi - lo) / 2;
            match self.get_dts(stream_index, mid, hi).await? {
                Some((pos, dts)) if dts <= timestamp => {
                    trace!("seek: pos {} dts {} <= {}", pos, dts, timestamp);
                    best = pos;
                    lo = mid + 1;
                }
                _ => hi = mid,
            }
        }

        debug!("seek stream {} to {} lands at byte {}", stream_index, timestamp, best);
        self.seek_to_byte(best).await?;
        Ok(best)
    }

    /// Marks a program as unwanted. Packets on PIDs used only by discarded
    /// programs are dropped unparsed.
    pub fn set_program_discard(&mut self, program_id: u16, discard: bool) -> bool {
        match self.state.programs.get_mut(program_id) {
            Some(program) => {
                program.discard = discard;
                true
            }
            None => false,
        }
    }

    pub fn set_stream_discard(&mut self, stream_index: usize, discard: bool) -> bool {
        match self.state.streams.get_mut(stream_index) {
            Some(stream) => {
                stream.discard = discard;
                true
            }
            None => false,
        }
    }

    pub fn programs(&self) -> impl Iterator<Item = &Program> {
        self.state.programs.iter()
    }

    pub fn program(&self, id: u16) -> Option<&Program> {
        self.state.programs.get(id)
    }

    /// Names of a service from the SDT.
    pub fn service(&self, service_id: u16) -> Option<&SDTService> {
        self.state.services.get(&service_id)
    }

    pub fn streams(&self) -> &[Stream] {
        &self.state.streams
    }

    pub fn transport_stream_id(&self) -> Option<u16> {
        self.state.transport_stream_id
    }

    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }

    /// Turns the demuxer into a stream of packets. The stream ends after the
    /// first error.
    pub fn into_stream(self) -> impl futures::Stream<Item = Result<Packet>> {
        futures::stream::unfold(Some(self), |demuxer| async move {
            let mut demuxer = demuxer?;
            match demuxer.read_packet().await {
                Ok(Some(packet)) => Some((Ok(packet), Some(demuxer))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

#[async_trait]
impl<R: AsyncRead + AsyncSeek + Unpin + Send> Demuxer for TSDemuxer<R> {
    async fn read_header(&mut self) -> Result<()> {
        TSDemuxer::read_header(self).await
    }

    async fn read_packet(&mut self) -> Result<Option<Packet>> {
        TSDemuxer::read_packet(self).await
    }

    async fn streams(&mut self) -> Result<Vec<Box<dyn CodecData>>> {
        self.read_header().await?;
        Ok(self
            .state
            .streams
            .iter()
            .map(|s| Box::new(s.clone()) as Box<dyn CodecData>)
            .collect())
    }
}
