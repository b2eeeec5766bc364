use super::mp4::{read_sl_header, SlConfig};
use super::types::*;
use crate::av::{CodecId, Packet, SideData};
use crate::config::DemuxConfig;
use crate::error::{Result, TsError};
use crate::utils::{BufferPool, ByteReader};
use bytes::Bytes;
use log::{debug, trace, warn};

/// Reassembly state of a PES filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PesState {
    /// Collecting the 6-byte start code, stream_id and length prefix.
    Header,
    /// Collecting the fixed 9-byte optional header.
    PesHeader,
    /// Collecting the variable header extension.
    PesHeaderFill,
    /// Collecting payload bytes.
    Payload,
    /// Dropping bytes until the next unit start.
    Skip,
}

/// What a PES filter needs from the demuxer while reassembling.
pub trait PesContext {
    fn config(&self) -> &DemuxConfig;

    fn pool(&mut self) -> &mut BufferPool;

    /// Creates a stream for a PID that carries PES data no PMT announced.
    fn new_stream(&mut self, pid: u16, stream_type: u8, stream_id: u8) -> usize;

    fn is_discarded(&self, stream_index: usize) -> bool;

    fn codec_id(&self, stream_index: usize) -> CodecId;

    /// Last PCR in 90 kHz ticks seen on the PCR PID of a program carrying
    /// the stream, if any.
    fn program_pcr(&self, stream_index: usize) -> Option<i64>;
}

/// Decodes a 33-bit PTS/DTS field.
pub fn parse_pes_timestamp(b: &[u8; 5]) -> i64 {
    (((b[0] as i64) >> 1) & 0x07) << 30
        | ((u16::from_be_bytes([b[1], b[2]]) as i64) >> 1) << 15
        | (u16::from_be_bytes([b[3], b[4]]) as i64) >> 1
}

fn read_timestamp(reader: &mut ByteReader<'_>) -> Result<i64> {
    let b = reader.read_bytes(5)?;
    Ok(parse_pes_timestamp(&[b[0], b[1], b[2], b[3], b[4]]))
}

/// Stream ids whose PES packets carry no optional header.
fn has_no_pes_header(stream_id: u8) -> bool {
    matches!(
        stream_id,
        STREAM_ID_PROGRAM_STREAM_MAP
            | STREAM_ID_PADDING_STREAM
            | STREAM_ID_PRIVATE_STREAM_2
            | STREAM_ID_ECM_STREAM
            | STREAM_ID_EMM_STREAM
            | STREAM_ID_PROGRAM_STREAM_DIRECTORY
            | STREAM_ID_DSMCC_STREAM
            | STREAM_ID_TYPE_E_STREAM
    )
}

/// Reassembles PES packets of one PID.
#[derive(Debug)]
pub struct PesFilter {
    pub pid: u16,
    pub stream_type: u8,
    /// Stream the packets are delivered to.
    pub stream: Option<usize>,
    /// AC-3 core carried alongside TrueHD on HDMV discs.
    pub sub_stream: Option<usize>,
    pub sl: Option<SlConfig>,
    state: PesState,
    header: [u8; MAX_PES_HEADER_SIZE],
    data_index: usize,
    pes_header_size: usize,
    /// PES_packet_length, 0 when unbounded.
    packet_length: usize,
    stream_id: u8,
    extended_stream_id: Option<u8>,
    pts: Option<i64>,
    dts: Option<i64>,
    corrupt: bool,
    ts_packet_pos: Option<u64>,
    buffer: Option<Vec<u8>>,
}

impl PesFilter {
    pub fn new(pid: u16, stream_type: u8) -> Self {
        Self {
            pid,
            stream_type,
            stream: None,
            sub_stream: None,
            sl: None,
            state: PesState::Skip,
            header: [0; MAX_PES_HEADER_SIZE],
            data_index: 0,
            pes_header_size: 0,
            packet_length: 0,
            stream_id: 0,
            extended_stream_id: None,
            pts: None,
            dts: None,
            corrupt: false,
            ts_packet_pos: None,
            buffer: None,
        }
    }

    pub fn state(&self) -> PesState {
        self.state
    }

    /// Flags the unit being assembled as damaged.
    pub fn mark_corrupt(&mut self) {
        self.corrupt = true;
    }

    /// Whether a partial unit with payload is buffered.
    pub fn has_pending_data(&self) -> bool {
        self.state == PesState::Payload && self.data_index > 0
    }

    fn reset_unit(&mut self, pool: &mut BufferPool) {
        self.pts = None;
        self.dts = None;
        self.data_index = 0;
        self.corrupt = false;
        if let Some(buf) = self.buffer.take() {
            pool.put(buf);
        }
    }

    /// Drops the unit in progress and waits for the next unit start.
    pub fn flush(&mut self, pool: &mut BufferPool) {
        self.reset_unit(pool);
        self.state = PesState::Skip;
    }

    /// Emits the buffered partial unit, if any. Used at end of input.
    pub fn finish<C: PesContext>(&mut self, ctx: &mut C) -> Option<Packet> {
        if self.has_pending_data() {
            let packet = self.emit(ctx);
            self.state = PesState::Skip;
            packet
        } else {
            None
        }
    }

    /// Feeds the payload of one transport packet. Returns completed packets.
    pub fn push<C: PesContext>(
        &mut self,
        ctx: &mut C,
        mut data: &[u8],
        is_start: bool,
        pos: u64,
    ) -> Result<Vec<Packet>> {
        let mut out = Vec::new();

        if is_start {
            if self.has_pending_data() {
                out.extend(self.emit(ctx));
            } else {
                self.reset_unit(ctx.pool());
            }
            self.state = PesState::Header;
            self.ts_packet_pos = Some(pos);
        }

        while !data.is_empty() {
            match self.state {
                PesState::Header => {
                    data = self.fill_header(data, PES_START_SIZE);
                    if self.data_index == PES_START_SIZE {
                        self.parse_start(ctx);
                    }
                }
                PesState::PesHeader => {
                    data = self.fill_header(data, PES_HEADER_SIZE);
                    if self.data_index == PES_HEADER_SIZE {
                        self.pes_header_size = self.header[8] as usize + PES_HEADER_SIZE;
                        self.state = PesState::PesHeaderFill;
                    }
                }
                PesState::PesHeaderFill => {
                    data = self.fill_header(data, self.pes_header_size);
                    if self.data_index == self.pes_header_size {
                        match self.parse_header_fill(ctx, data) {
                            Ok(consumed) => data = &data[consumed..],
                            Err(e) => {
                                debug!("pid {:#x}: dropping PES unit: {}", self.pid, e);
                                self.flush(ctx.pool());
                                data = &[];
                            }
                        }
                    }
                }
                PesState::Payload => {
                    self.push_payload(ctx, data, &mut out)?;
                    data = &[];
                }
                PesState::Skip => {
                    data = &[];
                }
            }
        }
        Ok(out)
    }

    /// Copies header bytes until `target` bytes are buffered.
    fn fill_header<'d>(&mut self, data: &'d [u8], target: usize) -> &'d [u8] {
        let len = target.saturating_sub(self.data_index).min(data.len());
        self.header[self.data_index..self.data_index + len].copy_from_slice(&data[..len]);
        self.data_index += len;
        &data[len..]
    }

    fn parse_start<C: PesContext>(&mut self, ctx: &mut C) {
        if self.header[..3] != [0x00, 0x00, 0x01] {
            // table data on a PES PID
            self.state = PesState::Skip;
            return;
        }
        self.stream_id = self.header[3];
        if self.stream_id == STREAM_ID_PADDING_STREAM {
            self.state = PesState::Skip;
            return;
        }

        let stream = match self.stream {
            Some(stream) => stream,
            None => {
                let config = ctx.config();
                if config.skip_changes || config.merge_pmt_versions {
                    self.state = PesState::Skip;
                    return;
                }
                let stream = ctx.new_stream(self.pid, self.stream_type, self.stream_id);
                self.stream = Some(stream);
                stream
            }
        };

        self.packet_length = u16::from_be_bytes([self.header[4], self.header[5]]) as usize;

        let sub_discarded = self.sub_stream.map_or(true, |s| ctx.is_discarded(s));
        if ctx.is_discarded(stream) && sub_discarded {
            self.state = PesState::Skip;
            return;
        }

        if has_no_pes_header(self.stream_id) {
            self.pes_header_size = PES_START_SIZE;
            self.state = PesState::Payload;
            self.data_index = 0;
        } else {
            self.state = PesState::PesHeader;
        }
    }

    /// Parses the complete PES header and any SL or metadata AU header at
    /// the start of `payload`. Returns the number of payload bytes consumed.
    fn parse_header_fill<C: PesContext>(&mut self, ctx: &mut C, payload: &[u8]) -> Result<usize> {
        let flags = self.header[7];
        let mut r = ByteReader::new(&self.header[PES_HEADER_SIZE..self.pes_header_size]);

        self.pts = None;
        self.dts = None;
        match flags & 0xc0 {
            0x80 => {
                let pts = read_timestamp(&mut r)?;
                self.pts = Some(pts);
                self.dts = Some(pts);
            }
            0xc0 => {
                self.pts = Some(read_timestamp(&mut r)?);
                self.dts = Some(read_timestamp(&mut r)?);
            }
            _ => {}
        }

        self.extended_stream_id = None;
        if flags & 0x01 != 0 {
            // ESCR, ES_rate, DSM trick mode, additional copy info, CRC
            let optional = [(0x20, 6), (0x10, 3), (0x08, 1), (0x04, 1), (0x02, 2)];
            for (bit, len) in optional {
                if flags & bit != 0 {
                    r.skip(len)?;
                }
            }
            let pes_ext = r.read_u8()?;
            // private data, pack header, sequence counter, P-STD buffer
            let mut skip = ((pes_ext >> 4) & 0xb) as usize;
            skip += skip & 0x9;
            r.skip(skip)?;
            if pes_ext & 0x41 == 0x01 && r.remaining() >= 2 {
                let ext2 = r.read_bytes(2)?;
                if ext2[0] & 0x7f > 0 && ext2[1] & 0x80 == 0 {
                    self.extended_stream_id = Some(ext2[1]);
                }
            }
        }

        self.state = PesState::Payload;
        self.data_index = 0;

        let mut consumed = 0;
        if self.stream_type == STREAM_TYPE_MPEG4_SL && !payload.is_empty() {
            if let Some(sl) = self.sl {
                let sl_header = read_sl_header(&sl, payload)?;
                if let Some(dts) = sl_header.dts {
                    self.dts = Some(dts);
                }
                if let Some(cts) = sl_header.cts {
                    self.pts = Some(cts);
                }
                consumed = sl_header.size.min(payload.len());
                self.pes_header_size += consumed;
            }
        }
        let klv = self.stream_id == STREAM_ID_METADATA_STREAM
            && self.stream.map(|s| ctx.codec_id(s)) == Some(CodecId::SmpteKlv);
        if klv && payload.len() - consumed >= 5 {
            // metadata access unit header
            self.pes_header_size += 5;
            consumed += 5;
        }

        if ctx.config().fix_teletext_pts {
            self.fix_subtitle_timestamps(ctx);
        }
        Ok(consumed)
    }

    /// Teletext and DVB subtitle timestamps are unreliable. Tie them to the
    /// program clock, or drop them for teletext when no PCR is known.
    fn fix_subtitle_timestamps<C: PesContext>(&mut self, ctx: &C) {
        let Some(stream) = self.stream else {
            return;
        };
        let codec_id = ctx.codec_id(stream);
        if codec_id != CodecId::DvbTeletext && codec_id != CodecId::DvbSubtitle {
            return;
        }
        let config = ctx.config();
        match ctx.program_pcr(stream) {
            Some(pcr) => {
                let clamped = pcr + config.teletext_pts_offset;
                match self.dts {
                    None => self.set_timestamps(pcr),
                    Some(dts) if dts < pcr => self.set_timestamps(pcr),
                    Some(dts) if codec_id == CodecId::DvbTeletext && dts > clamped => {
                        self.set_timestamps(clamped)
                    }
                    Some(dts)
                        if codec_id == CodecId::DvbSubtitle
                            && dts > pcr + config.subtitle_pts_window =>
                    {
                        self.set_timestamps(clamped)
                    }
                    Some(_) => {}
                }
            }
            None if codec_id == CodecId::DvbTeletext => {
                trace!(
                    "pid {:#x}: no PCR, unsetting teletext timestamps",
                    self.pid
                );
                self.pts = None;
                self.dts = None;
            }
            None => {}
        }
    }

    fn set_timestamps(&mut self, ts: i64) {
        self.pts = Some(ts);
        self.dts = Some(ts);
    }

    fn push_payload<C: PesContext>(
        &mut self,
        ctx: &mut C,
        data: &[u8],
        out: &mut Vec<Packet>,
    ) -> Result<()> {
        let configured_max = ctx.config().max_packet_size;
        let mut max_packet_size = configured_max;
        if self.packet_length > 0 {
            let expected = (self.packet_length + PES_START_SIZE).saturating_sub(self.pes_header_size);
            max_packet_size = max_packet_size.min(expected);
        }

        let mut data = data;
        if self.data_index > 0 && self.data_index + data.len() > max_packet_size {
            out.extend(self.emit(ctx));
            self.state = PesState::Payload;
            self.packet_length = 0;
            max_packet_size = configured_max;
        } else if self.data_index == 0 && data.len() > max_packet_size {
            // stuffing after a short unit
            data = &data[..max_packet_size];
        }

        let buffer = match self.buffer.take() {
            Some(buf) => buf,
            None => ctx.pool().get(max_packet_size)?,
        };
        let mut buffer = buffer;
        if buffer.capacity() < self.data_index + data.len() {
            buffer
                .try_reserve(data.len())
                .map_err(|_| TsError::OutOfMemory(self.data_index + data.len()))?;
        }
        buffer.extend_from_slice(data);
        self.data_index += data.len();
        self.buffer = Some(buffer);

        if self.packet_length > 0
            && self.pes_header_size + self.data_index == self.packet_length + PES_START_SIZE
        {
            out.extend(self.emit(ctx));
            self.state = PesState::Skip;
        }
        Ok(())
    }

    /// Turns the buffered unit into a packet and resets for the next unit.
    fn emit<C: PesContext>(&mut self, ctx: &mut C) -> Option<Packet> {
        let stream = self.stream?;
        let data = self.buffer.take().unwrap_or_default();

        let mut corrupt = self.corrupt;
        if self.packet_length > 0
            && self.pes_header_size + self.data_index != self.packet_length + PES_START_SIZE
        {
            warn!("pid {:#x}: PES packet size mismatch", self.pid);
            corrupt = true;
        }

        let stream_index = match self.sub_stream {
            Some(sub)
                if self.stream_type == STREAM_TYPE_BLURAY_TRUEHD
                    && self.extended_stream_id == Some(0x76) =>
            {
                sub
            }
            _ => stream,
        };

        let mut packet = Packet::new(Bytes::from(data))
            .with_stream_index(stream_index)
            .with_corrupt_flag(corrupt)
            .with_side_data(SideData::MpegTsStreamId(self.stream_id));
        packet.pts = self.pts;
        packet.dts = self.dts;
        packet.pos = self.ts_packet_pos;

        self.reset_unit(ctx.pool());
        Some(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    struct MockContext {
        config: DemuxConfig,
        pool: BufferPool,
        codecs: Vec<CodecId>,
        discarded: Vec<bool>,
        pcr: Option<i64>,
    }

    impl MockContext {
        fn new() -> Self {
            Self {
                config: DemuxConfig::default(),
                pool: BufferPool::new(),
                codecs: vec![CodecId::H264],
                discarded: vec![false],
                pcr: None,
            }
        }
    }

    impl PesContext for MockContext {
        fn config(&self) -> &DemuxConfig {
            &self.config
        }

        fn pool(&mut self) -> &mut BufferPool {
            &mut self.pool
        }

        fn new_stream(&mut self, _pid: u16, _stream_type: u8, _stream_id: u8) -> usize {
            self.codecs.push(CodecId::None);
            self.discarded.push(false);
            self.codecs.len() - 1
        }

        fn is_discarded(&self, stream_index: usize) -> bool {
            self.discarded[stream_index]
        }

        fn codec_id(&self, stream_index: usize) -> CodecId {
            self.codecs[stream_index]
        }

        fn program_pcr(&self, _stream_index: usize) -> Option<i64> {
            self.pcr
        }
    }

    fn encode_timestamp(marker: u8, ts: i64) -> [u8; 5] {
        [
            (marker << 4) | ((((ts >> 30) & 0x07) as u8) << 1) | 1,
            (ts >> 22) as u8,
            ((((ts >> 15) & 0x7f) as u8) << 1) | 1,
            (ts >> 7) as u8,
            (((ts & 0x7f) as u8) << 1) | 1,
        ]
    }

    fn pes_unit(stream_id: u8, pts: Option<i64>, payload: &[u8], bounded: bool) -> Vec<u8> {
        let ts_len = if pts.is_some() { 5 } else { 0 };
        let len = if bounded { payload.len() + 3 + ts_len } else { 0 };
        let mut out = vec![0, 0, 1, stream_id, (len >> 8) as u8, len as u8];
        out.extend_from_slice(&[0x80, if pts.is_some() { 0x80 } else { 0 }, ts_len as u8]);
        if let Some(pts) = pts {
            out.extend_from_slice(&encode_timestamp(0x2, pts));
        }
        out.extend_from_slice(payload);
        out
    }

    fn filter() -> PesFilter {
        let mut f = PesFilter::new(0x101, STREAM_TYPE_H264);
        f.stream = Some(0);
        f
    }

    #[test]
    fn test_timestamp_decoding() {
        for ts in [0i64, 1, 90_000, (1 << 33) - 1, 0x1_2345_6789] {
            assert_eq!(parse_pes_timestamp(&encode_timestamp(0x3, ts)), ts);
        }
    }

    #[test]
    fn test_bounded_unit_completes_on_length() {
        let mut ctx = MockContext::new();
        let mut f = filter();
        let payload: Vec<u8> = (0..500).map(|i| i as u8).collect();
        let unit = pes_unit(0xe0, Some(90_000), &payload, true);

        let mut out = f.push(&mut ctx, &unit[..100], true, 0).unwrap();
        out.extend(f.push(&mut ctx, &unit[100..], false, 188).unwrap());
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].data[..], &payload[..]);
        assert_eq!(out[0].pts, Some(90_000));
        assert_eq!(out[0].dts, Some(90_000));
        assert_eq!(out[0].pos, Some(0));
        assert_eq!(out[0].mpegts_stream_id(), Some(0xe0));
        assert!(!out[0].corrupt);
        assert_eq!(f.state(), PesState::Skip);
    }

    #[test]
    fn test_unbounded_unit_flushes_on_next_start() {
        let mut ctx = MockContext::new();
        let mut f = filter();
        let unit = pes_unit(0xe0, Some(1), &[7u8; 300], false);

        assert!(f.push(&mut ctx, &unit[..184], true, 0).unwrap().is_empty());
        assert!(f.push(&mut ctx, &unit[184..], false, 188).unwrap().is_empty());
        let next = pes_unit(0xe0, Some(2), &[8u8; 10], false);
        let out = f.push(&mut ctx, &next, true, 376).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data.len(), 300);
        assert_eq!(out[0].pts, Some(1));

        let last = f.finish(&mut ctx).unwrap();
        assert_eq!(&last.data[..], &[8u8; 10]);
        assert_eq!(last.pos, Some(376));
    }

    #[test]
    fn test_size_mismatch_is_corrupt() {
        let mut ctx = MockContext::new();
        let mut f = filter();
        let unit = pes_unit(0xe0, None, &[1u8; 50], true);
        f.push(&mut ctx, &unit[..40], true, 0).unwrap();
        let out = f.push(&mut ctx, &unit[..10], true, 188).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].corrupt);
    }

    #[test]
    fn test_padding_and_missing_start_code_skip() {
        let mut ctx = MockContext::new();
        let mut f = filter();
        let padding = pes_unit(STREAM_ID_PADDING_STREAM, None, &[0xff; 20], true);
        assert!(f.push(&mut ctx, &padding, true, 0).unwrap().is_empty());
        assert_eq!(f.state(), PesState::Skip);

        assert!(f.push(&mut ctx, &[0x00, 0x02, 0xb0, 0x0d, 0, 1], true, 0).unwrap().is_empty());
        assert_eq!(f.state(), PesState::Skip);
    }

    #[test]
    fn test_padding_on_unknown_pid_creates_no_stream() {
        let mut ctx = MockContext::new();
        let mut f = PesFilter::new(0x200, 0);
        let padding = pes_unit(STREAM_ID_PADDING_STREAM, None, &[0xff; 20], true);
        assert!(f.push(&mut ctx, &padding, true, 0).unwrap().is_empty());
        assert_eq!(f.stream, None);
        assert_eq!(ctx.codecs.len(), 1);
    }

    #[test]
    fn test_klv_access_unit_header_skipped() {
        let mut ctx = MockContext::new();
        ctx.codecs[0] = CodecId::SmpteKlv;
        let mut f = PesFilter::new(0x102, STREAM_TYPE_METADATA);
        f.stream = Some(0);
        let mut payload = vec![0x00, 0xef, 0x00, 0x00, 0x10];
        payload.extend_from_slice(b"KLVDATA");
        let unit = pes_unit(STREAM_ID_METADATA_STREAM, Some(0), &payload, true);

        let out = f.push(&mut ctx, &unit, true, 0).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].data[..], b"KLVDATA");
        assert!(!out[0].corrupt);
    }

    #[test]
    fn test_id3_metadata_keeps_payload() {
        let mut ctx = MockContext::new();
        ctx.codecs[0] = CodecId::TimedId3;
        let mut f = PesFilter::new(0x102, STREAM_TYPE_METADATA);
        f.stream = Some(0);
        let payload = b"ID3\x04\x00\x00\x00\x00\x00\x0aHELLOWORLD".to_vec();
        let unit = pes_unit(0xbd, Some(0), &payload, true);

        let out = f.push(&mut ctx, &unit, true, 0).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].data[..], &payload[..]);
        assert!(!out[0].corrupt);
    }

    #[test]
    fn test_private_stream_2_has_no_header() {
        let mut ctx = MockContext::new();
        let mut f = filter();
        let mut unit = vec![0, 0, 1, STREAM_ID_PRIVATE_STREAM_2, 0, 4];
        unit.extend_from_slice(&[1, 2, 3, 4]);
        let out = f.push(&mut ctx, &unit, true, 0).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].data[..], &[1, 2, 3, 4]);
        assert_eq!(out[0].pts, None);
    }

    #[test]
    fn test_discarded_stream_skipped() {
        let mut ctx = MockContext::new();
        ctx.discarded[0] = true;
        let mut f = filter();
        let unit = pes_unit(0xe0, None, &[1u8; 20], true);
        assert!(f.push(&mut ctx, &unit, true, 0).unwrap().is_empty());
        assert_eq!(f.state(), PesState::Skip);
    }

    #[test]
    fn test_unknown_pid_gets_a_stream() {
        let mut ctx = MockContext::new();
        let mut f = PesFilter::new(0x200, 0);
        let unit = pes_unit(0xc0, None, &[1u8; 20], true);
        let out = f.push(&mut ctx, &unit, true, 0).unwrap();
        assert_eq!(f.stream, Some(1));
        assert_eq!(out[0].stream_index, 1);

        let mut ctx = MockContext::new();
        ctx.config.merge_pmt_versions = true;
        let mut f = PesFilter::new(0x200, 0);
        assert!(f.push(&mut ctx, &unit, true, 0).unwrap().is_empty());
        assert_eq!(f.stream, None);
    }

    #[test]
    fn test_corrupt_flag_carried() {
        let mut ctx = MockContext::new();
        let mut f = filter();
        let unit = pes_unit(0xe0, None, &[3u8; 100], true);
        f.push(&mut ctx, &unit[..50], true, 0).unwrap();
        f.mark_corrupt();
        let out = f.push(&mut ctx, &unit[50..], false, 188).unwrap();
        assert!(out[0].corrupt);
    }

    #[test]
    fn test_teletext_timestamps_follow_pcr() {
        let mut ctx = MockContext::new();
        ctx.codecs[0] = CodecId::DvbTeletext;
        let mut f = filter();

        let unit = pes_unit(0xbd, Some(500_000), &[0x10; 46], true);
        let out = f.push(&mut ctx, &unit, true, 0).unwrap();
        assert_eq!(out[0].pts, None);
        assert_eq!(out[0].dts, None);

        ctx.pcr = Some(100_000);
        let out = f.push(&mut ctx, &unit, true, 0).unwrap();
        assert_eq!(out[0].pts, Some(100_000 + 3654 + 9000));

        let early = pes_unit(0xbd, Some(50_000), &[0x10; 46], true);
        let out = f.push(&mut ctx, &early, true, 0).unwrap();
        assert_eq!(out[0].dts, Some(100_000));
    }

    #[test]
    fn test_extended_stream_id_selects_sub_stream() {
        let mut ctx = MockContext::new();
        ctx.codecs.push(CodecId::Ac3);
        ctx.discarded.push(false);
        let mut f = PesFilter::new(0x1100, STREAM_TYPE_BLURAY_TRUEHD);
        f.stream = Some(0);
        f.sub_stream = Some(1);

        // PES extension with extension 2 carrying stream_id_extension 0x76
        let payload = [0xaa; 8];
        let header_data = [0x0f, 0x81, 0x76];
        let len = 3 + header_data.len() + payload.len();
        let mut unit = vec![0, 0, 1, 0xfd, 0, len as u8, 0x80, 0x01, header_data.len() as u8];
        unit.extend_from_slice(&header_data);
        unit.extend_from_slice(&payload);

        let out = f.push(&mut ctx, &unit, true, 0).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].stream_index, 1);
        assert_eq!(&out[0].data[..], &payload);
    }

    #[test]
    fn test_truncated_header_aborts_unit() {
        let mut ctx = MockContext::new();
        let mut f = filter();
        // PTS flagged but header_data_length too short to hold it
        let unit = [0, 0, 1, 0xe0, 0, 0, 0x80, 0x80, 0x02, 0x21, 0x00, 1, 2, 3];
        assert!(f.push(&mut ctx, &unit, true, 0).unwrap().is_empty());
        assert_eq!(f.state(), PesState::Skip);
    }

    #[quickcheck]
    fn prop_split_alignment_preserves_unit(cuts: Vec<u8>, pts: u32) -> bool {
        let mut ctx = MockContext::new();
        let mut f = filter();
        let payload: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
        let unit = pes_unit(0xe0, Some(pts as i64), &payload, true);

        let mut out = Vec::new();
        let mut start = 0;
        for (i, c) in cuts.iter().enumerate() {
            let end = (start + 1 + *c as usize).min(unit.len());
            if start >= end {
                break;
            }
            out.extend(f.push(&mut ctx, &unit[start..end], i == 0, 0).unwrap());
            start = end;
        }
        if start < unit.len() {
            out.extend(f.push(&mut ctx, &unit[start..], start == 0, 0).unwrap());
        }
        out.len() == 1 && out[0].data[..] == payload[..] && out[0].pts == Some(pts as i64)
    }
}
