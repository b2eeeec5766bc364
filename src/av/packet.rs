use bytes::Bytes;

/// Extra per-packet data attached by the demuxer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideData {
    /// The raw `stream_id` byte of the PES header this packet came from.
    MpegTsStreamId(u8),
}

/// One demuxed unit: a PES payload, an EPG section or a raw TS packet.
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Bytes,
    /// Presentation time in 90 kHz ticks.
    pub pts: Option<i64>,
    /// Decoding time in 90 kHz ticks.
    pub dts: Option<i64>,
    pub stream_index: usize,
    /// Byte offset of the first transport packet of this unit.
    pub pos: Option<u64>,
    /// Set when continuity or transport errors touched this unit.
    pub corrupt: bool,
    pub duration: Option<i64>,
    pub side_data: Vec<SideData>,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: None,
            dts: None,
            stream_index: 0,
            pos: None,
            corrupt: false,
            duration: None,
            side_data: Vec::new(),
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: i64) -> Self {
        self.dts = Some(dts);
        self
    }

    pub fn with_stream_index(mut self, index: usize) -> Self {
        self.stream_index = index;
        self
    }

    pub fn with_pos(mut self, pos: u64) -> Self {
        self.pos = Some(pos);
        self
    }

    pub fn with_corrupt_flag(mut self, corrupt: bool) -> Self {
        self.corrupt = corrupt;
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_side_data(mut self, side_data: SideData) -> Self {
        self.side_data.push(side_data);
        self
    }

    /// The MPEG-TS stream_id recorded for this packet, if any.
    pub fn mpegts_stream_id(&self) -> Option<u8> {
        self.side_data.iter().find_map(|sd| match sd {
            SideData::MpegTsStreamId(id) => Some(*id),
        })
    }
}
