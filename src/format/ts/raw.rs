use super::parser::TSPacketParser;
use super::reader::PacketReader;
use super::types::*;
use crate::av::{CodecData, CodecId, MediaType, Packet, Stream};
use crate::config::{self, DemuxConfig};
use crate::error::Result;
use crate::format::Demuxer;
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncSeek};

/// How many packets to look ahead for the next PCR.
pub const MAX_PACKET_READAHEAD: usize = (128 * 1024) / TS_PACKET_SIZE;

/// Delivers the transport stream itself, one 188-byte packet per
/// [`Packet`] on a single data stream.
///
/// With `compute_pcr` each packet is stamped with an interpolated 27 MHz
/// clock derived from the PCRs around it.
pub struct RawTSReader<R> {
    reader: PacketReader<R>,
    parser: TSPacketParser,
    config: DemuxConfig,
    stream: Stream,
    header_read: bool,
    /// 27 MHz clock of the next packet.
    cur_pcr: i64,
    /// 27 MHz ticks per packet.
    pcr_incr: i64,
    bit_rate: Option<u64>,
}

impl<R: AsyncRead + AsyncSeek + Unpin + Send> RawTSReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_config(reader, config::current())
    }

    pub fn with_config(reader: R, config: DemuxConfig) -> Self {
        let mut stream = Stream::new(0, PID_NULL);
        stream.set_codec(MediaType::Data, CodecId::Mpeg2Ts);
        Self {
            reader: PacketReader::new(reader, config.resync_size),
            parser: TSPacketParser::new(),
            config,
            stream,
            header_read: false,
            cur_pcr: 0,
            pcr_incr: 0,
            bit_rate: None,
        }
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    /// Bit rate estimated from the first two PCRs of one PID.
    pub fn bit_rate(&self) -> Option<u64> {
        self.bit_rate
    }

    /// First 27 MHz clock value, extrapolated back to the first packet.
    pub fn start_time(&self) -> Option<i64> {
        self.bit_rate.map(|_| self.cur_pcr)
    }

    /// Detects the framing and, with `compute_pcr`, estimates the clock
    /// rate from the first two increasing PCRs on one PID.
    pub async fn read_header(&mut self) -> Result<()> {
        if self.header_read {
            return Ok(());
        }
        let start = self.reader.position().await?;
        match self.reader.probe_packet_size().await? {
            Some(size) => self.reader.set_raw_packet_size(size),
            None => {
                warn!("could not detect TS packet size, defaulting to non-FEC/DVHS");
                self.reader.set_raw_packet_size(TS_PACKET_SIZE);
            }
        }
        self.header_read = true;
        if !self.config.compute_pcr {
            return Ok(());
        }

        let max_packets = self.config.probe_size / self.reader.raw_packet_size();
        let mut pcr_pid = None;
        let mut first: Option<(i64, i64)> = None;
        let mut count = 0i64;
        while (count as usize) < max_packets {
            let Some((_, packet)) = self.reader.read_packet().await? else {
                break;
            };
            let pid = u16::from_be_bytes([packet[1], packet[2]]) & 0x1fff;
            if pcr_pid.map_or(true, |p| p == pid) {
                if let Some(pcr) = self.parser.parse_pcr(&packet) {
                    pcr_pid = Some(pid);
                    let pcr = pcr as i64;
                    match first {
                        Some((pcr0, count0)) if pcr > pcr0 => {
                            self.pcr_incr = (pcr - pcr0) / (count - count0);
                            self.cur_pcr = pcr0 - self.pcr_incr * count0;
                            self.bit_rate = Some(
                                (TS_PACKET_SIZE as u64 * 8 * PCR_HZ) / self.pcr_incr.max(1) as u64,
                            );
                            break;
                        }
                        Some((pcr0, _)) => {
                            warn!("invalid pcr pair {} >= {}", pcr0, pcr);
                            first = Some((pcr, count));
                        }
                        None => first = Some((pcr, count)),
                    }
                }
            }
            count += 1;
        }
        match self.bit_rate {
            Some(rate) => debug!(
                "pcr pid {:?}: {} ticks per packet, {} bit/s",
                pcr_pid, self.pcr_incr, rate
            ),
            None => warn!("no PCR pair found, packets will carry no timestamps"),
        }
        self.reader.seek(start).await?;
        Ok(())
    }

    /// Returns the next transport packet, `None` at end of input.
    pub async fn read_packet(&mut self) -> Result<Option<Packet>> {
        if !self.header_read {
            self.read_header().await?;
        }
        let Some((pos, packet)) = self.reader.read_packet().await? else {
            return Ok(None);
        };

        let mut out = Packet::new(Bytes::copy_from_slice(&packet))
            .with_stream_index(0)
            .with_pos(pos);

        if self.config.compute_pcr {
            if let Some(pcr) = self.parser.parse_pcr(&packet) {
                if let Some(incr) = self.next_pcr_increment(pcr as i64).await? {
                    self.pcr_incr = incr;
                }
                self.cur_pcr = pcr as i64;
            }
            if self.bit_rate.is_some() || self.pcr_incr > 0 {
                out = out
                    .with_pts(self.cur_pcr)
                    .with_duration(self.pcr_incr);
                self.cur_pcr += self.pcr_incr;
            }
        }
        Ok(Some(out))
    }

    /// Looks ahead for the next PCR and derives the per-packet increment
    /// from it. Leaves the read position untouched.
    async fn next_pcr_increment(&mut self, pcr: i64) -> Result<Option<i64>> {
        let resume = self.reader.position().await?;
        let mut incr = None;
        for i in 0..MAX_PACKET_READAHEAD {
            let Some((_, next)) = self.reader.read_packet().await? else {
                break;
            };
            if let Some(next_pcr) = self.parser.parse_pcr(&next) {
                incr = Some((next_pcr as i64 - pcr) / (i as i64 + 1));
                break;
            }
        }
        self.reader.seek(resume).await?;
        Ok(incr)
    }

    pub async fn seek_to_byte(&mut self, pos: u64) -> Result<()> {
        self.reader.seek(pos).await?;
        Ok(())
    }

    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

#[async_trait]
impl<R: AsyncRead + AsyncSeek + Unpin + Send> Demuxer for RawTSReader<R> {
    async fn read_header(&mut self) -> Result<()> {
        RawTSReader::read_header(self).await
    }

    async fn read_packet(&mut self) -> Result<Option<Packet>> {
        RawTSReader::read_packet(self).await
    }

    async fn streams(&mut self) -> Result<Vec<Box<dyn CodecData>>> {
        self.read_header().await?;
        Ok(vec![Box::new(self.stream.clone()) as Box<dyn CodecData>])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::test_util::TsBuilder;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn raw_config(compute_pcr: bool) -> DemuxConfig {
        DemuxConfig {
            compute_pcr,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_raw_packets_keep_positions() {
        let mut ts = TsBuilder::new();
        for _ in 0..4 {
            ts.null_packet();
        }
        let data = ts.into_bytes();
        let mut raw = RawTSReader::with_config(Cursor::new(data.clone()), raw_config(false));

        let mut positions = Vec::new();
        while let Some(packet) = raw.read_packet().await.unwrap() {
            assert_eq!(packet.data.len(), TS_PACKET_SIZE);
            assert_eq!(packet.pts, None);
            positions.push(packet.pos.unwrap());
        }
        assert_eq!(positions, vec![0, 188, 376, 564]);
        assert_eq!(raw.stream().codec_id, CodecId::Mpeg2Ts);
    }

    #[tokio::test]
    async fn test_raw_pcr_interpolation() {
        let mut ts = TsBuilder::new();
        // PCR every fourth packet, advancing 4000 ticks each time
        for i in 0..12u64 {
            if i % 4 == 0 {
                ts.pcr_packet(0x100, 1_000_000 + i * 1000);
            } else {
                ts.null_packet();
            }
        }
        let data = ts.into_bytes();
        let mut raw = RawTSReader::with_config(Cursor::new(data), raw_config(true));
        raw.read_header().await.unwrap();
        assert_eq!(raw.start_time(), Some(1_000_000));
        assert_eq!(raw.bit_rate(), Some(188 * 8 * 27_000));

        let mut pts = Vec::new();
        while let Some(packet) = raw.read_packet().await.unwrap() {
            assert_eq!(packet.duration, Some(1000));
            pts.push(packet.pts.unwrap());
        }
        let expected: Vec<i64> = (0..12).map(|i| 1_000_000 + i * 1000).collect();
        assert_eq!(pts, expected);
    }
}
