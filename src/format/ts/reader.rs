use super::probe::{detect_packet_size, PROBE_PACKET_MAX_BUF};
use super::types::*;
use crate::error::{Result, TsError};
use log::{error, warn};
use std::io::{ErrorKind, SeekFrom};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

const RESYNC_CHUNK: usize = 4096;

/// Pulls aligned 188-byte transport packets out of a byte source.
///
/// Handles 192 and 204 byte framings by skipping the extra bytes after each
/// packet, and realigns on the sync byte when a packet does not start with
/// one.
pub struct PacketReader<R> {
    inner: R,
    raw_packet_size: usize,
    resync_size: usize,
    pos: Option<u64>,
}

impl<R: AsyncRead + AsyncSeek + Unpin + Send> PacketReader<R> {
    pub fn new(inner: R, resync_size: usize) -> Self {
        Self {
            inner,
            raw_packet_size: TS_PACKET_SIZE,
            resync_size,
            pos: None,
        }
    }

    pub fn raw_packet_size(&self) -> usize {
        self.raw_packet_size
    }

    pub fn set_raw_packet_size(&mut self, size: usize) {
        self.raw_packet_size = size;
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Current byte offset in the source.
    pub async fn position(&mut self) -> Result<u64> {
        match self.pos {
            Some(pos) => Ok(pos),
            None => {
                let pos = self.inner.stream_position().await?;
                self.pos = Some(pos);
                Ok(pos)
            }
        }
    }

    pub async fn seek(&mut self, pos: u64) -> Result<u64> {
        let pos = self.inner.seek(SeekFrom::Start(pos)).await?;
        self.pos = Some(pos);
        Ok(pos)
    }

    /// Total length of the source, leaving the position untouched.
    pub async fn len(&mut self) -> Result<u64> {
        let pos = self.position().await?;
        let end = self.inner.seek(SeekFrom::End(0)).await?;
        self.seek(pos).await?;
        Ok(end)
    }

    /// Reads until `buf` is full or the source ends. Returns the bytes read.
    async fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let start = self.position().await?;
        let mut filled = 0;
        while filled < buf.len() {
            let n = match self.inner.read(&mut buf[filled..]).await {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.pos = Some(start + filled as u64);
        Ok(filled)
    }

    /// Detects the packet framing from the bytes at the current position and
    /// rewinds afterwards.
    pub async fn probe_packet_size(&mut self) -> Result<Option<usize>> {
        let start = self.position().await?;
        let mut buf = vec![0u8; PROBE_PACKET_MAX_BUF];
        let n = self.fill(&mut buf).await?;
        self.seek(start).await?;
        Ok(detect_packet_size(&buf[..n]))
    }

    /// Reads the next aligned packet and the offset of its sync byte.
    /// Returns `None` at end of input, including a trailing partial packet.
    pub async fn read_packet(&mut self) -> Result<Option<(u64, [u8; TS_PACKET_SIZE])>> {
        let mut packet = [0u8; TS_PACKET_SIZE];
        loop {
            let pos = self.position().await?;
            if self.fill(&mut packet).await? != TS_PACKET_SIZE {
                return Ok(None);
            }
            if packet[0] == SYNC_BYTE {
                self.skip_trailer().await?;
                return Ok(Some((pos, packet)));
            }
            if !self.resync().await? {
                return Ok(None);
            }
        }
    }

    async fn skip_trailer(&mut self) -> Result<()> {
        let extra = self.raw_packet_size.saturating_sub(TS_PACKET_SIZE);
        if extra > 0 {
            let mut scratch = [0u8; TS_FEC_PACKET_SIZE - TS_PACKET_SIZE];
            self.fill(&mut scratch[..extra]).await?;
        }
        Ok(())
    }

    /// Rewinds by up to one packet and scans forward for a sync byte,
    /// re-probing the framing once one is found. Returns `false` at end of
    /// input.
    async fn resync(&mut self) -> Result<bool> {
        let pos = self.position().await?;
        let back = (self.raw_packet_size as u64).min(pos);
        let start = self.seek(pos - back).await?;

        let mut chunk = vec![0u8; RESYNC_CHUNK];
        let mut scanned = 0;
        while scanned < self.resync_size {
            let want = RESYNC_CHUNK.min(self.resync_size - scanned);
            let n = self.fill(&mut chunk[..want]).await?;
            if n == 0 {
                return Ok(false);
            }
            if let Some(i) = chunk[..n].iter().position(|&b| b == SYNC_BYTE) {
                let sync_pos = start + (scanned + i) as u64;
                self.seek(sync_pos).await?;
                if let Some(size) = self.probe_packet_size().await? {
                    if size != self.raw_packet_size {
                        warn!("changing packet size to {}", size);
                        self.raw_packet_size = size;
                    }
                }
                return Ok(true);
            }
            scanned += n;
        }

        error!("max resync size reached, could not find sync byte");
        Err(TsError::NoSync {
            window: self.resync_size,
        })
    }
}
