use crate::av::{CodecData, Packet};
use crate::Result;

pub mod ts;

/// Common trait for format demuxers
#[async_trait::async_trait]
pub trait Demuxer: Send {
    /// Probe the input and discover its streams
    async fn read_header(&mut self) -> Result<()>;

    /// Read the next packet, `None` at end of input
    async fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// Get stream information
    async fn streams(&mut self) -> Result<Vec<Box<dyn CodecData>>>;
}
