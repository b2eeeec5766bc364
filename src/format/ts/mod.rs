//! # MPEG Transport Stream (TS) demuxing
//!
//! The layers, bottom up:
//!
//! - [`reader`]: aligned packet reading with framing detection and resync
//! - [`filter`]: one filter per PID, continuity checking and PCR tracking
//! - [`section`]: PSI/SI section reassembly and CRC trust
//! - [`pes`]: PES reassembly and timestamp extraction
//! - [`tables`], [`descriptor`], [`stream_type`]: what the tables mean
//! - [`demuxer`]: the [`TSDemuxer`] tying it together
//! - [`raw`]: [`RawTSReader`], transport packets as they are
//!
//! ## Example
//!
//! ```rust,no_run
//! use tsdemux::config::DemuxConfig;
//! use tsdemux::format::ts::TSDemuxer;
//!
//! # async fn run() -> tsdemux::Result<()> {
//! let file = tokio::fs::File::open("capture.m2ts").await?;
//! let config = DemuxConfig {
//!     merge_pmt_versions: true,
//!     ..Default::default()
//! };
//! let mut demuxer = TSDemuxer::with_config(file, config);
//! demuxer.read_header().await?;
//! demuxer.seek(0, 90_000 * 60).await?;
//! while let Some(packet) = demuxer.read_packet().await? {
//!     let _ = (packet.stream_index, packet.pts);
//! }
//! # Ok(())
//! # }
//! ```

/// TS demuxer implementation for extracting elementary streams
pub mod demuxer;

/// Descriptor parsing into stream properties
pub mod descriptor;

/// Per-PID filters
pub mod filter;

/// MPEG-4 systems descriptors and SL packet headers
pub mod mp4;

/// Low-level TS packet parsing utilities
pub mod parser;

/// PES packet reassembly
pub mod pes;

/// Packet size detection
pub mod probe;

/// Programs announced by the PAT
pub mod program;

/// Raw transport packet reader
pub mod raw;

/// Aligned packet reading
pub mod reader;

/// Section reassembly
pub mod section;

/// Stream type tables
pub mod stream_type;

/// PSI/SI table handlers
pub mod tables;

/// Core TS types and constants
pub mod types;

#[cfg(test)]
pub(crate) mod test_util;


pub use demuxer::{IndexEntry, TSDemuxer};
pub use program::{Program, ProgramStream};
pub use raw::RawTSReader;
pub use types::{
    SDTService, TSHeader, PID_EIT, PID_NULL, PID_PAT, PID_SDT, STREAM_TYPE_AAC, STREAM_TYPE_H264,
    STREAM_TYPE_HEVC, TS_DVHS_PACKET_SIZE, TS_FEC_PACKET_SIZE, TS_PACKET_SIZE,
};
