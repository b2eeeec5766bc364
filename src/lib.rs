#![doc(html_root_url = "https://docs.rs/tsdemux/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # tsdemux - MPEG-2 Transport Stream demultiplexer
//!
//! `tsdemux` turns an MPEG-2 transport stream (broadcast captures, Blu-ray
//! M2TS files, IPTV recordings) into elementary stream packets with their
//! timestamps.
//!
//! ## Features
//!
//! - Packet size detection for 188, 192 and 204 byte framings, with
//!   resynchronisation after garbage
//! - PSI/SI section reassembly with CRC checking and version tracking
//! - PAT, PMT, SDT, EIT and SCTE-35 handling
//! - PES reassembly with PTS/DTS, MPEG-4 SL headers and subtitle timing fixes
//! - Descriptor-driven codec, language and disposition detection
//! - Program and stream discard, timestamp seeking
//! - A raw mode that hands out the transport packets themselves
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tsdemux::format::ts::TSDemuxer;
//! use tokio::fs::File;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let file = File::open("capture.ts").await?;
//!     let mut demuxer = TSDemuxer::new(file);
//!     demuxer.read_header().await?;
//!
//!     for stream in demuxer.streams() {
//!         println!("stream {} on pid {:#x}: {:?}", stream.index, stream.pid, stream.codec_id);
//!     }
//!     while let Some(packet) = demuxer.read_packet().await? {
//!         println!("stream {} pts {:?} {} bytes", packet.stream_index, packet.pts, packet.data.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `av`: packets, streams and codec identifiers
//! - `format`: the [`Demuxer`](format::Demuxer) trait and the transport
//!   stream implementation
//! - `config`: demuxer options, from defaults, environment and config files
//! - `error`: the crate error type
//! - `utils`: byte and bit readers, CRC, buffer pool

/// Packets, streams and codec identifiers
pub mod av;

/// Demuxer options
pub mod config;

/// Error types and utilities
pub mod error;

/// Container formats
pub mod format;

/// Common utilities and helper functions
pub mod utils;

pub use error::{Result, TsError};
