//! # Utility Functions and Types
//!
//! Primitive services shared by the parsers:
//!
//! - Byte-level bounds-checked reading
//! - Bit-level reading for packed MPEG-4 fields
//! - CRC calculation and validation
//! - Pooled payload buffers
//!
//! ## Byte reading
//!
//! ```rust
//! use tsdemux::utils::ByteReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = [0x47, 0x01, 0x00];
//! let mut reader = ByteReader::new(&data);
//! assert_eq!(reader.read_u8()?, 0x47);
//! assert_eq!(reader.read_u16()?, 0x0100);
//! assert!(reader.read_u8().is_err());
//! # Ok(())
//! # }
//! ```
//!
//! ## CRC Calculation
//!
//! ```rust
//! use tsdemux::utils::Crc32Mpeg2;
//!
//! # fn main() {
//! let crc = Crc32Mpeg2::new().calculate(b"Hello, world!");
//! println!("CRC32: {:08x}", crc);
//! # }
//! ```

/// Bit manipulation and bitstream reading utilities
pub mod bits;

/// CRC calculation implementations
pub mod crc;

/// Size-classed buffer pool
pub mod pool;

/// Bounds-checked byte cursor
pub mod reader;

// Re-export commonly used types
pub use bits::BitReader;
pub use crc::Crc32Mpeg2;
pub use pool::BufferPool;
pub use reader::ByteReader;
