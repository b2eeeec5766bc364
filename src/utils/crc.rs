//! CRC_32 of PSI/SI sections (ISO/IEC 13818-1 Annex A).
//!
//! Polynomial 0x04C11DB7, initial value 0xFFFFFFFF, no reflection, no final
//! XOR.

const POLYNOMIAL: u32 = 0x04c1_1db7;

const TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Section checksum calculator.
///
/// The lookup table is built at compile time, so the calculator itself is
/// free to create and copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32Mpeg2;

impl Crc32Mpeg2 {
    pub fn new() -> Self {
        Self
    }

    /// Checksum over `data`.
    ///
    /// ```
    /// use tsdemux::utils::Crc32Mpeg2;
    ///
    /// assert_eq!(Crc32Mpeg2::new().calculate(&[0x01, 0x01]), 0xd66f_b816);
    /// ```
    pub fn calculate(&self, data: &[u8]) -> u32 {
        data.iter().fold(0xffff_ffff, |crc, &byte| {
            (crc << 8) ^ TABLE[((crc >> 24) as u8 ^ byte) as usize]
        })
    }

    /// Checks a complete section whose last four bytes are its CRC_32 field.
    /// The checksum over the whole section is zero exactly when they match.
    pub fn verify(&self, section: &[u8]) -> bool {
        section.len() >= 4 && self.calculate(section) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_known_vectors() {
        let crc = Crc32Mpeg2::new();
        assert_eq!(crc.calculate(&[0x01, 0x01]), 0xd66f_b816);
        assert_eq!(crc.calculate(b"123456789"), 0x0376_e6e7);
        assert_eq!(crc.calculate(&[]), 0xffff_ffff);
    }

    #[test]
    fn test_verify_pat_section() {
        let crc = Crc32Mpeg2::new();
        // program 1 on PMT PID 0x100
        let mut pat = vec![0x00, 0xb0, 0x0d, 0x00, 0x01, 0xc1, 0x00, 0x00, 0x00, 0x01, 0xe1, 0x00];
        let value = crc.calculate(&pat);
        pat.extend_from_slice(&value.to_be_bytes());
        assert!(crc.verify(&pat));

        pat[9] ^= 0x01;
        assert!(!crc.verify(&pat));
        assert!(!crc.verify(&[0x00, 0x00]));
    }
}
