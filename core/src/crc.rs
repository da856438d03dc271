//! STM32 hardware-compatible CRC32
//!
//! The target boards verify a firmware image with the STM32 CRC peripheral:
//! polynomial 0x04C11DB7, initial value 0xFFFFFFFF, no reflection, no final
//! XOR, fed one little-endian 32-bit word at a time. The nibble table below
//! must stay bit-identical to the device side.

use crate::codec::LittleEndian;
use crate::BlueStError;

/// Initial CRC register value
pub const STM32_CRC_INITIAL_VALUE: u32 = 0xFFFF_FFFF;

const CRC_TABLE: [u32; 16] = [
    0x0000_0000, 0x04C1_1DB7, 0x0982_3B6E, 0x0D43_26D9,
    0x1304_76DC, 0x17C5_6B6B, 0x1A86_4DB2, 0x1E47_5005,
    0x2608_EDB8, 0x22C9_F00F, 0x2F8A_D6D6, 0x2B4B_CB61,
    0x350C_9B64, 0x31CD_86D3, 0x3C8E_A00A, 0x384F_BDBD,
];

/// Running STM32 CRC32 over word-aligned input
#[derive(Debug, Clone)]
pub struct Stm32Crc32 {
    current: u32,
}

impl Default for Stm32Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Stm32Crc32 {
    pub fn new() -> Self {
        Self {
            current: STM32_CRC_INITIAL_VALUE,
        }
    }

    /// One-shot CRC of `data`.
    pub fn checksum(data: &[u8]) -> Result<u32, BlueStError> {
        let mut crc = Self::new();
        crc.update(data)?;
        Ok(crc.value())
    }

    /// Absorb `data`; its length must be a multiple of 4.
    ///
    /// A misaligned buffer is rejected whole, leaving the running value
    /// untouched.
    pub fn update(&mut self, data: &[u8]) -> Result<(), BlueStError> {
        if data.len() % 4 != 0 {
            return Err(BlueStError::InvalidLength(data.len()));
        }
        for offset in (0..data.len()).step_by(4) {
            let word = LittleEndian::read_u32(data, offset)?;
            self.current = Self::absorb_word(self.current, word);
        }
        Ok(())
    }

    pub fn value(&self) -> u32 {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = STM32_CRC_INITIAL_VALUE;
    }

    fn absorb_word(crc: u32, word: u32) -> u32 {
        let mut crc = crc ^ word;
        for _ in 0..8 {
            crc = (crc << 4) ^ CRC_TABLE[(crc >> 28) as usize];
        }
        crc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_keeps_initial_value() {
        assert_eq!(Stm32Crc32::checksum(&[]).expect("crc"), 0xFFFF_FFFF);
    }

    #[test]
    fn test_golden_zero_word() {
        // Value produced by the STM32 CRC unit for a single 0x00000000 word.
        assert_eq!(Stm32Crc32::checksum(&[0, 0, 0, 0]).expect("crc"), 0xC704_DD7B);
    }

    #[test]
    fn test_golden_values() {
        assert_eq!(
            Stm32Crc32::checksum(&[0x01, 0x02, 0x03, 0x04]).expect("crc"),
            0x1DAB_E74F
        );
        assert_eq!(Stm32Crc32::checksum(b"12345678").expect("crc"), 0xFEFC_54F9);
        let counting: Vec<u8> = (0u8..16).collect();
        assert_eq!(Stm32Crc32::checksum(&counting).expect("crc"), 0x081B_46CA);
        assert_eq!(Stm32Crc32::checksum(&[0xFF; 4]).expect("crc"), 0x0000_0000);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data: Vec<u8> = (0u8..64).collect();
        let mut crc = Stm32Crc32::new();
        for chunk in data.chunks(8) {
            crc.update(chunk).expect("aligned chunk");
        }
        assert_eq!(crc.value(), Stm32Crc32::checksum(&data).expect("crc"));
    }

    #[test]
    fn test_misaligned_input_rejected() {
        let mut crc = Stm32Crc32::new();
        match crc.update(&[1, 2, 3]) {
            Err(BlueStError::InvalidLength(len)) => assert_eq!(len, 3),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(crc.value(), STM32_CRC_INITIAL_VALUE);
    }

    #[test]
    fn test_reset() {
        let mut crc = Stm32Crc32::new();
        crc.update(&[9, 9, 9, 9]).expect("crc");
        crc.reset();
        assert_eq!(crc.value(), STM32_CRC_INITIAL_VALUE);
    }
}
