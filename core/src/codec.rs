//! Byte codec: fixed-width integer and float conversions over byte ranges
//!
//! Every decoder in the SDK reads its fields through these helpers so that a
//! short buffer always surfaces as `BlueStError::InsufficientData` instead of
//! a slice panic.

use crate::BlueStError;

/// Borrow exactly `N` bytes starting at `offset`.
fn take<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], BlueStError> {
    let available = data.len().saturating_sub(offset);
    data.get(offset..offset.saturating_add(N))
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(BlueStError::InsufficientData {
            needed: N,
            available,
        })
}

/// Check that at least `needed` bytes remain after `offset`.
pub fn ensure_available(data: &[u8], offset: usize, needed: usize) -> Result<(), BlueStError> {
    let available = data.len().saturating_sub(offset);
    if available < needed {
        return Err(BlueStError::InsufficientData { needed, available });
    }
    Ok(())
}

/// Read a single unsigned byte.
pub fn read_u8(data: &[u8], offset: usize) -> Result<u8, BlueStError> {
    Ok(take::<1>(data, offset)?[0])
}

/// Little-endian conversions (the byte order of every BlueST payload).
pub struct LittleEndian;

impl LittleEndian {
    pub fn read_u16(data: &[u8], offset: usize) -> Result<u16, BlueStError> {
        Ok(u16::from_le_bytes(take(data, offset)?))
    }

    pub fn read_i16(data: &[u8], offset: usize) -> Result<i16, BlueStError> {
        Ok(i16::from_le_bytes(take(data, offset)?))
    }

    pub fn read_u32(data: &[u8], offset: usize) -> Result<u32, BlueStError> {
        Ok(u32::from_le_bytes(take(data, offset)?))
    }

    pub fn read_i32(data: &[u8], offset: usize) -> Result<i32, BlueStError> {
        Ok(i32::from_le_bytes(take(data, offset)?))
    }

    pub fn read_f32(data: &[u8], offset: usize) -> Result<f32, BlueStError> {
        Ok(f32::from_le_bytes(take(data, offset)?))
    }

    pub fn u16_bytes(value: u16) -> [u8; 2] {
        value.to_le_bytes()
    }

    pub fn i16_bytes(value: i16) -> [u8; 2] {
        value.to_le_bytes()
    }

    pub fn u32_bytes(value: u32) -> [u8; 4] {
        value.to_le_bytes()
    }

    pub fn i32_bytes(value: i32) -> [u8; 4] {
        value.to_le_bytes()
    }

    pub fn f32_bytes(value: f32) -> [u8; 4] {
        value.to_le_bytes()
    }
}

/// Big-endian conversions (advertising feature mask).
pub struct BigEndian;

impl BigEndian {
    pub fn read_u16(data: &[u8], offset: usize) -> Result<u16, BlueStError> {
        Ok(u16::from_be_bytes(take(data, offset)?))
    }

    pub fn read_i16(data: &[u8], offset: usize) -> Result<i16, BlueStError> {
        Ok(i16::from_be_bytes(take(data, offset)?))
    }

    pub fn read_u32(data: &[u8], offset: usize) -> Result<u32, BlueStError> {
        Ok(u32::from_be_bytes(take(data, offset)?))
    }

    pub fn read_i32(data: &[u8], offset: usize) -> Result<i32, BlueStError> {
        Ok(i32::from_be_bytes(take(data, offset)?))
    }

    pub fn read_f32(data: &[u8], offset: usize) -> Result<f32, BlueStError> {
        Ok(f32::from_be_bytes(take(data, offset)?))
    }

    pub fn u16_bytes(value: u16) -> [u8; 2] {
        value.to_be_bytes()
    }

    pub fn u32_bytes(value: u32) -> [u8; 4] {
        value.to_be_bytes()
    }

    pub fn f32_bytes(value: f32) -> [u8; 4] {
        value.to_be_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_reads_at_offset() {
        let data = [0xAA, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        assert_eq!(LittleEndian::read_u16(&data, 1).expect("u16"), 0x1234);
        assert_eq!(LittleEndian::read_u32(&data, 3).expect("u32"), 0x1234_5678);
    }

    #[test]
    fn test_signed_values() {
        let data = LittleEndian::i16_bytes(-1234);
        assert_eq!(LittleEndian::read_i16(&data, 0).expect("i16"), -1234);

        let data = LittleEndian::i32_bytes(-100_000);
        assert_eq!(LittleEndian::read_i32(&data, 0).expect("i32"), -100_000);
    }

    #[test]
    fn test_big_endian_mask() {
        let data = [0x00, 0xE0, 0x00, 0x00];
        assert_eq!(BigEndian::read_u32(&data, 0).expect("u32"), 0x00E0_0000);
        assert_eq!(BigEndian::u32_bytes(0x00E0_0000), data);
    }

    #[test]
    fn test_float_roundtrip_both_orders() {
        let le = LittleEndian::f32_bytes(3.5);
        let be = BigEndian::f32_bytes(3.5);
        assert_eq!(LittleEndian::read_f32(&le, 0).expect("le"), 3.5);
        assert_eq!(BigEndian::read_f32(&be, 0).expect("be"), 3.5);
    }

    #[test]
    fn test_short_buffer_reports_available_bytes() {
        let data = [0x01, 0x02, 0x03];
        match LittleEndian::read_u32(&data, 1) {
            Err(BlueStError::InsufficientData { needed, available }) => {
                assert_eq!(needed, 4);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_offset_past_end() {
        let data = [0x01];
        assert!(read_u8(&data, 5).is_err());
        assert!(ensure_available(&data, 5, 1).is_err());
        assert!(ensure_available(&data, 0, 1).is_ok());
    }
}
