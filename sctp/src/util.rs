use bytes::Bytes;
use crc::{Crc, CRC_32_ISCSI};

pub(crate) const PADDING_MULTIPLE: usize = 4;

pub(crate) fn get_padding_size(len: usize) -> usize {
    (PADDING_MULTIPLE - (len % PADDING_MULTIPLE)) % PADDING_MULTIPLE
}

/// Allocate and zero this data once.
/// We need to use it for the checksum and don't want to allocate/clear each time.
pub(crate) static FOUR_ZEROES: Bytes = Bytes::from_static(&[0, 0, 0, 0]);

pub(crate) const ISCSI_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Fastest way to do a crc32 without allocating.
pub(crate) fn generate_packet_checksum(raw: &Bytes) -> u32 {
    let mut digest = ISCSI_CRC.digest();
    digest.update(&raw[0..8]);
    digest.update(&FOUR_ZEROES[..]);
    digest.update(&raw[12..]);
    digest.finalize()
}

/// Serial Number Arithmetic (RFC 1982)
#[inline]
pub(crate) fn sna32lt(i1: u32, i2: u32) -> bool {
    (i1 < i2 && i2 - i1 < 1 << 31) || (i1 > i2 && i1 - i2 > 1 << 31)
}

#[inline]
pub(crate) fn sna32lte(i1: u32, i2: u32) -> bool {
    i1 == i2 || sna32lt(i1, i2)
}

#[inline]
pub(crate) fn sna32gt(i1: u32, i2: u32) -> bool {
    (i1 < i2 && (i2 - i1) >= 1 << 31) || (i1 > i2 && (i1 - i2) <= 1 << 31)
}

#[inline]
pub(crate) fn sna32gte(i1: u32, i2: u32) -> bool {
    i1 == i2 || sna32gt(i1, i2)
}

#[inline]
pub(crate) fn sna16lt(i1: u16, i2: u16) -> bool {
    (i1 < i2 && (i2 - i1) < 1 << 15) || (i1 > i2 && (i1 - i2) > 1 << 15)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_padding() {
        let tests = vec![(0, 0), (1, 3), (2, 2), (3, 1), (4, 0), (5, 3), (6, 2), (7, 1), (8, 0)];
        for (len, expected) in tests {
            assert_eq!(get_padding_size(len), expected, "padding of {len}");
        }
    }

    #[test]
    fn test_serial_number_arithmetic_wrap() {
        // comparisons behave across the 2^32 wrap
        assert!(sna32lt(u32::MAX, 0));
        assert!(sna32gt(0, u32::MAX));
        assert!(sna32lt(u32::MAX - 1, 1));
        assert!(!sna32lt(1, u32::MAX - 1));
        assert!(sna32gte(5, 5));
        assert!(sna32lte(5, 5));
    }

    #[test]
    fn test_serial_number_arithmetic_basic() {
        assert!(sna32lt(1, 2));
        assert!(!sna32lt(2, 1));
        assert!(sna32gt(2, 1));
        assert!(sna16lt(1, 2));
        assert!(sna16lt(u16::MAX, 0));
    }
}
