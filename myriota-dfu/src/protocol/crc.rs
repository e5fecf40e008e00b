//! Block checksums used by XMODEM.

/// CRC-16/XMODEM (poly 0x1021, init 0x0000, no reflection).
///
/// Computed a byte at a time with the nibble-shift formulation, so no lookup
/// table is needed.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;

    for &byte in data {
        let mut code = (crc >> 8) ^ u16::from(byte);
        code ^= code >> 4;
        crc = (crc << 8) ^ code ^ (code << 5) ^ (code << 12);
    }

    crc
}

/// Arithmetic sum of all bytes modulo 256 (XMODEM checksum mode).
pub fn checksum8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |sum, &b| sum.wrapping_add(b))
}
