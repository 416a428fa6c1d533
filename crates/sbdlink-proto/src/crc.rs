//! MAVLink X.25 checksum (CRC-16/MCRF4XX seeded with a per-message byte).

use crc::{Crc, CRC_16_MCRF4XX};

const X25: Crc<u16> = Crc::<u16>::new(&CRC_16_MCRF4XX);

/// Checksum over the packet bytes after the start marker, finished with the
/// message's CRC_EXTRA seed.
pub fn checksum(header_and_payload: &[u8], crc_extra: u8) -> u16 {
    let mut digest = X25.digest();
    digest.update(header_and_payload);
    digest.update(&[crc_extra]);
    digest.finalize()
}
