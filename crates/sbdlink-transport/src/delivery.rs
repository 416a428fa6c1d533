//! Helpers shared by the mobile-originated receivers (webhook and feed).

use std::time::{Duration, SystemTime};

use bytes::{BufMut, Bytes, BytesMut};
use chrono::NaiveDateTime;

use crate::error::{Result, TransportError};

/// Rock7 `transmit_time` format, always UTC: `24-03-05 14:07:31`.
const TRANSMIT_TIME_FORMAT: &str = "%y-%m-%d %H:%M:%S";

pub fn parse_transmit_time(text: &str) -> Result<SystemTime> {
    let trimmed = text.trim();
    let naive = NaiveDateTime::parse_from_str(trimmed, TRANSMIT_TIME_FORMAT)
        .map_err(|_| TransportError::InvalidTimestamp(trimmed.to_string()))?;
    Ok(naive.and_utc().into())
}

/// Whether a block sent at `sent` is older than `max_age` at `now`.
///
/// Timestamps in the future (clock skew) are never too old.
pub fn is_too_old(sent: SystemTime, now: SystemTime, max_age: Duration) -> bool {
    now.duration_since(sent)
        .map(|age| age > max_age)
        .unwrap_or(false)
}

/// Re-insert the MAVLink2 start marker and incompat flags that a vehicle
/// strips to save credits.
///
/// The trimmed form is `len compat seq sysid compid msgid… payload crc`.
pub fn restore_trimmed_v2_header(trimmed: &[u8]) -> Bytes {
    let Some((&len, rest)) = trimmed.split_first() else {
        return Bytes::new();
    };
    let mut packet = BytesMut::with_capacity(trimmed.len() + 2);
    packet.put_u8(0xFD);
    packet.put_u8(len);
    packet.put_u8(0x00);
    packet.put_slice(rest);
    packet.freeze()
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;

    #[test]
    fn parses_rock7_transmit_time() {
        let at = parse_transmit_time("24-03-05 14:07:31").unwrap();
        assert_eq!(
            at.duration_since(UNIX_EPOCH).unwrap().as_secs(),
            1_709_647_651
        );
        assert!(matches!(
            parse_transmit_time("2024-03-05T14:07:31Z"),
            Err(TransportError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn age_check() {
        let now = UNIX_EPOCH + Duration::from_secs(10_000);
        let five_min = Duration::from_secs(300);
        assert!(!is_too_old(now - Duration::from_secs(299), now, five_min));
        assert!(is_too_old(now - Duration::from_secs(301), now, five_min));
        assert!(!is_too_old(now + Duration::from_secs(60), now, five_min));
    }

    #[test]
    fn restores_trimmed_header() {
        let trimmed = [0x02, 0x00, 0x07, 0x01, 0x01, 0x00, 0x00, 0x00, 0xAA, 0xBB, 0x12, 0x34];
        let packet = restore_trimmed_v2_header(&trimmed);
        assert_eq!(&packet[..4], &[0xFD, 0x02, 0x00, 0x00]);
        assert_eq!(packet.len(), trimmed.len() + 2);
        assert_eq!(&packet[3..], &trimmed[1..]);
    }
}
