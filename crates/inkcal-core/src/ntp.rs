//! SNTP packet codec (RFC 4330 client subset).
//!
//! The binary owns the UDP socket; this module only builds the request and
//! validates/decodes the reply.

/// SNTP messages are exactly this long for a v4 client exchange.
pub const PACKET_LEN: usize = 48;

/// Seconds between the NTP era (1900-01-01) and the Unix epoch.
const NTP_UNIX_OFFSET: u32 = 2_208_988_800;

/// Offset of the transmit timestamp within the packet.
const XMIT_TS_OFFSET: usize = 40;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NtpError {
    /// Reply shorter than a full SNTP packet.
    Short(usize),
    /// Reply mode was not "server".
    BadMode(u8),
    /// Leap indicator says the server clock is unsynchronized.
    Unsynchronized,
    /// Stratum outside the valid 1..=15 range (0 is a kiss-of-death).
    BadStratum(u8),
    /// Transmit timestamp of zero is explicitly invalid.
    ZeroTimestamp,
}

/// Builds a client request: LI=0, version 4, mode 3, all timestamps zero.
pub fn build_request() -> [u8; PACKET_LEN] {
    let mut pkt = [0u8; PACKET_LEN];
    pkt[0] = 0b00_100_011;
    pkt
}

/// Validates a server reply and extracts the transmit timestamp as a Unix
/// epoch (UTC). The caller applies the configured GMT offset.
pub fn parse_reply(pkt: &[u8]) -> Result<i64, NtpError> {
    if pkt.len() < PACKET_LEN {
        return Err(NtpError::Short(pkt.len()));
    }

    let mode = pkt[0] & 0x07;
    if mode != 4 {
        return Err(NtpError::BadMode(mode));
    }
    if pkt[0] >> 6 == 3 {
        return Err(NtpError::Unsynchronized);
    }

    let stratum = pkt[1];
    if stratum == 0 || stratum > 15 {
        return Err(NtpError::BadStratum(stratum));
    }

    let secs = u32::from_be_bytes([
        pkt[XMIT_TS_OFFSET],
        pkt[XMIT_TS_OFFSET + 1],
        pkt[XMIT_TS_OFFSET + 2],
        pkt[XMIT_TS_OFFSET + 3],
    ]);
    if secs == 0 {
        return Err(NtpError::ZeroTimestamp);
    }

    Ok(secs as i64 - NTP_UNIX_OFFSET as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_with(epoch_unix: u32) -> [u8; PACKET_LEN] {
        let mut pkt = [0u8; PACKET_LEN];
        pkt[0] = 0b00_100_100; // LI=0, VN=4, mode=4
        pkt[1] = 2; // stratum
        let ntp_secs = epoch_unix + NTP_UNIX_OFFSET;
        pkt[XMIT_TS_OFFSET..XMIT_TS_OFFSET + 4].copy_from_slice(&ntp_secs.to_be_bytes());
        pkt
    }

    #[test]
    fn request_header_is_v4_client() {
        let pkt = build_request();
        assert_eq!(pkt.len(), PACKET_LEN);
        assert_eq!(pkt[0], 0x23);
        assert!(pkt[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn reply_round_trips_the_unix_epoch() {
        let pkt = reply_with(1_704_067_200);
        assert_eq!(parse_reply(&pkt), Ok(1_704_067_200));
    }

    #[test]
    fn short_replies_are_rejected() {
        assert_eq!(parse_reply(&[0u8; 12]), Err(NtpError::Short(12)));
    }

    #[test]
    fn client_mode_replies_are_rejected() {
        let mut pkt = reply_with(1_704_067_200);
        pkt[0] = 0b00_100_011;
        assert_eq!(parse_reply(&pkt), Err(NtpError::BadMode(3)));
    }

    #[test]
    fn alarm_condition_is_rejected() {
        let mut pkt = reply_with(1_704_067_200);
        pkt[0] |= 0b11_000_000;
        assert_eq!(parse_reply(&pkt), Err(NtpError::Unsynchronized));
    }

    #[test]
    fn kiss_of_death_is_rejected() {
        let mut pkt = reply_with(1_704_067_200);
        pkt[1] = 0;
        assert_eq!(parse_reply(&pkt), Err(NtpError::BadStratum(0)));
    }

    #[test]
    fn zero_transmit_timestamp_is_rejected() {
        let mut pkt = reply_with(1_704_067_200);
        pkt[XMIT_TS_OFFSET..XMIT_TS_OFFSET + 4].fill(0);
        assert_eq!(parse_reply(&pkt), Err(NtpError::ZeroTimestamp));
    }
}
