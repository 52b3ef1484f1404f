//! Modbus-RTU frame construction and response validation.
//!
//! Pure byte-level functions, no I/O. The CRC16 here is the standard Modbus
//! variant (polynomial 0xA001, seed 0xFFFF) and must stay bit-exact — real
//! slaves on the bus will silently ignore anything else.

/// Modbus CRC16 over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Build a read-request frame: 6-byte PDU `[addr, func, regHi, regLo,
/// countHi, countLo]` followed by the CRC appended little-endian.
pub fn build_request(address: u8, function: u8, register: u16, count: u16) -> Vec<u8> {
    let mut frame = vec![
        address,
        function,
        (register >> 8) as u8,
        (register & 0xFF) as u8,
        (count >> 8) as u8,
        (count & 0xFF) as u8,
    ];
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Check whether `response` is a well-formed reply to a read of `count`
/// registers from `address` with `function`.
///
/// Anything malformed — too short, wrong address or function echo, declared
/// byte count not matching `count * 2`, or a CRC mismatch — returns false.
/// The sweep treats a false here as "no device at this address".
pub fn validate_response(response: &[u8], address: u8, function: u8, count: u16) -> bool {
    if response.len() < 5 {
        return false;
    }
    if response[0] != address || response[1] != function {
        return false;
    }
    let data_len = response[2] as usize;
    let expected_len = 3 + data_len + 2;
    if data_len != count as usize * 2 || response.len() < expected_len {
        return false;
    }
    let body = &response[..expected_len - 2];
    let crc = u16::from_le_bytes([response[expected_len - 2], response[expected_len - 1]]);
    crc == crc16(body)
}

/// Extract the numeric value from a validated response.
///
/// Reads the first register as a big-endian u16; when `count > 1` and the
/// full data region is present, the whole `count * 2`-byte region is instead
/// interpreted as one big-endian unsigned integer. That conflates multiple
/// registers into a single number, which matches the wire behavior this
/// scanner has always had; callers wanting per-register values must split
/// the raw frame themselves.
pub fn parse_value(response: &[u8], count: u16) -> u64 {
    if response.len() < 3 {
        return 0;
    }
    let data_len = response[2] as usize;
    let end = (3 + data_len).min(response.len());
    let data = &response[3..end];
    if data.len() < 2 {
        return 0;
    }
    let wide = count as usize * 2;
    if count > 1 && data.len() >= wide && wide <= 8 {
        let mut value: u64 = 0;
        for &byte in &data[..wide] {
            value = (value << 8) | u64::from(byte);
        }
        value
    } else {
        u64::from(u16::from_be_bytes([data[0], data[1]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a well-formed response frame for tests.
    fn response_frame(address: u8, function: u8, data: &[u8]) -> Vec<u8> {
        let mut frame = vec![address, function, data.len() as u8];
        frame.extend_from_slice(data);
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    #[test]
    fn crc16_known_vector() {
        // Canonical "read holding register 0 of unit 1" PDU.
        let pdu = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(crc16(&pdu), 0x0A84);
    }

    #[test]
    fn build_request_appends_crc_little_endian() {
        let frame = build_request(1, 3, 0, 1);
        assert_eq!(frame, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
    }

    #[test]
    fn build_request_splits_register_and_count() {
        let frame = build_request(0x11, 0x04, 0x1234, 0x0002);
        assert_eq!(&frame[..6], &[0x11, 0x04, 0x12, 0x34, 0x00, 0x02]);
        let crc = crc16(&frame[..6]);
        assert_eq!(frame[6], (crc & 0xFF) as u8);
        assert_eq!(frame[7], (crc >> 8) as u8);
    }

    #[test]
    fn validate_accepts_well_formed_frame() {
        let frame = response_frame(3, 3, &[0x12, 0x34]);
        assert!(validate_response(&frame, 3, 3, 1));
    }

    #[test]
    fn validate_rejects_short_buffer() {
        assert!(!validate_response(&[0x03, 0x03, 0x02, 0x12], 3, 3, 1));
        assert!(!validate_response(&[], 3, 3, 1));
    }

    #[test]
    fn validate_rejects_address_and_function_mismatch() {
        let frame = response_frame(3, 3, &[0x12, 0x34]);
        assert!(!validate_response(&frame, 4, 3, 1));
        assert!(!validate_response(&frame, 3, 4, 1));
    }

    #[test]
    fn validate_rejects_wrong_byte_count() {
        // Declared data length must equal count * 2.
        let frame = response_frame(3, 3, &[0x12, 0x34]);
        assert!(!validate_response(&frame, 3, 3, 2));
    }

    #[test]
    fn validate_rejects_corrupted_crc() {
        let mut frame = response_frame(3, 3, &[0x12, 0x34]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(!validate_response(&frame, 3, 3, 1));
    }

    #[test]
    fn parse_single_register() {
        let frame = response_frame(3, 3, &[0x12, 0x34]);
        assert_eq!(parse_value(&frame, 1), 0x1234);
    }

    #[test]
    fn parse_multi_register_combines_big_endian() {
        let frame = response_frame(3, 3, &[0x00, 0x01, 0x00, 0x02]);
        assert_eq!(parse_value(&frame, 2), 0x0001_0002);
    }

    #[test]
    fn parse_short_data_yields_zero() {
        assert_eq!(parse_value(&[0x03, 0x03, 0x01, 0xFF], 1), 0);
        assert_eq!(parse_value(&[], 1), 0);
    }
}
