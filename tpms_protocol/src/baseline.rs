// baseline.rs: plaintext payload + CRC-16, no authentication
//
// Anyone in radio range can read the static sensor id and pressure, and the
// CRC only catches accidental corruption. A CRC mismatch is logged but the
// report is still decoded and returned, flagged with `crc_valid = Some(false)`.
use tracing::warn;

use crate::{BASELINE_BODY_LEN, Framer, PAYLOAD_LEN, Payload, Rejection, SensorId, SensorReport};

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, MSB-first, no final XOR.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

pub fn encode(sensor_id: SensorId, pressure_psi: f64, flags: u8) -> Vec<u8> {
    let payload = Payload::new(sensor_id, pressure_psi, flags).to_bytes();
    let mut body = Vec::with_capacity(BASELINE_BODY_LEN);
    body.extend_from_slice(&payload);
    body.extend_from_slice(&crc16(&payload).to_be_bytes());
    Framer.frame(&body)
}

pub fn decode(buf: &[u8]) -> Result<SensorReport, Rejection> {
    let body = Framer.deframe(buf, BASELINE_BODY_LEN)?;

    let mut raw = [0u8; PAYLOAD_LEN];
    raw.copy_from_slice(&body[..PAYLOAD_LEN]);
    let received = u16::from_be_bytes([body[PAYLOAD_LEN], body[PAYLOAD_LEN + 1]]);
    let calculated = crc16(&raw);
    let crc_valid = received == calculated;

    let payload = Payload::from_bytes(&raw);
    if !crc_valid {
        warn!(
            sensor = %payload.sensor_id,
            received = %format!("{received:04X}"),
            calculated = %format!("{calculated:04X}"),
            "CRC mismatch; baseline report decoded anyway (untrusted)"
        );
    }

    Ok(SensorReport {
        sensor_id: payload.sensor_id,
        pressure_psi: payload.pressure_psi(),
        flags: payload.flags,
        authenticated: false,
        position: None,
        crc_valid: Some(crc_valid),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BASELINE_PACKET_LEN, PREAMBLE, SYNC_WORD};

    fn id() -> SensorId {
        SensorId::new(0xA0A6F9).unwrap()
    }

    #[test]
    fn crc_check_value() {
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn example_packet_is_byte_exact() {
        let pkt = encode(id(), 37.5, 5);
        assert_eq!(pkt.len(), BASELINE_PACKET_LEN);
        assert_eq!(&pkt[..8], &PREAMBLE);
        assert_eq!(&pkt[8..10], &SYNC_WORD);
        assert_eq!(&pkt[10..], &[0xA0, 0xA6, 0xF9, 0x05, 0x67, 0x68, 0xF0]);
    }

    #[test]
    fn decode_recovers_fields() {
        let r = decode(&encode(id(), 37.5, 5)).unwrap();
        assert_eq!(r.sensor_id, id());
        assert_eq!(r.flags, 5);
        assert!((r.pressure_psi - 37.5).abs() <= 0.19);
        assert_eq!(r.crc_valid, Some(true));
        assert!(!r.authenticated);
    }

    #[test]
    fn crc_mismatch_still_decodes() {
        let mut pkt = encode(id(), 37.5, 5);
        pkt[14] ^= 0x01; // pressure byte
        let r = decode(&pkt).unwrap();
        assert_eq!(r.crc_valid, Some(false));
        assert_eq!(r.sensor_id, id());
        assert_eq!(r.pressure_psi, 0x66 as f64 / crate::PRESSURE_SCALE);
    }

    #[test]
    fn decode_in_surrounding_noise() {
        let mut buf = vec![0x13, 0x37, 0x00];
        buf.extend(encode(id(), 32.0, 7));
        buf.extend([0xFF; 5]);
        let r = decode(&buf).unwrap();
        assert_eq!(r.flags, 7);
    }

    #[test]
    fn framing_rejections() {
        assert_eq!(decode(&[0u8; 17]), Err(Rejection::NoSyncWord));
        let pkt = encode(id(), 37.5, 5);
        assert_eq!(
            decode(&pkt[..15]),
            Err(Rejection::TooShort { needed: 7, available: 5 })
        );
    }
}
