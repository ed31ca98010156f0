// CRC-16/CCITT-FALSE for frame integrity checking
// Polynomial: x^16 + x^12 + x^5 + 1 (0x1021), init 0xFFFF
//
// CRC8 guards the frame header on its own
// Polynomial: x^8 + x^2 + x + 1 (0x07)

const CRC8_POLYNOMIAL: u8 = 0x07;
const CRC16_POLYNOMIAL: u16 = 0x1021;
const CRC16_INIT: u16 = 0xFFFF;

/// Calculate CRC8 checksum for given data
pub fn calculate_crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0x00;

    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ CRC8_POLYNOMIAL;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}

/// Calculate CRC16 checksum for given data
pub fn calculate_crc16(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;

    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ CRC16_POLYNOMIAL;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}

/// Verify CRC16 checksum
pub fn verify_crc16(data: &[u8], expected_crc: u16) -> bool {
    calculate_crc16(data) == expected_crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(calculate_crc16(b"123456789"), 0x29B1);
        assert_eq!(calculate_crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_crc8_check_value() {
        assert_eq!(calculate_crc8(b"123456789"), 0xF4);
        assert_eq!(calculate_crc8(&[]), 0x00);
        assert_ne!(calculate_crc8(&[0, 1]), calculate_crc8(&[0, 2]));
    }

    #[test]
    fn test_crc16() {
        let data = b"Hello, World!";
        let crc = calculate_crc16(data);
        assert!(verify_crc16(data, crc));

        // Verify that modified data fails
        let mut modified = data.to_vec();
        modified[0] = b'h';
        assert!(!verify_crc16(&modified, crc));
    }
}
