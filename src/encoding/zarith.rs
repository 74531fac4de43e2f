//! Zarith variable-length integers
//!
//! Naturals are split into 7-bit groups, least significant first, with the
//! high bit set on every byte but the last. Signed integers reserve bit 6 of
//! the first byte for the sign and carry 6 data bits there.
//!
//! Micheline integers are unbounded, so the decimal-string encoders work on
//! a digit vector instead of a fixed-width integer.

use super::EncodingError;

/// Encode an unsigned natural
pub fn write_nat(out: &mut Vec<u8>, mut value: u128) {
    loop {
        let group = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(group);
            return;
        }
        out.push(group | 0x80);
    }
}

/// Encode a signed integer
pub fn write_int(out: &mut Vec<u8>, value: i128) {
    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();

    let mut first = (magnitude & 0x3f) as u8;
    if negative {
        first |= 0x40;
    }
    magnitude >>= 6;
    if magnitude == 0 {
        out.push(first);
        return;
    }
    out.push(first | 0x80);
    write_nat(out, magnitude);
}

/// Encode an arbitrary-precision signed decimal string (Micheline `int`)
pub fn write_int_str(out: &mut Vec<u8>, value: &str) -> Result<(), EncodingError> {
    let (negative, digits) = parse_decimal(value)?;

    let (mut rest, low) = div_small(&digits, 64);
    let mut byte = low as u8;
    if negative && !digits.is_empty() {
        byte |= 0x40;
    }
    while !rest.is_empty() {
        out.push(byte | 0x80);
        let (next, group) = div_small(&rest, 128);
        byte = group as u8;
        rest = next;
    }
    out.push(byte);
    Ok(())
}

/// Decode a natural, returning the value and the number of bytes consumed
pub fn read_nat(bytes: &[u8]) -> Result<(u128, usize), EncodingError> {
    let mut value: u128 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        let shift = 7 * i as u32;
        let group = (byte & 0x7f) as u128;
        if shift >= 128 || (shift > 0 && group >> (128 - shift) != 0) {
            return Err(EncodingError::OutOfRange("zarith natural exceeds 128 bits".to_string()));
        }
        value |= group << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(EncodingError::OutOfRange("truncated zarith natural".to_string()))
}

/// Parse `-?[0-9]+` into a sign and a most-significant-first digit vector
/// with leading zeros removed (empty for zero)
fn parse_decimal(value: &str) -> Result<(bool, Vec<u8>), EncodingError> {
    let (negative, body) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    if body.is_empty() || !body.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EncodingError::Number(value.to_string()));
    }
    let digits = body
        .bytes()
        .map(|b| b - b'0')
        .skip_while(|d| *d == 0)
        .collect();
    Ok((negative, digits))
}

/// Long division of a decimal digit vector by a small divisor
fn div_small(digits: &[u8], divisor: u32) -> (Vec<u8>, u32) {
    let mut quotient = Vec::with_capacity(digits.len());
    let mut remainder = 0u32;
    for &d in digits {
        let current = remainder * 10 + d as u32;
        let q = current / divisor;
        remainder = current % divisor;
        if !(quotient.is_empty() && q == 0) {
            quotient.push(q as u8);
        }
    }
    (quotient, remainder)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nat(value: u128) -> String {
        let mut out = Vec::new();
        write_nat(&mut out, value);
        hex::encode(out)
    }

    fn int_str(value: &str) -> String {
        let mut out = Vec::new();
        write_int_str(&mut out, value).unwrap();
        hex::encode(out)
    }

    #[test]
    fn test_nat_counter_from_forged_operation() {
        // counter 8190585 as it appears in a forged transaction
        assert_eq!(nat(8190585), "f9f4f303");
        assert_eq!(nat(0), "00");
        assert_eq!(nat(127), "7f");
        assert_eq!(nat(128), "8001");
    }

    #[test]
    fn test_int_sign_bit() {
        let mut out = Vec::new();
        write_int(&mut out, -1);
        assert_eq!(hex::encode(&out), "41");

        out.clear();
        write_int(&mut out, 64);
        assert_eq!(hex::encode(&out), "8001");

        out.clear();
        write_int(&mut out, -64);
        assert_eq!(hex::encode(&out), "c001");
    }

    #[test]
    fn test_decimal_string_matches_native_encoding() {
        for value in [0i128, 1, -1, 63, 64, -65, 1_000_000, -987_654_321_012] {
            let mut native = Vec::new();
            write_int(&mut native, value);
            assert_eq!(int_str(&value.to_string()), hex::encode(native));
        }
        assert_eq!(int_str("-0"), "00");
        assert_eq!(int_str("007"), "07");
    }

    #[test]
    fn test_decimal_string_beyond_i128() {
        // 2^130 = 1361129467683753853853498429727072845824
        let encoded = int_str("1361129467683753853853498429727072845824");
        let bytes = hex::decode(&encoded).unwrap();
        assert_eq!(bytes.len(), 19);
        assert!(bytes[..18].iter().all(|b| *b == 0x80));
        assert_eq!(bytes[18], 0x20);
    }

    #[test]
    fn test_rejects_malformed_numbers() {
        let mut out = Vec::new();
        assert!(write_int_str(&mut out, "").is_err());
        assert!(write_int_str(&mut out, "12a").is_err());
        assert!(write_int_str(&mut out, "-").is_err());
    }

    #[test]
    fn test_read_nat() {
        assert_eq!(read_nat(&hex::decode("f9f4f30300").unwrap()).unwrap(), (8190585, 4));
        assert!(read_nat(&[0x80]).is_err());
    }
}
