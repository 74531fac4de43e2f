//! Wire codecs for the Tezos operation format
//!
//! - base58check strings with typed prefixes (addresses, hashes, keys)
//! - zarith variable-length naturals and integers
//! - Micheline binary encoding plus a Michelson text parser
//! - script-expression hashes used as big-map keys

use thiserror::Error;

pub mod base58;
pub mod expr;
pub mod keys;
pub mod micheline;
pub mod parser;
pub mod zarith;

pub use base58::Prefix;
pub use expr::{address_to_expr, to_expr, BigMapKey};
pub use keys::{Address, ImplicitKind, PublicKey, Signature};
pub use micheline::Micheline;
pub use parser::{parse_expression, parse_script};

/// Errors raised while decoding or encoding wire values
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Invalid base58check value '{value}': {reason}")]
    Base58 { value: String, reason: String },

    #[error("Unexpected prefix for '{value}' (expected {expected})")]
    Prefix { value: String, expected: String },

    #[error("Invalid hex: {0}")]
    Hex(String),

    #[error("Invalid number '{0}'")]
    Number(String),

    #[error("Michelson parse error at offset {offset}: {reason}")]
    Parse { offset: usize, reason: String },

    #[error("Unknown Michelson primitive '{0}'")]
    UnknownPrimitive(String),

    #[error("Invalid Micheline expression: {0}")]
    InvalidExpression(String),

    #[error("Value out of range: {0}")]
    OutOfRange(String),
}

/// Decode lowercase or uppercase hex, rejecting odd lengths
pub fn decode_hex(value: &str) -> Result<Vec<u8>, EncodingError> {
    hex::decode(value).map_err(|e| EncodingError::Hex(format!("{}: {}", value, e)))
}

/// Append a big-endian u32 length prefix followed by the payload
pub(crate) fn write_dynamic(out: &mut Vec<u8>, payload: &[u8]) -> Result<(), EncodingError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| EncodingError::OutOfRange(format!("payload of {} bytes", payload.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

/// 32-byte blake2b digest
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    use blake2::digest::consts::U32;
    use blake2::{Blake2b, Digest};

    let mut out = [0u8; 32];
    out.copy_from_slice(Blake2b::<U32>::digest(data).as_slice());
    out
}

/// 20-byte blake2b digest, used for public key hashes
pub fn blake2b_160(data: &[u8]) -> [u8; 20] {
    use blake2::digest::consts::U20;
    use blake2::{Blake2b, Digest};

    let mut out = [0u8; 20];
    out.copy_from_slice(Blake2b::<U20>::digest(data).as_slice());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_dynamic_prefixes_length() {
        let mut out = Vec::new();
        write_dynamic(&mut out, &[0xaa, 0xbb]).unwrap();
        assert_eq!(out, vec![0, 0, 0, 2, 0xaa, 0xbb]);
    }

    #[test]
    fn test_decode_hex_rejects_odd_length() {
        assert!(decode_hex("abc").is_err());
        assert_eq!(decode_hex("00ff").unwrap(), vec![0x00, 0xff]);
    }

    #[test]
    fn test_blake2b_256_empty_input() {
        assert_eq!(
            hex::encode(blake2b_256(b"")),
            "0e5751c026e543b2e8ab2eb06099daa1d1e5df47778f7787faab45cdf12fe3a8"
        );
    }
}
