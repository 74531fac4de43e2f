//! Base58check encoding with Tezos type prefixes

use super::EncodingError;

/// Typed base58check prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prefix {
    Tz1,
    Tz2,
    Tz3,
    Tz4,
    Kt1,
    SmartRollup,
    BlockHash,
    ProtocolHash,
    OperationHash,
    ChainId,
    ScriptExpr,
    SmartRollupCommitment,
    Ed25519PublicKey,
    Secp256k1PublicKey,
    P256PublicKey,
    BlsPublicKey,
    Ed25519Signature,
    Secp256k1Signature,
    P256Signature,
    GenericSignature,
    BlsSignature,
}

impl Prefix {
    /// Raw prefix bytes prepended before base58check encoding
    pub fn bytes(&self) -> &'static [u8] {
        match self {
            Prefix::Tz1 => &[6, 161, 159],
            Prefix::Tz2 => &[6, 161, 161],
            Prefix::Tz3 => &[6, 161, 164],
            Prefix::Tz4 => &[6, 161, 166],
            Prefix::Kt1 => &[2, 90, 121],
            Prefix::SmartRollup => &[6, 124, 117],
            Prefix::BlockHash => &[1, 52],
            Prefix::ProtocolHash => &[2, 170],
            Prefix::OperationHash => &[5, 116],
            Prefix::ChainId => &[87, 82, 0],
            Prefix::ScriptExpr => &[13, 44, 64, 27],
            Prefix::SmartRollupCommitment => &[17, 165, 134, 138],
            Prefix::Ed25519PublicKey => &[13, 15, 37, 217],
            Prefix::Secp256k1PublicKey => &[3, 254, 226, 86],
            Prefix::P256PublicKey => &[3, 178, 139, 127],
            Prefix::BlsPublicKey => &[6, 149, 135, 204],
            Prefix::Ed25519Signature => &[9, 245, 205, 134, 18],
            Prefix::Secp256k1Signature => &[13, 115, 101, 19, 63],
            Prefix::P256Signature => &[54, 240, 44, 52],
            Prefix::GenericSignature => &[4, 130, 43],
            Prefix::BlsSignature => &[40, 171, 64, 207],
        }
    }

    /// Decoded payload length in bytes
    pub fn payload_len(&self) -> usize {
        match self {
            Prefix::Tz1 | Prefix::Tz2 | Prefix::Tz3 | Prefix::Tz4 => 20,
            Prefix::Kt1 | Prefix::SmartRollup => 20,
            Prefix::BlockHash | Prefix::ProtocolHash | Prefix::OperationHash => 32,
            Prefix::ScriptExpr | Prefix::SmartRollupCommitment => 32,
            Prefix::ChainId => 4,
            Prefix::Ed25519PublicKey => 32,
            Prefix::Secp256k1PublicKey | Prefix::P256PublicKey => 33,
            Prefix::BlsPublicKey => 48,
            Prefix::Ed25519Signature
            | Prefix::Secp256k1Signature
            | Prefix::P256Signature
            | Prefix::GenericSignature => 64,
            Prefix::BlsSignature => 96,
        }
    }

    /// Human-readable leading characters of an encoded value
    pub fn label(&self) -> &'static str {
        match self {
            Prefix::Tz1 => "tz1",
            Prefix::Tz2 => "tz2",
            Prefix::Tz3 => "tz3",
            Prefix::Tz4 => "tz4",
            Prefix::Kt1 => "KT1",
            Prefix::SmartRollup => "sr1",
            Prefix::BlockHash => "B",
            Prefix::ProtocolHash => "P",
            Prefix::OperationHash => "o",
            Prefix::ChainId => "Net",
            Prefix::ScriptExpr => "expr",
            Prefix::SmartRollupCommitment => "src1",
            Prefix::Ed25519PublicKey => "edpk",
            Prefix::Secp256k1PublicKey => "sppk",
            Prefix::P256PublicKey => "p2pk",
            Prefix::BlsPublicKey => "BLpk",
            Prefix::Ed25519Signature => "edsig",
            Prefix::Secp256k1Signature => "spsig1",
            Prefix::P256Signature => "p2sig",
            Prefix::GenericSignature => "sig",
            Prefix::BlsSignature => "BLsig",
        }
    }
}

/// Encode a payload under the given prefix
pub fn encode(prefix: Prefix, payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(prefix.bytes().len() + payload.len());
    data.extend_from_slice(prefix.bytes());
    data.extend_from_slice(payload);
    bs58::encode(data).with_check().into_string()
}

/// Decode a value and strip the expected prefix, checking the payload length
pub fn decode(prefix: Prefix, value: &str) -> Result<Vec<u8>, EncodingError> {
    let raw = bs58::decode(value)
        .with_check(None)
        .into_vec()
        .map_err(|e| EncodingError::Base58 {
            value: value.to_string(),
            reason: e.to_string(),
        })?;

    let head = prefix.bytes();
    if !raw.starts_with(head) || raw.len() != head.len() + prefix.payload_len() {
        return Err(EncodingError::Prefix {
            value: value.to_string(),
            expected: prefix.label().to_string(),
        });
    }

    Ok(raw[head.len()..].to_vec())
}

/// Decode a 32-byte hash (block, protocol, operation, expression)
pub fn decode_hash(prefix: Prefix, value: &str) -> Result<[u8; 32], EncodingError> {
    let bytes = decode(prefix, value)?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| EncodingError::Prefix {
        value: value.to_string(),
        expected: prefix.label().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_hash_from_forged_branch() {
        let branch =
            hex::decode("27a9c46a954c4cdeb5f4a5750bfd9763689a678285a35a7047a09eebc2ac5fa4").unwrap();
        let encoded = encode(Prefix::BlockHash, &branch);
        assert_eq!(encoded, "BL1kUezGw5rvjTruYPgpUGAazKsgkqr1gcm4NvjmxPu9VxTfpnF");
        assert_eq!(decode_hash(Prefix::BlockHash, &encoded).unwrap().to_vec(), branch);
    }

    #[test]
    fn test_decode_rejects_wrong_prefix() {
        let err = decode(Prefix::Kt1, "tz1P2k9NurjUUCHTPBB8cPaNL25UAddyrnUa").unwrap_err();
        assert!(matches!(err, EncodingError::Prefix { .. }));
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let err = decode(Prefix::Tz1, "tz1P2k9NurjUUCHTPBB8cPaNL25UAddyrnUb").unwrap_err();
        assert!(matches!(err, EncodingError::Base58 { .. }));
    }
}
