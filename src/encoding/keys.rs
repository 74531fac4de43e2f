//! Addresses, public keys and signatures

use std::fmt;
use std::str::FromStr;

use serde_with::{DeserializeFromStr, SerializeDisplay};

use super::base58::{self, Prefix};
use super::{blake2b_160, EncodingError};

/// Signature scheme behind an implicit account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImplicitKind {
    Ed25519,
    Secp256k1,
    P256,
    Bls,
}

impl ImplicitKind {
    /// Tag byte used in public key hash and public key encodings
    pub fn tag(&self) -> u8 {
        match self {
            ImplicitKind::Ed25519 => 0,
            ImplicitKind::Secp256k1 => 1,
            ImplicitKind::P256 => 2,
            ImplicitKind::Bls => 3,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ImplicitKind::Ed25519),
            1 => Some(ImplicitKind::Secp256k1),
            2 => Some(ImplicitKind::P256),
            3 => Some(ImplicitKind::Bls),
            _ => None,
        }
    }

    fn address_prefix(&self) -> Prefix {
        match self {
            ImplicitKind::Ed25519 => Prefix::Tz1,
            ImplicitKind::Secp256k1 => Prefix::Tz2,
            ImplicitKind::P256 => Prefix::Tz3,
            ImplicitKind::Bls => Prefix::Tz4,
        }
    }

    fn public_key_prefix(&self) -> Prefix {
        match self {
            ImplicitKind::Ed25519 => Prefix::Ed25519PublicKey,
            ImplicitKind::Secp256k1 => Prefix::Secp256k1PublicKey,
            ImplicitKind::P256 => Prefix::P256PublicKey,
            ImplicitKind::Bls => Prefix::BlsPublicKey,
        }
    }
}

/// Any account or contract address that can appear in an operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub enum Address {
    Implicit { kind: ImplicitKind, hash: [u8; 20] },
    Originated([u8; 20]),
    SmartRollup([u8; 20]),
}

impl Address {
    /// Parse a `tz1`/`tz2`/`tz3`/`tz4`/`KT1`/`sr1` address
    pub fn parse(value: &str) -> Result<Self, EncodingError> {
        let (prefix, kind) = match value.get(..3) {
            Some("tz1") => (Prefix::Tz1, Some(ImplicitKind::Ed25519)),
            Some("tz2") => (Prefix::Tz2, Some(ImplicitKind::Secp256k1)),
            Some("tz3") => (Prefix::Tz3, Some(ImplicitKind::P256)),
            Some("tz4") => (Prefix::Tz4, Some(ImplicitKind::Bls)),
            Some("KT1") => (Prefix::Kt1, None),
            Some("sr1") => (Prefix::SmartRollup, None),
            _ => {
                return Err(EncodingError::Prefix {
                    value: value.to_string(),
                    expected: "tz1, tz2, tz3, tz4, KT1 or sr1".to_string(),
                })
            }
        };

        let payload = base58::decode(prefix, value)?;
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload);

        Ok(match (prefix, kind) {
            (_, Some(kind)) => Address::Implicit { kind, hash },
            (Prefix::Kt1, None) => Address::Originated(hash),
            _ => Address::SmartRollup(hash),
        })
    }

    pub fn is_implicit(&self) -> bool {
        matches!(self, Address::Implicit { .. })
    }

    pub fn implicit_kind(&self) -> Option<ImplicitKind> {
        match self {
            Address::Implicit { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// 21-byte public key hash encoding, implicit accounts only
    pub fn forge_public_key_hash(&self, out: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            Address::Implicit { kind, hash } => {
                out.push(kind.tag());
                out.extend_from_slice(hash);
                Ok(())
            }
            other => Err(EncodingError::Prefix {
                value: other.to_string(),
                expected: "an implicit account".to_string(),
            }),
        }
    }

    /// 22-byte contract id encoding
    pub fn forge_contract_id(&self, out: &mut Vec<u8>) {
        match self {
            Address::Implicit { kind, hash } => {
                out.push(0x00);
                out.push(kind.tag());
                out.extend_from_slice(hash);
            }
            Address::Originated(hash) => {
                out.push(0x01);
                out.extend_from_slice(hash);
                out.push(0x00);
            }
            Address::SmartRollup(hash) => {
                out.push(0x03);
                out.extend_from_slice(hash);
                out.push(0x00);
            }
        }
    }

    /// Decode a 21-byte public key hash
    pub fn from_public_key_hash(bytes: &[u8]) -> Result<Self, EncodingError> {
        let invalid = || EncodingError::InvalidExpression(format!("bad key hash {}", hex::encode(bytes)));
        if bytes.len() != 21 {
            return Err(invalid());
        }
        let kind = ImplicitKind::from_tag(bytes[0]).ok_or_else(invalid)?;
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&bytes[1..]);
        Ok(Address::Implicit { kind, hash })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = match self {
            Address::Implicit { kind, hash } => base58::encode(kind.address_prefix(), hash),
            Address::Originated(hash) => base58::encode(Prefix::Kt1, hash),
            Address::SmartRollup(hash) => base58::encode(Prefix::SmartRollup, hash),
        };
        f.write_str(&encoded)
    }
}

impl FromStr for Address {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

/// Public key of an implicit account
#[derive(Debug, Clone, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct PublicKey {
    kind: ImplicitKind,
    bytes: Vec<u8>,
}

impl PublicKey {
    pub fn parse(value: &str) -> Result<Self, EncodingError> {
        let kind = match value.get(..4) {
            Some("edpk") => ImplicitKind::Ed25519,
            Some("sppk") => ImplicitKind::Secp256k1,
            Some("p2pk") => ImplicitKind::P256,
            Some("BLpk") => ImplicitKind::Bls,
            _ => {
                return Err(EncodingError::Prefix {
                    value: value.to_string(),
                    expected: "edpk, sppk, p2pk or BLpk".to_string(),
                })
            }
        };
        let bytes = base58::decode(kind.public_key_prefix(), value)?;
        Ok(Self { kind, bytes })
    }

    pub fn from_ed25519_bytes(bytes: [u8; 32]) -> Self {
        Self {
            kind: ImplicitKind::Ed25519,
            bytes: bytes.to_vec(),
        }
    }

    pub fn kind(&self) -> ImplicitKind {
        self.kind
    }

    /// Tag byte followed by the raw key
    pub fn forge(&self, out: &mut Vec<u8>) {
        out.push(self.kind.tag());
        out.extend_from_slice(&self.bytes);
    }

    /// Implicit account controlled by this key
    pub fn address(&self) -> Address {
        Address::Implicit {
            kind: self.kind,
            hash: blake2b_160(&self.bytes),
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base58::encode(self.kind.public_key_prefix(), &self.bytes))
    }
}

impl FromStr for PublicKey {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PublicKey::parse(s)
    }
}

/// Raw operation signature, 64 bytes (96 for BLS)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    /// Accepts `edsig`, `spsig1`, `p2sig`, `sig` and `BLsig` encodings
    pub fn parse(value: &str) -> Result<Self, EncodingError> {
        let prefix = [
            Prefix::Ed25519Signature,
            Prefix::Secp256k1Signature,
            Prefix::P256Signature,
            Prefix::BlsSignature,
            Prefix::GenericSignature,
        ]
        .into_iter()
        .find(|p| value.starts_with(p.label()))
        .ok_or_else(|| EncodingError::Prefix {
            value: value.to_string(),
            expected: "a signature".to_string(),
        })?;
        Ok(Self(base58::decode(prefix, value)?))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, EncodingError> {
        match bytes.len() {
            64 | 96 => Ok(Self(bytes)),
            n => Err(EncodingError::OutOfRange(format!("signature of {} bytes", n))),
        }
    }

    pub fn from_hex(value: &str) -> Result<Self, EncodingError> {
        Self::from_bytes(super::decode_hex(value)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}
