//! Script-expression hashes (`expr...`) for big-map lookups

use super::base58::{self, Prefix};
use super::keys::Address;
use super::micheline::Micheline;
use super::{blake2b_256, EncodingError};

/// A big-map key before packing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BigMapKey {
    Int(i128),
    Nat(u128),
    String(String),
    Bool(bool),
    Bytes(Vec<u8>),
    /// Packed with the `address` type, so it hashes as raw contract id bytes
    Address(String),
    KeyHash(String),
    /// Already-typed Micheline data
    Data(Micheline),
}

impl BigMapKey {
    /// Micheline data as it would be packed for this key's type
    pub fn to_micheline(&self) -> Result<Micheline, EncodingError> {
        Ok(match self {
            BigMapKey::Int(v) => Micheline::int(v),
            BigMapKey::Nat(v) => Micheline::int(v),
            BigMapKey::String(s) => Micheline::string(s.clone()),
            BigMapKey::Bool(true) => Micheline::prim("True", vec![]),
            BigMapKey::Bool(false) => Micheline::prim("False", vec![]),
            BigMapKey::Bytes(b) => Micheline::bytes(b),
            BigMapKey::Address(value) => {
                let (address, entrypoint) = match value.split_once('%') {
                    Some((a, ep)) => (a, Some(ep)),
                    None => (value.as_str(), None),
                };
                let mut bytes = Vec::with_capacity(22);
                Address::parse(address)?.forge_contract_id(&mut bytes);
                if let Some(ep) = entrypoint.filter(|ep| *ep != "default") {
                    bytes.extend_from_slice(ep.as_bytes());
                }
                Micheline::bytes(&bytes)
            }
            BigMapKey::KeyHash(value) => {
                let mut bytes = Vec::with_capacity(21);
                Address::parse(value)?.forge_public_key_hash(&mut bytes)?;
                Micheline::bytes(&bytes)
            }
            BigMapKey::Data(data) => data.clone(),
        })
    }
}

/// `expr...` hash of a packed big-map key
pub fn to_expr(key: &BigMapKey) -> Result<String, EncodingError> {
    let packed = key.to_micheline()?.pack()?;
    Ok(base58::encode(Prefix::ScriptExpr, &blake2b_256(&packed)))
}

/// `expr...` hash of an address used as an `address`-typed key
pub fn address_to_expr(address: &str) -> Result<String, EncodingError> {
    to_expr(&BigMapKey::Address(address.to_string()))
}
