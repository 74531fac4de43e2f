//! Micheline expressions: JSON shape, binary encoding, packing
//!
//! The JSON form is the one the node speaks (`{"prim": ..., "args": [...]}`,
//! `{"int": "1"}`, `{"string": ".."}`, `{"bytes": ".."}` or an array for a
//! sequence). Binary encoding follows the node's Micheline schema with one tag
//! byte per node shape.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{write_dynamic, zarith, EncodingError};

/// A Micheline node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Micheline {
    Int {
        int: String,
    },
    String {
        string: String,
    },
    Bytes {
        bytes: String,
    },
    Prim {
        prim: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<Micheline>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        annots: Vec<String>,
    },
    Seq(Vec<Micheline>),
}

/// Primitive names indexed by their one-byte binary code
const PRIMITIVES: &[&str] = &[
    "parameter", "storage", "code", "False", "Elt", "Left", "None", "Pair", "Right", "Some",
    "True", "Unit", "PACK", "UNPACK", "BLAKE2B", "SHA256", "SHA512", "ABS", "ADD", "AMOUNT",
    "AND", "BALANCE", "CAR", "CDR", "CHECK_SIGNATURE", "COMPARE", "CONCAT", "CONS",
    "CREATE_ACCOUNT", "CREATE_CONTRACT", "IMPLICIT_ACCOUNT", "DIP", "DROP", "DUP", "EDIV",
    "EMPTY_MAP", "EMPTY_SET", "EQ", "EXEC", "FAILWITH", "GE", "GET", "GT", "HASH_KEY", "IF",
    "IF_CONS", "IF_LEFT", "IF_NONE", "INT", "LAMBDA", "LE", "LEFT", "LOOP", "LSL", "LSR", "LT",
    "MAP", "MEM", "MUL", "NEG", "NEQ", "NIL", "NONE", "NOT", "NOW", "OR", "PAIR", "PUSH",
    "RIGHT", "SIZE", "SOME", "SOURCE", "SENDER", "SELF", "STEPS_TO_QUOTA", "SUB", "SWAP",
    "TRANSFER_TOKENS", "SET_DELEGATE", "UNIT", "UPDATE", "XOR", "ITER", "LOOP_LEFT", "ADDRESS",
    "CONTRACT", "ISNAT", "CAST", "RENAME", "bool", "contract", "int", "key", "key_hash",
    "lambda", "list", "map", "big_map", "nat", "option", "or", "pair", "set", "signature",
    "string", "bytes", "mutez", "timestamp", "unit", "operation", "address", "SLICE", "DIG",
    "DUG", "EMPTY_BIG_MAP", "APPLY", "chain_id", "CHAIN_ID", "LEVEL", "SELF_ADDRESS", "never",
    "NEVER", "UNPAIR", "VOTING_POWER", "TOTAL_VOTING_POWER", "KECCAK", "SHA3", "PAIRING_CHECK",
    "bls12_381_g1", "bls12_381_g2", "bls12_381_fr", "sapling_state",
    "sapling_transaction_deprecated", "SAPLING_EMPTY_STATE", "SAPLING_VERIFY_UPDATE", "ticket",
    "TICKET_DEPRECATED", "READ_TICKET", "SPLIT_TICKET", "JOIN_TICKETS", "GET_AND_UPDATE",
    "chest", "chest_key", "OPEN_CHEST", "VIEW", "view", "constant", "SUB_MUTEZ",
    "tx_rollup_l2_address", "MIN_BLOCK_TIME", "sapling_transaction", "EMIT", "Lambda_rec",
    "LAMBDA_REC", "TICKET", "BYTES", "NAT", "Ticket",
];

/// Binary code of a primitive, if it is known
pub fn prim_code(name: &str) -> Option<u8> {
    PRIMITIVES.iter().position(|p| *p == name).map(|i| i as u8)
}

impl Micheline {
    pub fn int(value: impl ToString) -> Self {
        Micheline::Int { int: value.to_string() }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Micheline::String { string: value.into() }
    }

    pub fn bytes(value: &[u8]) -> Self {
        Micheline::Bytes { bytes: hex::encode(value) }
    }

    pub fn prim(name: &str, args: Vec<Micheline>) -> Self {
        Micheline::Prim {
            prim: name.to_string(),
            args,
            annots: Vec::new(),
        }
    }

    pub fn prim_name(&self) -> Option<&str> {
        match self {
            Micheline::Prim { prim, .. } => Some(prim),
            _ => None,
        }
    }

    pub fn args(&self) -> &[Micheline] {
        match self {
            Micheline::Prim { args, .. } => args,
            _ => &[],
        }
    }

    /// Append the binary encoding of this node
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            Micheline::Int { int } => {
                out.push(0x00);
                zarith::write_int_str(out, int)?;
            }
            Micheline::String { string } => {
                out.push(0x01);
                write_dynamic(out, string.as_bytes())?;
            }
            Micheline::Seq(items) => {
                out.push(0x02);
                let mut body = Vec::new();
                for item in items {
                    item.encode(&mut body)?;
                }
                write_dynamic(out, &body)?;
            }
            Micheline::Prim { prim, args, annots } => {
                let code = prim_code(prim).ok_or_else(|| EncodingError::UnknownPrimitive(prim.clone()))?;
                let has_annots = !annots.is_empty();
                let joined = annots.join(" ");

                match args.len() {
                    0..=2 => {
                        // 0x03..0x08: (args, annots) -> 3 + 2 * args + annots
                        out.push(0x03 + 2 * args.len() as u8 + has_annots as u8);
                        out.push(code);
                        for arg in args {
                            arg.encode(out)?;
                        }
                        if has_annots {
                            write_dynamic(out, joined.as_bytes())?;
                        }
                    }
                    _ => {
                        out.push(0x09);
                        out.push(code);
                        let mut body = Vec::new();
                        for arg in args {
                            arg.encode(&mut body)?;
                        }
                        write_dynamic(out, &body)?;
                        write_dynamic(out, joined.as_bytes())?;
                    }
                }
            }
            Micheline::Bytes { bytes } => {
                out.push(0x0a);
                write_dynamic(out, &super::decode_hex(bytes)?)?;
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        let mut out = Vec::new();
        self.encode(&mut out)?;
        Ok(out)
    }

    /// `0x05` packing prefix followed by the binary encoding
    pub fn pack(&self) -> Result<Vec<u8>, EncodingError> {
        let mut out = vec![0x05];
        self.encode(&mut out)?;
        Ok(out)
    }

    /// Hashes referenced by `constant "expr..."` placeholders, in visit order
    pub fn global_constants(&self) -> Vec<String> {
        let mut found = Vec::new();
        self.collect_constants(&mut found);
        found
    }

    fn collect_constants(&self, found: &mut Vec<String>) {
        match self {
            Micheline::Prim { prim, args, .. } => {
                if prim == "constant" {
                    if let [Micheline::String { string }] = args.as_slice() {
                        if !found.contains(string) {
                            found.push(string.clone());
                        }
                        return;
                    }
                }
                for arg in args {
                    arg.collect_constants(found);
                }
            }
            Micheline::Seq(items) => {
                for item in items {
                    item.collect_constants(found);
                }
            }
            _ => {}
        }
    }

    /// Replace every global constant placeholder with its registered value.
    /// Expanded values may themselves reference constants.
    pub fn expand_constants(&self, values: &HashMap<String, Micheline>) -> Result<Micheline, EncodingError> {
        self.expand_constants_depth(values, 0)
    }

    fn expand_constants_depth(
        &self,
        values: &HashMap<String, Micheline>,
        depth: usize,
    ) -> Result<Micheline, EncodingError> {
        if depth > 32 {
            return Err(EncodingError::InvalidExpression(
                "global constant expansion is too deep".to_string(),
            ));
        }
        match self {
            Micheline::Prim { prim, args, annots } => {
                if prim == "constant" {
                    if let [Micheline::String { string }] = args.as_slice() {
                        let value = values.get(string).ok_or_else(|| {
                            EncodingError::InvalidExpression(format!("unresolved global constant {}", string))
                        })?;
                        return value.expand_constants_depth(values, depth + 1);
                    }
                }
                let args = args
                    .iter()
                    .map(|a| a.expand_constants_depth(values, depth))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Micheline::Prim {
                    prim: prim.clone(),
                    args,
                    annots: annots.clone(),
                })
            }
            Micheline::Seq(items) => Ok(Micheline::Seq(
                items
                    .iter()
                    .map(|i| i.expand_constants_depth(values, depth))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            other => Ok(other.clone()),
        }
    }
}

/// Order top-level script sections as `parameter`, `storage`, `code`,
/// keeping any other section (views) after them in their original order
pub fn sort_script_sections(mut sections: Vec<Micheline>) -> Vec<Micheline> {
    sections.sort_by_key(|s| match s.prim_name() {
        Some("parameter") => 0,
        Some("storage") => 1,
        Some("code") => 2,
        _ => 3,
    });
    sections
}

/// Type expression of the `storage` section, if present
pub fn storage_type(sections: &[Micheline]) -> Option<&Micheline> {
    sections
        .iter()
        .find(|s| s.prim_name() == Some("storage"))
        .and_then(|s| s.args().first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encoded(value: &Micheline) -> String {
        hex::encode(value.to_bytes().unwrap())
    }

    #[test]
    fn test_json_shapes_deserialize() {
        let value: Micheline = serde_json::from_value(json!([
            { "prim": "Pair", "args": [{ "int": "1" }, { "string": "a" }] },
            { "bytes": "00ff" },
            { "prim": "Unit" }
        ]))
        .unwrap();

        let Micheline::Seq(items) = &value else {
            panic!("expected a sequence");
        };
        assert_eq!(items[0].prim_name(), Some("Pair"));
        assert_eq!(items[0].args()[0], Micheline::int(1));
        assert_eq!(items[1], Micheline::bytes(&[0x00, 0xff]));
        assert_eq!(items[2], Micheline::prim("Unit", vec![]));
        assert_eq!(serde_json::to_value(&items[2]).unwrap(), json!({ "prim": "Unit" }));
    }

    #[test]
    fn test_prim_codes() {
        assert_eq!(prim_code("parameter"), Some(0x00));
        assert_eq!(prim_code("Pair"), Some(0x07));
        assert_eq!(prim_code("unit"), Some(0x6c));
        assert_eq!(prim_code("constant"), Some(0x92));
        assert_eq!(prim_code("Ticket"), Some(0x9d));
        assert_eq!(prim_code("NOT_A_PRIM"), None);
    }

    #[test]
    fn test_binary_node_shapes() {
        assert_eq!(encoded(&Micheline::int(1)), "0001");
        assert_eq!(encoded(&Micheline::string("ab")), "01000000026162");
        assert_eq!(encoded(&Micheline::prim("Unit", vec![])), "030b");
        assert_eq!(
            encoded(&Micheline::prim("Pair", vec![Micheline::int(1), Micheline::int(2)])),
            "070700010002"
        );
        assert_eq!(encoded(&Micheline::Seq(vec![])), "0200000000");

        let annotated = Micheline::Prim {
            prim: "nat".to_string(),
            args: vec![],
            annots: vec!["%amount".to_string()],
        };
        assert_eq!(encoded(&annotated), "04620000000725616d6f756e74");
    }

    #[test]
    fn test_many_args_use_generic_shape() {
        let value = Micheline::prim(
            "Pair",
            vec![Micheline::int(1), Micheline::int(2), Micheline::int(3)],
        );
        assert_eq!(encoded(&value), "09070000000600010002000300000000");
    }

    #[test]
    fn test_unknown_primitive_is_rejected() {
        let err = Micheline::prim("DIIP", vec![]).to_bytes().unwrap_err();
        assert_eq!(err, EncodingError::UnknownPrimitive("DIIP".to_string()));
    }

    #[test]
    fn test_expand_global_constants() {
        let hash = "exprtWsu7N8st7XBhS685Qa2B6xsAdFs9e4ZD8Zv2hvfBE7GUh8BjL".to_string();
        let storage = Micheline::prim(
            "pair",
            vec![
                Micheline::prim("constant", vec![Micheline::string(hash.clone())]),
                Micheline::prim("nat", vec![]),
            ],
        );
        assert_eq!(storage.global_constants(), vec![hash.clone()]);

        let mut values = HashMap::new();
        values.insert(hash, Micheline::prim("address", vec![]));
        let expanded = storage.expand_constants(&values).unwrap();
        assert_eq!(expanded.args()[0], Micheline::prim("address", vec![]));
        assert!(expanded.global_constants().is_empty());

        assert!(storage.expand_constants(&HashMap::new()).is_err());
    }

    #[test]
    fn test_sort_script_sections() {
        let sorted = sort_script_sections(vec![
            Micheline::prim("code", vec![Micheline::Seq(vec![])]),
            Micheline::prim("storage", vec![Micheline::prim("unit", vec![])]),
            Micheline::prim("parameter", vec![Micheline::prim("unit", vec![])]),
        ]);
        let names: Vec<_> = sorted.iter().filter_map(|s| s.prim_name()).collect();
        assert_eq!(names, vec!["parameter", "storage", "code"]);
        assert_eq!(storage_type(&sorted), Some(&Micheline::prim("unit", vec![])));
    }
}
