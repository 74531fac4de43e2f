//! Binary forging of operation groups and the signing digest
//!
//! A forged group is the 32-byte branch followed by every content as a tag
//! byte and its fields. Numbers are zarith, addresses use the 21-byte key
//! hash or 22-byte contract id encodings, and Micheline payloads carry a
//! four-byte length prefix.

use tracing::instrument;

use super::errors::PipelineError;
use crate::encoding::base58::{self, Prefix};
use crate::encoding::{blake2b_256, decode_hex, write_dynamic, zarith, Address, EncodingError, ImplicitKind, Micheline};
use crate::metrics::{metrics, Timer};
use crate::structured_logging::PipelineLogger;
use crate::types::{
    ManagerFields, OperationContent, OriginationContent, PreparedOperation, TransactionContent, TransactionParameters,
};

/// Watermark prepended to a manager operation group before hashing
pub const GENERIC_OPERATION_WATERMARK: u8 = 0x03;

/// Entrypoints with a one-byte code instead of a length-prefixed name
const NAMED_ENTRYPOINTS: &[&str] = &[
    "default",
    "root",
    "do",
    "set_delegate",
    "remove_delegate",
    "deposit",
    "stake",
    "unstake",
    "finalize_unstake",
    "set_delegate_parameters",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForgedOperation {
    /// Lowercase hex of the unsigned group
    pub forged_hex: String,
    /// Lowercase hex of `blake2b-256(0x03 || forged)`
    pub sign_hex: String,
}

impl ForgedOperation {
    pub fn from_bytes(forged: &[u8]) -> Self {
        Self {
            forged_hex: hex::encode(forged),
            sign_hex: hex::encode(signing_digest(forged)),
        }
    }

    pub fn forged_len(&self) -> usize {
        self.forged_hex.len() / 2
    }
}

/// Forges prepared groups and records forge metrics
#[derive(Debug, Clone, Default)]
pub struct Forger {
    logger: PipelineLogger,
}

impl Forger {
    pub fn new(logger: PipelineLogger) -> Self {
        Self { logger }
    }

    #[instrument(skip_all, fields(contents = prepared.contents.len()))]
    pub fn forge(&self, prepared: &PreparedOperation) -> Result<ForgedOperation, PipelineError> {
        let timer = Timer::new();
        let bytes = forge_operation(&prepared.branch, &prepared.contents)?;
        let forged = ForgedOperation::from_bytes(&bytes);

        metrics().operations_forged.inc();
        timer.observe_duration(&metrics().forge_latency);
        self.logger.log_forged(bytes.len(), &forged.sign_hex);
        Ok(forged)
    }
}

/// `blake2b-256(0x03 || forged)`
pub fn signing_digest(forged: &[u8]) -> [u8; 32] {
    let mut watermarked = Vec::with_capacity(forged.len() + 1);
    watermarked.push(GENERIC_OPERATION_WATERMARK);
    watermarked.extend_from_slice(forged);
    blake2b_256(&watermarked)
}

/// Branch followed by every content
pub fn forge_operation(branch: &str, contents: &[OperationContent]) -> Result<Vec<u8>, EncodingError> {
    let mut out = Vec::with_capacity(32 + contents.len() * 64);
    out.extend_from_slice(&base58::decode_hash(Prefix::BlockHash, branch)?);
    for content in contents {
        forge_content(&mut out, content)?;
    }
    Ok(out)
}

pub fn forge_content(out: &mut Vec<u8>, content: &OperationContent) -> Result<(), EncodingError> {
    out.push(content.kind().tag());
    match content {
        OperationContent::Reveal(c) => {
            forge_manager(out, &c.manager)?;
            c.public_key.forge(out);
            match &c.proof {
                Some(proof) => {
                    out.push(0xff);
                    let bytes = base58::decode(Prefix::BlsSignature, proof)?;
                    out.extend_from_slice(&bytes);
                }
                None => out.push(0x00),
            }
        }
        OperationContent::Transaction(c) => forge_transaction(out, c)?,
        OperationContent::Origination(c) => forge_origination(out, c)?,
        OperationContent::Delegation(c) => {
            forge_manager(out, &c.manager)?;
            forge_optional_pkh(out, c.delegate.as_ref())?;
        }
        OperationContent::RegisterGlobalConstant(c) => {
            forge_manager(out, &c.manager)?;
            forge_micheline(out, &c.value)?;
        }
        OperationContent::IncreasePaidStorage(c) => {
            forge_manager(out, &c.manager)?;
            zarith::write_int(out, i128::from(c.amount));
            match &c.destination {
                Address::Originated(hash) => {
                    out.extend_from_slice(hash);
                    out.push(0x00);
                }
                other => {
                    return Err(EncodingError::Prefix {
                        value: other.to_string(),
                        expected: "KT1".to_string(),
                    })
                }
            }
        }
        OperationContent::TransferTicket(c) => {
            forge_manager(out, &c.manager)?;
            forge_micheline(out, &c.ticket_contents)?;
            forge_micheline(out, &c.ticket_ty)?;
            c.ticket_ticketer.forge_contract_id(out);
            zarith::write_nat(out, c.ticket_amount);
            c.destination.forge_contract_id(out);
            write_dynamic(out, c.entrypoint.as_bytes())?;
        }
        OperationContent::SmartRollupAddMessages(c) => {
            forge_manager(out, &c.manager)?;
            let mut messages = Vec::new();
            for message in &c.message {
                write_dynamic(&mut messages, &decode_hex(message)?)?;
            }
            write_dynamic(out, &messages)?;
        }
        OperationContent::SmartRollupOriginate(c) => {
            forge_manager(out, &c.manager)?;
            out.push(c.pvm_kind.tag());
            write_dynamic(out, &decode_hex(&c.kernel)?)?;
            forge_micheline(out, &c.parameters_ty)?;
            match &c.whitelist {
                Some(whitelist) => {
                    out.push(0xff);
                    let mut keys = Vec::with_capacity(whitelist.len() * 21);
                    for key in whitelist {
                        key.forge_public_key_hash(&mut keys)?;
                    }
                    write_dynamic(out, &keys)?;
                }
                None => out.push(0x00),
            }
        }
        OperationContent::SmartRollupExecuteOutboxMessage(c) => {
            forge_manager(out, &c.manager)?;
            match &c.rollup {
                Address::SmartRollup(hash) => out.extend_from_slice(hash),
                other => {
                    return Err(EncodingError::Prefix {
                        value: other.to_string(),
                        expected: "sr1".to_string(),
                    })
                }
            }
            out.extend_from_slice(&base58::decode_hash(Prefix::SmartRollupCommitment, &c.cemented_commitment)?);
            write_dynamic(out, &decode_hex(&c.output_proof)?)?;
        }
        OperationContent::Activation(c) => {
            match &c.pkh {
                Address::Implicit {
                    kind: ImplicitKind::Ed25519,
                    hash,
                } => out.extend_from_slice(hash),
                other => {
                    return Err(EncodingError::Prefix {
                        value: other.to_string(),
                        expected: "tz1".to_string(),
                    })
                }
            }
            let secret = decode_hex(&c.secret)?;
            if secret.len() != 20 {
                return Err(EncodingError::OutOfRange(format!(
                    "activation secret of {} bytes",
                    secret.len()
                )));
            }
            out.extend_from_slice(&secret);
        }
        OperationContent::DrainDelegate(c) => {
            c.consensus_key.forge_public_key_hash(out)?;
            c.delegate.forge_public_key_hash(out)?;
            c.destination.forge_public_key_hash(out)?;
        }
        OperationContent::Ballot(c) => {
            c.source.forge_public_key_hash(out)?;
            out.extend_from_slice(&c.period.to_be_bytes());
            out.extend_from_slice(&base58::decode_hash(Prefix::ProtocolHash, &c.proposal)?);
            out.push(c.ballot.tag());
        }
        OperationContent::Proposals(c) => {
            c.source.forge_public_key_hash(out)?;
            out.extend_from_slice(&c.period.to_be_bytes());
            let mut hashes = Vec::with_capacity(c.proposals.len() * 32);
            for proposal in &c.proposals {
                hashes.extend_from_slice(&base58::decode_hash(Prefix::ProtocolHash, proposal)?);
            }
            write_dynamic(out, &hashes)?;
        }
    }
    Ok(())
}

fn forge_manager(out: &mut Vec<u8>, manager: &ManagerFields) -> Result<(), EncodingError> {
    manager.source.forge_public_key_hash(out)?;
    zarith::write_nat(out, u128::from(manager.fee));
    zarith::write_nat(out, u128::from(manager.counter));
    zarith::write_nat(out, u128::from(manager.gas_limit));
    zarith::write_nat(out, u128::from(manager.storage_limit));
    Ok(())
}

fn forge_transaction(out: &mut Vec<u8>, c: &TransactionContent) -> Result<(), EncodingError> {
    forge_manager(out, &c.manager)?;
    zarith::write_nat(out, u128::from(c.amount));
    c.destination.forge_contract_id(out);
    match c.parameters.as_ref().filter(|p| !is_default_unit(p)) {
        Some(parameters) => {
            out.push(0xff);
            forge_entrypoint(out, &parameters.entrypoint)?;
            forge_micheline(out, &parameters.value)?;
        }
        None => out.push(0x00),
    }
    Ok(())
}

fn forge_origination(out: &mut Vec<u8>, c: &OriginationContent) -> Result<(), EncodingError> {
    forge_manager(out, &c.manager)?;
    zarith::write_nat(out, u128::from(c.balance));
    forge_optional_pkh(out, c.delegate.as_ref())?;
    forge_micheline(out, &Micheline::Seq(c.script.code.clone()))?;
    forge_micheline(out, &c.script.storage)?;
    Ok(())
}

/// Calling `default` with `Unit` is the same as sending no parameters
fn is_default_unit(parameters: &TransactionParameters) -> bool {
    parameters.entrypoint == "default"
        && matches!(&parameters.value, Micheline::Prim { prim, args, .. } if prim == "Unit" && args.is_empty())
}

fn forge_entrypoint(out: &mut Vec<u8>, entrypoint: &str) -> Result<(), EncodingError> {
    if let Some(code) = NAMED_ENTRYPOINTS.iter().position(|e| *e == entrypoint) {
        out.push(code as u8);
        return Ok(());
    }
    let len = u8::try_from(entrypoint.len())
        .ok()
        .filter(|len| *len <= 31)
        .ok_or_else(|| EncodingError::OutOfRange(format!("entrypoint name '{}'", entrypoint)))?;
    out.push(0xff);
    out.push(len);
    out.extend_from_slice(entrypoint.as_bytes());
    Ok(())
}

fn forge_optional_pkh(out: &mut Vec<u8>, address: Option<&Address>) -> Result<(), EncodingError> {
    match address {
        Some(address) => {
            out.push(0xff);
            address.forge_public_key_hash(out)
        }
        None => {
            out.push(0x00);
            Ok(())
        }
    }
}

fn forge_micheline(out: &mut Vec<u8>, value: &Micheline) -> Result<(), EncodingError> {
    write_dynamic(out, &value.to_bytes()?)
}
