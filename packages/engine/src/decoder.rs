//! Transaction Decoder
//!
//! Decodes a raw ledger transaction and its receipt logs into a typed `DecodedTransaction`
//! using the signature table from [`Schema`]. Decoding is pure: the same input always
//! yields the same output, and numeric fields stay arbitrary-precision until a caller
//! narrows them through a range-checked accessor.

use std::collections::BTreeMap;

use alloy::dyn_abi::{DynSolValue, EventExt, JsonAbiExt};
use alloy::primitives::{Address, TxHash, B256, I256, U256};
use thiserror::Error;

use crate::schema::Schema;
use crate::types::{RawLog, RawTransaction};

/// Errors that can occur during transaction decoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty input data")]
    EmptyInput,

    #[error("Transaction input too short for method extraction")]
    InputTooShort,

    #[error("Unknown method selector: {0}")]
    UnknownMethod(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Numeric overflow in field '{field}': {value} does not fit in {target}")]
    NumericOverflow {
        field: String,
        value: String,
        target: &'static str,
    },

    #[error("Missing field '{0}'")]
    MissingField(String),

    #[error("Field '{field}' is not a {expected}")]
    TypeMismatch { field: String, expected: &'static str },

    #[error("Invalid signature '{signature}': {reason}")]
    InvalidSignature { signature: String, reason: String },
}

/// Decoded ABI value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Uint(U256),
    Int(I256),
    Address(Address),
    Bool(bool),
    Bytes(Vec<u8>),
    /// Fixed-size bytes, right-padded into a word, with the declared size
    FixedBytes(B256, usize),
    String(String),
    Array(Vec<Value>),
    /// ABI types with no feed meaning (function pointers and the like)
    Unsupported(String),
}

impl From<DynSolValue> for Value {
    fn from(value: DynSolValue) -> Self {
        match value {
            DynSolValue::Uint(v, _) => Value::Uint(v),
            DynSolValue::Int(v, _) => Value::Int(v),
            DynSolValue::Address(a) => Value::Address(a),
            DynSolValue::Bool(b) => Value::Bool(b),
            DynSolValue::Bytes(b) => Value::Bytes(b),
            DynSolValue::FixedBytes(word, size) => Value::FixedBytes(word, size),
            DynSolValue::String(s) => Value::String(s),
            DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            other => Value::Unsupported(format!("{:?}", other)),
        }
    }
}

impl Value {
    /// Narrow to `u64`, failing instead of truncating
    pub fn as_u64(&self, field: &str) -> Result<u64, DecodeError> {
        let overflow = |value: String| DecodeError::NumericOverflow {
            field: field.to_string(),
            value,
            target: "u64",
        };
        match self {
            Value::Uint(v) => narrow_u64(*v).ok_or_else(|| overflow(v.to_string())),
            Value::Int(v) if v.is_negative() => Err(overflow(v.to_string())),
            Value::Int(v) => narrow_u64(v.into_raw()).ok_or_else(|| overflow(v.to_string())),
            _ => Err(DecodeError::TypeMismatch {
                field: field.to_string(),
                expected: "integer",
            }),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            Value::Address(a) => Some(*a),
            _ => None,
        }
    }

    /// 32-byte value, accepting `bytes32` or a hex-encoded string
    pub fn as_b256(&self) -> Option<B256> {
        match self {
            Value::FixedBytes(word, 32) => Some(*word),
            Value::String(s) => s.trim().parse::<B256>().ok(),
            _ => None,
        }
    }
}

/// Event record decoded from a receipt log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    pub name: String,
    /// Contract that emitted the log
    pub address: Address,
    pub fields: BTreeMap<String, Value>,
}

impl DecodedEvent {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Decoded transaction with method parameters and events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransaction {
    pub hash: TxHash,
    pub block_number: u64,
    /// Sender address
    pub from: Address,
    /// 4-byte method selector
    pub selector: [u8; 4],
    pub method_name: String,
    pub params: BTreeMap<String, Value>,
    pub events: Vec<DecodedEvent>,
}

impl DecodedTransaction {
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }
}

/// Schema-driven decoder for ledger transactions
#[derive(Debug, Clone)]
pub struct TransactionDecoder {
    schema: Schema,
}

impl Default for TransactionDecoder {
    fn default() -> Self {
        Self::new(Schema::lifechain())
    }
}

impl TransactionDecoder {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Decode a transaction's method call and its events
    ///
    /// # Arguments
    /// * `raw` - The fetched transaction with its receipt logs
    ///
    /// # Returns
    /// A `DecodedTransaction`, or an error when the input matches no known method or a
    /// known event carries a malformed body. Logs with unknown signatures are omitted.
    pub fn decode(&self, raw: &RawTransaction) -> Result<DecodedTransaction, DecodeError> {
        if raw.input.is_empty() {
            return Err(DecodeError::EmptyInput);
        }
        let selector = extract_method_id(&raw.input).ok_or(DecodeError::InputTooShort)?;

        let function = self
            .schema
            .function(&selector)
            .ok_or_else(|| DecodeError::UnknownMethod(format!("0x{}", hex::encode(selector))))?;

        let values = function
            .abi_decode_input(&raw.input[4..], true)
            .map_err(|e| DecodeError::MalformedPayload(format!("{}: {}", function.name, e)))?;

        let params = function
            .inputs
            .iter()
            .zip(values)
            .enumerate()
            .map(|(i, (param, value))| (param_name(&param.name, i), Value::from(value)))
            .collect();

        Ok(DecodedTransaction {
            hash: raw.hash,
            block_number: raw.block_number,
            from: raw.from,
            selector,
            method_name: function.name.clone(),
            params,
            events: self.decode_events(raw)?,
        })
    }

    /// Decode only the receipt logs of a transaction
    ///
    /// Used on its own when the method payload is undecodable but the chain pointers
    /// may still be recoverable.
    pub fn decode_events(&self, raw: &RawTransaction) -> Result<Vec<DecodedEvent>, DecodeError> {
        let mut events = Vec::with_capacity(raw.logs.len());
        for log in &raw.logs {
            if let Some(event) = self.decode_log(log)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn decode_log(&self, log: &RawLog) -> Result<Option<DecodedEvent>, DecodeError> {
        if let Some(contract) = self.schema.contract() {
            if log.address != contract {
                return Ok(None);
            }
        }
        let Some(topic0) = log.topics.first() else {
            return Ok(None);
        };
        let Some(event) = self.schema.event(topic0) else {
            return Ok(None);
        };

        let decoded = event
            .decode_log_parts(log.topics.iter().copied(), &log.data, true)
            .map_err(|e| DecodeError::MalformedPayload(format!("{}: {}", event.name, e)))?;

        let mut indexed = decoded.indexed.into_iter();
        let mut body = decoded.body.into_iter();
        let mut fields = BTreeMap::new();
        for (i, input) in event.inputs.iter().enumerate() {
            let value = if input.indexed { indexed.next() } else { body.next() };
            match value {
                Some(value) => {
                    fields.insert(param_name(&input.name, i), Value::from(value));
                }
                None => return Err(DecodeError::MissingField(param_name(&input.name, i))),
            }
        }

        Ok(Some(DecodedEvent {
            name: event.name.clone(),
            address: log.address,
            fields,
        }))
    }
}

fn narrow_u64(value: U256) -> Option<u64> {
    (value <= U256::from(u64::MAX)).then(|| value.to::<u64>())
}

fn param_name(name: &str, index: usize) -> String {
    if name.is_empty() {
        format!("arg{}", index)
    } else {
        name.to_string()
    }
}

/// Extract method ID from transaction input data
///
/// # Returns
/// `Some([u8; 4])` if input has at least 4 bytes, `None` otherwise
pub fn extract_method_id(input: &[u8]) -> Option<[u8; 4]> {
    if input.len() < 4 {
        return None;
    }
    let mut method_id = [0u8; 4];
    method_id.copy_from_slice(&input[..4]);
    Some(method_id)
}
