//! LifeChain Schema
//!
//! Method and event signature table used by the decoder. Selectors are derived from
//! human-readable Solidity signatures, so a different contract revision only needs a
//! different table.

use std::collections::HashMap;
use std::sync::LazyLock;

use alloy::json_abi::{Event, Function};
use alloy::primitives::{Address, Selector, B256};

use crate::decoder::DecodeError;

/// Event linking an author's item to the author's previous item
pub const FEED_POINTER_EVENT: &str = "SavePreviousFeedInfoEvent";
pub const FEED_POINTER_FIELD: &str = "previousFeedInfoBN";

/// Event linking an item to the previous item carrying the same tag
pub const TAG_POINTER_EVENT: &str = "SavePreviousTagInfoEvent";
pub const TAG_POINTER_FIELD: &str = "previousTagInfoBN";
pub const TAG_FIELD: &str = "tag";

pub const MESSAGE_PARAM: &str = "message";
pub const PARENT_PARAM: &str = "parentTransactionHash";
pub const ORIGIN_PARAM: &str = "originTransactionHash";
pub const ORIGIN_AUTHOR_PARAM: &str = "originAuthor";

/// Functions of the LifeChain contract, content-producing and housekeeping
pub const LIFECHAIN_FUNCTIONS: &[&str] = &[
    "function post(string message)",
    "function reply(string message, bytes32 parentTransactionHash)",
    "function repost(string message, bytes32 originTransactionHash, address originAuthor)",
    "function registerUsername(string username)",
    "function setMetaData(string metaData)",
    "function follow(address user)",
    "function unfollow(address user)",
];

/// Events of the LifeChain contract
pub const LIFECHAIN_EVENTS: &[&str] = &[
    "event SavePreviousFeedInfoEvent(uint256 previousFeedInfoBN)",
    "event SavePreviousTagInfoEvent(string tag, uint256 previousTagInfoBN)",
];

/// Methods that produce a feed item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentMethod {
    /// post - a new item
    Post,
    /// reply - an item answering `parentTransactionHash`
    Reply,
    /// repost / share - an item amplifying another author's item
    Repost,
}

impl ContentMethod {
    /// Recognize a content method by its decoded name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "post" => Some(ContentMethod::Post),
            "reply" => Some(ContentMethod::Reply),
            "repost" | "share" => Some(ContentMethod::Repost),
            _ => None,
        }
    }
}

/// Signature table: functions keyed by selector, events keyed by topic0
#[derive(Debug, Clone)]
pub struct Schema {
    functions: HashMap<Selector, Function>,
    events: HashMap<B256, Event>,
    contract: Option<Address>,
}

static LIFECHAIN_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::from_signatures(LIFECHAIN_FUNCTIONS, LIFECHAIN_EVENTS)
        .expect("built-in LifeChain signatures must parse")
});

impl Schema {
    /// Build a schema from human-readable signatures
    ///
    /// # Arguments
    /// * `functions` - Signatures such as `function post(string message)`
    /// * `events` - Signatures such as `event Saved(uint256 previous)`
    pub fn from_signatures(functions: &[&str], events: &[&str]) -> Result<Self, DecodeError> {
        let mut schema = Schema {
            functions: HashMap::with_capacity(functions.len()),
            events: HashMap::with_capacity(events.len()),
            contract: None,
        };

        for signature in functions {
            let function = Function::parse(signature).map_err(|e| DecodeError::InvalidSignature {
                signature: signature.to_string(),
                reason: e.to_string(),
            })?;
            schema.functions.insert(function.selector(), function);
        }

        for signature in events {
            let event = Event::parse(signature).map_err(|e| DecodeError::InvalidSignature {
                signature: signature.to_string(),
                reason: e.to_string(),
            })?;
            schema.events.insert(event.selector(), event);
        }

        Ok(schema)
    }

    /// The LifeChain contract schema, not bound to a deployment address
    pub fn lifechain() -> Self {
        LIFECHAIN_SCHEMA.clone()
    }

    /// Only accept logs emitted by `address`
    pub fn with_contract(mut self, address: Address) -> Self {
        self.contract = Some(address);
        self
    }

    pub fn contract(&self) -> Option<Address> {
        self.contract
    }

    /// Look up a function by its 4-byte selector
    pub fn function(&self, selector: &[u8; 4]) -> Option<&Function> {
        self.functions.get(&Selector::from(*selector))
    }

    /// Look up an event by its topic0 hash
    pub fn event(&self, topic0: &B256) -> Option<&Event> {
        self.events.get(topic0)
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}
