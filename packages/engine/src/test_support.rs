//! Calldata and log builders shared by unit tests

use alloy::primitives::{address, Address, Bytes, TxHash, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};

use crate::types::{RawLog, RawTransaction};

mod abi {
    alloy::sol! {
        function post(string message) external;
        function reply(string message, bytes32 parentTransactionHash) external;
        function repost(string message, bytes32 originTransactionHash, address originAuthor) external;
        function setMetaData(string metaData) external;

        event SavePreviousFeedInfoEvent(uint256 previousFeedInfoBN);
        event SavePreviousTagInfoEvent(string tag, uint256 previousTagInfoBN);
    }
}

pub const LIFECHAIN_ADDRESS: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");

pub fn tx_hash(n: u64) -> TxHash {
    B256::left_padding_from(&n.to_be_bytes())
}

pub fn post_input(message: &str) -> Vec<u8> {
    abi::postCall {
        message: message.to_string(),
    }
    .abi_encode()
}

pub fn reply_input(message: &str, parent: TxHash) -> Vec<u8> {
    abi::replyCall {
        message: message.to_string(),
        parentTransactionHash: parent,
    }
    .abi_encode()
}

pub fn repost_input(message: &str, origin: TxHash, author: Address) -> Vec<u8> {
    abi::repostCall {
        message: message.to_string(),
        originTransactionHash: origin,
        originAuthor: author,
    }
    .abi_encode()
}

pub fn metadata_input(metadata: &str) -> Vec<u8> {
    abi::setMetaDataCall {
        metaData: metadata.to_string(),
    }
    .abi_encode()
}

pub fn feed_pointer_log(previous: u64) -> RawLog {
    let event = abi::SavePreviousFeedInfoEvent {
        previousFeedInfoBN: U256::from(previous),
    };
    let data = event.encode_log_data();
    RawLog {
        address: LIFECHAIN_ADDRESS,
        topics: data.topics().to_vec(),
        data: data.data,
    }
}

pub fn tag_pointer_log(tag: &str, previous: u64) -> RawLog {
    let event = abi::SavePreviousTagInfoEvent {
        tag: tag.to_string(),
        previousTagInfoBN: U256::from(previous),
    };
    let data = event.encode_log_data();
    RawLog {
        address: LIFECHAIN_ADDRESS,
        topics: data.topics().to_vec(),
        data: data.data,
    }
}

pub fn raw_tx(n: u64, block_number: u64, from: Address, input: Vec<u8>, logs: Vec<RawLog>) -> RawTransaction {
    RawTransaction {
        hash: tx_hash(n),
        block_number,
        from,
        input: Bytes::from(input),
        logs,
    }
}
