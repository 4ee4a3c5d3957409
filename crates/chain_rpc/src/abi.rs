//! Just enough of the contract ABI for the vault: static words, strings,
//! selectors, event topics and `Error(string)` revert payloads.

use alloy_primitives::{keccak256, Address, B256, U256};
use thiserror::Error;

const WORD: usize = 32;
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Uint(U256),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("abi data too short: wanted {wanted} bytes, have {have}")]
    TooShort { wanted: usize, have: usize },
    #[error("abi offset {0} does not fit in memory")]
    BadOffset(U256),
    #[error("abi string is not valid utf-8")]
    InvalidUtf8,
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

fn uint_word(value: U256) -> [u8; WORD] {
    value.to_be_bytes::<WORD>()
}

/// Head/tail encoding of a parameter tuple.
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        match token {
            Token::Address(address) => {
                head.extend_from_slice(&[0u8; 12]);
                head.extend_from_slice(address.as_slice());
            }
            Token::Uint(value) => head.extend_from_slice(&uint_word(*value)),
            Token::String(text) => {
                let offset = U256::from(head_len + tail.len());
                head.extend_from_slice(&uint_word(offset));
                let bytes = text.as_bytes();
                tail.extend_from_slice(&uint_word(U256::from(bytes.len())));
                tail.extend_from_slice(bytes);
                tail.resize(tail.len() + padded_len(bytes.len()) - bytes.len(), 0);
            }
        }
    }

    head.extend_from_slice(&tail);
    head
}

pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&encode(tokens));
    data
}

fn word(data: &[u8], offset: usize) -> Result<&[u8], AbiError> {
    data.get(offset..offset + WORD).ok_or(AbiError::TooShort {
        wanted: offset + WORD,
        have: data.len(),
    })
}

fn to_offset(value: U256) -> Result<usize, AbiError> {
    u64::try_from(value)
        .ok()
        .and_then(|value| usize::try_from(value).ok())
        .ok_or(AbiError::BadOffset(value))
}

pub fn decode_uint(data: &[u8], index: usize) -> Result<U256, AbiError> {
    Ok(U256::from_be_slice(word(data, index * WORD)?))
}

pub fn decode_address(data: &[u8], index: usize) -> Result<Address, AbiError> {
    Ok(Address::from_slice(&word(data, index * WORD)?[12..]))
}

pub fn decode_string(data: &[u8], index: usize) -> Result<String, AbiError> {
    let offset = to_offset(decode_uint(data, index)?)?;
    let len = to_offset(U256::from_be_slice(word(data, offset)?))?;
    let start = offset + WORD;
    let bytes = data.get(start..start + len).ok_or(AbiError::TooShort {
        wanted: start + len,
        have: data.len(),
    })?;
    String::from_utf8(bytes.to_vec()).map_err(|_| AbiError::InvalidUtf8)
}

/// Reason carried by a `require(..., "reason")` revert, if `data` is one.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    let payload = data.strip_prefix(&ERROR_STRING_SELECTOR)?;
    decode_string(payload, 0).ok()
}

#[cfg(test)]
#[path = "tests/abi_tests.rs"]
mod tests;
