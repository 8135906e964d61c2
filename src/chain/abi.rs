//! Just enough Solidity ABI for the two contract calls the job makes

use sha3::{Digest, Keccak256};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("return data truncated: need {needed} bytes, have {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("value does not fit in 64 bits")]
    Overflow,
}

/// Call argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Address([u8; 20]),
    Uint(u64),
    String(&'a str),
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// First four bytes of the keccak hash of a canonical signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Parse a `0x`-prefixed 20-byte address
pub fn parse_address(address: &str) -> Result<[u8; 20], AbiError> {
    let hex_part = address.trim().trim_start_matches("0x");
    let bytes = hex::decode(hex_part).map_err(|_| AbiError::InvalidAddress(address.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| AbiError::InvalidAddress(address.to_string()))
}

fn uint_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

fn address_word(address: &[u8; 20]) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address);
    word
}

/// Selector followed by head/tail encoded arguments
pub fn encode_call(signature: &str, args: &[Token<'_>]) -> Vec<u8> {
    let head_len = args.len() * 32;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for arg in args {
        match arg {
            Token::Address(a) => head.extend_from_slice(&address_word(a)),
            Token::Uint(v) => head.extend_from_slice(&uint_word(*v)),
            Token::String(s) => {
                head.extend_from_slice(&uint_word((head_len + tail.len()) as u64));
                let bytes = s.as_bytes();
                tail.extend_from_slice(&uint_word(bytes.len() as u64));
                tail.extend_from_slice(bytes);
                let padding = (32 - bytes.len() % 32) % 32;
                tail.extend(std::iter::repeat(0u8).take(padding));
            }
        }
    }

    let mut data = Vec::with_capacity(4 + head.len() + tail.len());
    data.extend_from_slice(&selector(signature));
    data.extend_from_slice(&head);
    data.extend_from_slice(&tail);
    data
}

fn word_at(data: &[u8], offset: usize) -> Result<&[u8], AbiError> {
    let end = offset.checked_add(32).ok_or(AbiError::Overflow)?;
    data.get(offset..end).ok_or(AbiError::Truncated {
        needed: end,
        actual: data.len(),
    })
}

fn word_to_u64(word: &[u8]) -> Result<u64, AbiError> {
    if word[..24].iter().any(|b| *b != 0) {
        return Err(AbiError::Overflow);
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&word[24..32]);
    Ok(u64::from_be_bytes(bytes))
}

fn word_to_usize(word: &[u8]) -> Result<usize, AbiError> {
    usize::try_from(word_to_u64(word)?).map_err(|_| AbiError::Overflow)
}

/// Decode a single `uint256[]` return value
pub fn decode_uint_array(data: &[u8]) -> Result<Vec<u64>, AbiError> {
    let offset = word_to_usize(word_at(data, 0)?)?;
    let len = word_to_usize(word_at(data, offset)?)?;

    let start = offset.checked_add(32).ok_or(AbiError::Overflow)?;
    let needed = len
        .checked_mul(32)
        .and_then(|n| n.checked_add(start))
        .ok_or(AbiError::Overflow)?;
    if data.len() < needed {
        return Err(AbiError::Truncated {
            needed,
            actual: data.len(),
        });
    }

    (0..len)
        .map(|i| word_to_u64(word_at(data, start + i * 32)?))
        .collect()
}
