//! Operator wallet
//!
//! Holds the secp256k1 key used to sign the dependency update transaction and
//! the notifier's authentication challenge.

use k256::ecdsa::{RecoveryId, Signature, SigningKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use zeroize::Zeroizing;

use super::abi::keccak256;
use super::rlp;
use crate::types::{Result, SyncError};

/// Unsigned legacy (pre-EIP-1559) transaction, signed with EIP-155 replay
/// protection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: [u8; 20],
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

impl LegacyTransaction {
    fn base_fields(&self) -> Vec<Vec<u8>> {
        vec![
            rlp::encode_uint(self.nonce as u128),
            rlp::encode_uint(self.gas_price),
            rlp::encode_uint(self.gas_limit as u128),
            rlp::encode_bytes(&self.to),
            rlp::encode_uint(self.value),
            rlp::encode_bytes(&self.data),
        ]
    }

    /// RLP payload hashed for signing
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut fields = self.base_fields();
        fields.push(rlp::encode_uint(self.chain_id as u128));
        fields.push(rlp::encode_uint(0));
        fields.push(rlp::encode_uint(0));
        rlp::encode_list(&fields)
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        keccak256(&self.signing_payload())
    }
}

/// EIP-191 `personal_sign` digest
pub fn hash_message(message: &[u8]) -> [u8; 32] {
    let mut data = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    data.extend_from_slice(message);
    keccak256(&data)
}

/// EIP-55 mixed-case address
pub fn to_checksum_address(address: &[u8; 20]) -> String {
    let lower = hex::encode(address);
    let hash = keccak256(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Signing wallet
pub struct Wallet {
    key: SigningKey,
    address: [u8; 20],
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.checksum_address())
            .finish_non_exhaustive()
    }
}

impl Wallet {
    /// Load from a hex private key, with or without `0x`
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            hex::decode(private_key.trim().trim_start_matches("0x"))
                .map_err(|_| SyncError::Config("PRIVATE_KEY is not valid hex".to_string()))?,
        );
        let key = SigningKey::from_slice(&bytes)
            .map_err(|_| SyncError::Config("PRIVATE_KEY is not a valid secp256k1 key".to_string()))?;

        let point = key.verifying_key().to_encoded_point(false);
        let hash = keccak256(&point.as_bytes()[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash[12..]);

        Ok(Self { key, address })
    }

    pub fn address(&self) -> [u8; 20] {
        self.address
    }

    /// Lowercase `0x` address, the form RPC nodes and indexers accept
    pub fn address_hex(&self) -> String {
        format!("0x{}", hex::encode(self.address))
    }

    pub fn checksum_address(&self) -> String {
        to_checksum_address(&self.address)
    }

    fn sign_hash(&self, hash: &[u8; 32]) -> Result<(Signature, RecoveryId)> {
        self.key
            .sign_prehash_recoverable(hash)
            .map_err(|e| SyncError::Config(format!("Signing failed: {}", e)))
    }

    /// `personal_sign`: 65 bytes `r || s || v` with `v` in {27, 28}
    pub fn sign_message(&self, message: &[u8]) -> Result<[u8; 65]> {
        let (signature, recovery_id) = self.sign_hash(&hash_message(message))?;
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = 27 + recovery_id.to_byte();
        Ok(out)
    }

    /// `0x`-prefixed hex `personal_sign` signature
    pub fn sign_message_hex(&self, message: &str) -> Result<String> {
        Ok(format!("0x{}", hex::encode(self.sign_message(message.as_bytes())?)))
    }

    /// Raw signed transaction bytes for `eth_sendRawTransaction`
    pub fn sign_transaction(&self, tx: &LegacyTransaction) -> Result<Vec<u8>> {
        let (signature, recovery_id) = self.sign_hash(&tx.signing_hash())?;
        let v = tx.chain_id as u128 * 2 + 35 + recovery_id.to_byte() as u128;
        let (r, s) = signature.split_bytes();

        let mut fields = tx.base_fields();
        fields.push(rlp::encode_uint(v));
        fields.push(rlp::encode_uint_bytes(&r));
        fields.push(rlp::encode_uint_bytes(&s));
        Ok(rlp::encode_list(&fields))
    }
}
