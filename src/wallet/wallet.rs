use crate::error::{BlockchainError, Result};
use crate::utils::{base58_decode, base58_encode, ripemd160_digest, sha256_digest};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

const VERSION: u8 = 0x00;
pub const ADDRESS_CHECK_SUM_LEN: usize = 4;
pub const PUB_KEY_HASH_LEN: usize = 20;

// version + pub_key_hash + checksum
const ADDRESS_PAYLOAD_LEN: usize = 1 + PUB_KEY_HASH_LEN + ADDRESS_CHECK_SUM_LEN;

/// A P-256 key pair. The private half is kept as a PKCS#8 document and
/// wiped from memory when the wallet is dropped.
#[derive(
    Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode, Zeroize, ZeroizeOnDrop,
)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let pkcs8 = crate::utils::new_key_pair()?;
        let public_key = crate::utils::public_key_from_pkcs8(&pkcs8)?;
        Ok(Wallet { pkcs8, public_key })
    }

    pub fn get_address(&self) -> String {
        let pub_key_hash = hash_pub_key(self.public_key.as_slice());
        convert_address(pub_key_hash.as_slice())
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn get_pkcs8(&self) -> &[u8] {
        self.pkcs8.as_slice()
    }
}

/// RIPEMD160(SHA256(public key)), the locking condition stored on outputs.
pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    let pub_key_sha256 = sha256_digest(pub_key);
    ripemd160_digest(pub_key_sha256.as_slice())
}

fn checksum(payload: &[u8]) -> Vec<u8> {
    let first_sha = sha256_digest(payload);
    let second_sha = sha256_digest(first_sha.as_slice());
    second_sha[0..ADDRESS_CHECK_SUM_LEN].to_vec()
}

pub fn convert_address(pub_hash_key: &[u8]) -> String {
    let mut payload: Vec<u8> = vec![];
    payload.push(VERSION);
    payload.extend(pub_hash_key);
    let checksum = checksum(payload.as_slice());
    payload.extend(checksum.as_slice());
    base58_encode(payload.as_slice())
}

/// Decodes an address back to the public-key hash it commits to.
pub fn address_to_pub_key_hash(address: &str) -> Result<Vec<u8>> {
    let payload = base58_decode(address)?;
    if payload.len() != ADDRESS_PAYLOAD_LEN {
        return Err(BlockchainError::InvalidAddress(format!(
            "{address}: expected {ADDRESS_PAYLOAD_LEN} bytes, got {}",
            payload.len()
        )));
    }
    if payload[0] != VERSION {
        return Err(BlockchainError::InvalidAddress(format!(
            "{address}: unknown version byte {}",
            payload[0]
        )));
    }

    let (versioned, actual_checksum) = payload.split_at(payload.len() - ADDRESS_CHECK_SUM_LEN);
    if checksum(versioned) != actual_checksum {
        return Err(BlockchainError::InvalidAddress(format!(
            "{address}: checksum mismatch"
        )));
    }
    Ok(versioned[1..].to_vec())
}

pub fn validate_address(address: &str) -> bool {
    address_to_pub_key_hash(address).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_wallet_address_is_valid() {
        let wallet = Wallet::new().unwrap();
        let address = wallet.get_address();
        assert!(validate_address(&address));
        assert_eq!(
            address_to_pub_key_hash(&address).unwrap(),
            hash_pub_key(wallet.get_public_key())
        );
    }

    #[test]
    fn test_known_address_round_trip() {
        // Genesis coinbase address of Bitcoin mainnet, same version byte and checksum scheme
        let address = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
        let pub_key_hash = address_to_pub_key_hash(address).unwrap();
        assert_eq!(pub_key_hash.len(), PUB_KEY_HASH_LEN);
        assert_eq!(convert_address(&pub_key_hash), address);
    }

    #[test]
    fn test_checksum_mismatch_is_rejected() {
        let wallet = Wallet::new().unwrap();
        let mut payload = base58_decode(&wallet.get_address()).unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0x01;
        let tampered = base58_encode(&payload);

        assert!(!validate_address(&tampered));
        assert!(matches!(
            address_to_pub_key_hash(&tampered),
            Err(BlockchainError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_short_payload_is_rejected() {
        assert!(!validate_address("1111"));
        assert!(!validate_address(""));
    }
}
