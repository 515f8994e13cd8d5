//! PS keystore address derivation.
//!
//! Format: network prefix + base32(key_id || checksum) where
//! `key_id = sha256(public_key)[..20]` and `checksum = sha256d(prefix || key_id)[..4]`.
//! 24 payload bytes encode to 39 base32 characters.

use ps_types::{Address, NetworkId, PublicKey};

use crate::error::CryptoError;
use crate::hash::{sha256, sha256d_multi};

/// Base32 alphabet without visually ambiguous characters.
const BASE32_ALPHABET: &[u8; 32] = b"13456789abcdefghijkmnopqrstuwxyz";

const KEY_ID_LEN: usize = 20;
const CHECKSUM_LEN: usize = 4;
const PAYLOAD_CHARS: usize = 39;

fn prefix(network: NetworkId) -> &'static str {
    match network {
        NetworkId::Mainnet => "psm1",
        NetworkId::Testnet => "pst1",
        NetworkId::Regtest => "psr1",
    }
}

fn encode_base32(bytes: &[u8]) -> String {
    let mut result = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buffer: u64 = 0;
    let mut bits = 0;
    for &byte in bytes {
        buffer = (buffer << 8) | u64::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            result.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        result.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    result
}

fn decode_base32<const N: usize>(s: &str) -> Option<[u8; N]> {
    let mut buffer: u64 = 0;
    let mut bits = 0;
    let mut out = [0u8; N];
    let mut pos = 0;
    for c in s.bytes() {
        let val = BASE32_ALPHABET.iter().position(|a| *a == c)? as u64;
        buffer = (buffer << 5) | val;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            if pos < N {
                out[pos] = (buffer >> bits) as u8;
                pos += 1;
            }
        }
    }
    (pos == N).then_some(out)
}

fn checksum(network: NetworkId, key_id: &[u8]) -> [u8; CHECKSUM_LEN] {
    let h = sha256d_multi(&[prefix(network).as_bytes(), key_id]);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&h.as_bytes()[..CHECKSUM_LEN]);
    out
}

/// Address for a public key on `network`.
pub fn derive_address(public_key: &PublicKey, network: NetworkId) -> Address {
    let digest = sha256(public_key.as_bytes());
    let key_id = &digest[..KEY_ID_LEN];
    let mut payload = Vec::with_capacity(KEY_ID_LEN + CHECKSUM_LEN);
    payload.extend_from_slice(key_id);
    payload.extend_from_slice(&checksum(network, key_id));
    Address::new(format!("{}{}", prefix(network), encode_base32(&payload)))
}

/// Key id and network of a well-formed address.
pub fn decode_address(address: &str) -> Result<([u8; KEY_ID_LEN], NetworkId), CryptoError> {
    let network = [NetworkId::Mainnet, NetworkId::Testnet, NetworkId::Regtest]
        .into_iter()
        .find(|n| address.starts_with(prefix(*n)))
        .ok_or_else(|| CryptoError::InvalidAddress(address.to_string()))?;
    let encoded = &address[prefix(network).len()..];
    if encoded.len() != PAYLOAD_CHARS {
        return Err(CryptoError::InvalidAddress(address.to_string()));
    }
    let payload: [u8; KEY_ID_LEN + CHECKSUM_LEN] = decode_base32(encoded)
        .ok_or_else(|| CryptoError::InvalidAddress(address.to_string()))?;
    let (key_id, sum) = payload.split_at(KEY_ID_LEN);
    if sum != checksum(network, key_id) {
        return Err(CryptoError::ChecksumMismatch);
    }
    let mut out = [0u8; KEY_ID_LEN];
    out.copy_from_slice(key_id);
    Ok((out, network))
}

pub fn validate_address(address: &str) -> bool {
    decode_address(address).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::keypair_from_seed;

    #[test]
    fn derive_and_validate() {
        let kp = keypair_from_seed(&[5u8; 32]);
        let addr = derive_address(&kp.public, NetworkId::Testnet);
        assert!(addr.as_str().starts_with("pst1"));
        assert_eq!(addr.as_str().len(), 4 + PAYLOAD_CHARS);
        let (_, net) = decode_address(addr.as_str()).unwrap();
        assert_eq!(net, NetworkId::Testnet);
    }

    #[test]
    fn networks_give_distinct_addresses() {
        let kp = keypair_from_seed(&[5u8; 32]);
        assert_ne!(
            derive_address(&kp.public, NetworkId::Mainnet),
            derive_address(&kp.public, NetworkId::Testnet)
        );
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let kp = keypair_from_seed(&[6u8; 32]);
        let mut bad = derive_address(&kp.public, NetworkId::Mainnet).as_str().to_string();
        let last = bad.pop().unwrap();
        bad.push(if last == '1' { '3' } else { '1' });
        assert!(!validate_address(&bad));
    }

    #[test]
    fn garbage_rejected() {
        assert!(!validate_address("psm1short"));
        assert!(!validate_address("xyz"));
    }
}
