//! Simplified masternode list entries and final quorum commitments.
//!
//! Both are hashed over their exact wire serialization, so the encoders here
//! must stay byte-compatible with the network.

use ps_crypto::sha256d;
use ps_types::codec::{Reader, Writer};
use ps_types::{Hash256, OutPoint, ProTxHash, TypesError};
use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

pub const BLS_PUBKEY_LEN: usize = 48;
pub const BLS_SIG_LEN: usize = 96;

/// One entry of the simplified masternode list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasternodeEntry {
    pub pro_reg_tx_hash: ProTxHash,
    pub confirmed_hash: Hash256,
    /// IPv6 or IPv4-mapped address.
    pub ip: [u8; 16],
    pub port: u16,
    pub pub_key_operator: [u8; BLS_PUBKEY_LEN],
    pub key_id_voting: [u8; 20],
    pub is_valid: bool,
}

impl MasternodeEntry {
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_hash(&self.pro_reg_tx_hash);
        w.write_hash(&self.confirmed_hash);
        w.write_bytes(&self.ip);
        // service port is big-endian on the wire
        w.write_bytes(&self.port.to_be_bytes());
        w.write_bytes(&self.pub_key_operator);
        w.write_bytes(&self.key_id_voting);
        w.write_u8(u8::from(self.is_valid));
        w.into_inner()
    }

    pub fn deserialize(r: &mut Reader<'_>) -> Result<Self, TypesError> {
        Ok(Self {
            pro_reg_tx_hash: r.read_hash()?,
            confirmed_hash: r.read_hash()?,
            ip: r.read_array()?,
            port: u16::from_be_bytes(r.read_array()?),
            pub_key_operator: r.read_array()?,
            key_id_voting: r.read_array()?,
            is_valid: r.read_u8()? != 0,
        })
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, TypesError> {
        Self::deserialize(&mut Reader::new(raw))
    }

    /// Hash committed to by the coinbase masternode-list merkle root.
    pub fn content_hash(&self) -> Hash256 {
        sha256d(&self.serialize())
    }

    pub fn service(&self) -> SocketAddr {
        let v6 = Ipv6Addr::from(self.ip);
        let ip = match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        };
        SocketAddr::new(ip, self.port)
    }
}

/// Identity of a quorum: `(quorumHash, llmqType)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuorumKey {
    pub quorum_hash: Hash256,
    pub llmq_type: u8,
}

impl QuorumKey {
    pub fn new(quorum_hash: Hash256, llmq_type: u8) -> Self {
        Self { quorum_hash, llmq_type }
    }
}

impl fmt::Display for QuorumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.quorum_hash, self.llmq_type)
    }
}

impl FromStr for QuorumKey {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hash, ty) = s
            .split_once(':')
            .ok_or_else(|| TypesError::Other(format!("invalid quorum key: {}", s)))?;
        let llmq_type = ty
            .parse::<u8>()
            .map_err(|_| TypesError::Other(format!("invalid llmq type: {}", ty)))?;
        Ok(Self { quorum_hash: Hash256::from_rev_hex(hash)?, llmq_type })
    }
}

/// Dynamic bitset: compact-size bit count followed by `ceil(n/8)` bytes.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BitSet {
    pub len: u64,
    pub bytes: Vec<u8>,
}

impl BitSet {
    fn write(&self, w: &mut Writer) {
        w.write_compact_size(self.len);
        w.write_bytes(&self.bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, TypesError> {
        let len = r.read_compact_size()?;
        let n_bytes = usize::try_from(len.div_ceil(8))
            .map_err(|_| TypesError::Other("bitset too large".into()))?;
        Ok(Self { len, bytes: r.read_bytes(n_bytes)?.to_vec() })
    }

    pub fn count_ones(&self) -> u32 {
        self.bytes.iter().map(|b| b.count_ones()).sum()
    }
}

/// Final quorum commitment (`qfcommit`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumCommitment {
    pub version: u16,
    pub llmq_type: u8,
    pub quorum_hash: Hash256,
    pub signers: BitSet,
    pub valid_members: BitSet,
    pub quorum_public_key: [u8; BLS_PUBKEY_LEN],
    pub quorum_vvec_hash: Hash256,
    pub quorum_sig: [u8; BLS_SIG_LEN],
    pub sig: [u8; BLS_SIG_LEN],
}

impl QuorumCommitment {
    pub fn key(&self) -> QuorumKey {
        QuorumKey::new(self.quorum_hash, self.llmq_type)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u16(self.version);
        w.write_u8(self.llmq_type);
        w.write_hash(&self.quorum_hash);
        self.signers.write(&mut w);
        self.valid_members.write(&mut w);
        w.write_bytes(&self.quorum_public_key);
        w.write_hash(&self.quorum_vvec_hash);
        w.write_bytes(&self.quorum_sig);
        w.write_bytes(&self.sig);
        w.into_inner()
    }

    pub fn deserialize(r: &mut Reader<'_>) -> Result<Self, TypesError> {
        Ok(Self {
            version: r.read_u16()?,
            llmq_type: r.read_u8()?,
            quorum_hash: r.read_hash()?,
            signers: BitSet::read(r)?,
            valid_members: BitSet::read(r)?,
            quorum_public_key: r.read_array()?,
            quorum_vvec_hash: r.read_hash()?,
            quorum_sig: r.read_array()?,
            sig: r.read_array()?,
        })
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, TypesError> {
        Self::deserialize(&mut Reader::new(raw))
    }

    /// Hash committed to by the coinbase quorum merkle root.
    pub fn content_hash(&self) -> Hash256 {
        sha256d(&self.serialize())
    }
}

/// Collateral outpoint as reported in ProTx info (`collateralHash:collateralIndex`).
pub fn collateral_outpoint(info: &serde_json::Value) -> Option<OutPoint> {
    let hash = info.get("collateralHash")?.as_str()?;
    let index = info.get("collateralIndex")?.as_u64()?;
    Some(OutPoint::new(Hash256::from_rev_hex(hash).ok()?, u32::try_from(index).ok()?))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn entry(n: u8, valid: bool) -> MasternodeEntry {
        let mut ip = [0u8; 16];
        ip[10] = 0xff;
        ip[11] = 0xff;
        ip[12..].copy_from_slice(&[10, 0, 0, n]);
        MasternodeEntry {
            pro_reg_tx_hash: Hash256::new([n; 32]),
            confirmed_hash: Hash256::new([n.wrapping_add(1); 32]),
            ip,
            port: 9999,
            pub_key_operator: [n; BLS_PUBKEY_LEN],
            key_id_voting: [n; 20],
            is_valid: valid,
        }
    }

    pub fn quorum(n: u8, llmq_type: u8) -> QuorumCommitment {
        QuorumCommitment {
            version: 1,
            llmq_type,
            quorum_hash: Hash256::new([n; 32]),
            signers: BitSet { len: 10, bytes: vec![0xff, 0x03] },
            valid_members: BitSet { len: 10, bytes: vec![0xff, 0x03] },
            quorum_public_key: [n; BLS_PUBKEY_LEN],
            quorum_vvec_hash: Hash256::new([n ^ 0x55; 32]),
            quorum_sig: [n; BLS_SIG_LEN],
            sig: [n; BLS_SIG_LEN],
        }
    }

    #[test]
    fn entry_serialization_is_151_bytes() {
        let e = entry(1, true);
        let raw = e.serialize();
        assert_eq!(raw.len(), 32 + 32 + 16 + 2 + 48 + 20 + 1);
        assert_eq!(MasternodeEntry::from_bytes(&raw).unwrap(), e);
    }

    #[test]
    fn entry_hash_depends_on_validity() {
        assert_ne!(entry(1, true).content_hash(), entry(1, false).content_hash());
    }

    #[test]
    fn service_unmaps_ipv4() {
        assert_eq!(entry(7, true).service().to_string(), "10.0.0.7:9999");
    }

    #[test]
    fn quorum_decodes_its_own_encoding() {
        let q = quorum(3, 1);
        let parsed = QuorumCommitment::from_bytes(&q.serialize()).unwrap();
        assert_eq!(parsed, q);
        assert_eq!(parsed.signers.count_ones(), 10);
    }

    #[test]
    fn quorum_key_string_form() {
        let k = quorum(3, 2).key();
        let s = k.to_string();
        assert!(s.ends_with(":2"));
        assert_eq!(s.parse::<QuorumKey>().unwrap(), k);
    }

    #[test]
    fn truncated_entry_rejected() {
        let raw = entry(1, true).serialize();
        assert!(MasternodeEntry::from_bytes(&raw[..100]).is_err());
    }

    #[test]
    fn collateral_outpoint_from_info() {
        let txid = Hash256::new([4u8; 32]);
        let info = serde_json::json!({
            "proTxHash": Hash256::new([1u8; 32]).to_string(),
            "collateralHash": txid.to_string(),
            "collateralIndex": 1,
        });
        assert_eq!(collateral_outpoint(&info), Some(OutPoint::new(txid, 1)));
        assert_eq!(collateral_outpoint(&serde_json::json!({})), None);
    }
}
