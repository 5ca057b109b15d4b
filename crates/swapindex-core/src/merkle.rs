//! Binary SHA-256 merkle tree over swap events.
//!
//! Hashing is domain-separated: leaves are `SHA-256(0x00 || canonical)` and
//! inner nodes are `SHA-256(0x01 || left || right)`. On a level with an odd
//! number of nodes the last node is carried up unchanged, so proofs simply
//! have no step for that level.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::types::SwapEvent;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// A 32-byte SHA-256 digest. Serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeHash(pub [u8; 32]);

impl NodeHash {
    /// Root of a window without any swaps.
    pub const ZERO: NodeHash = NodeHash([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, String> {
        let s = s.trim().trim_start_matches("0x");
        let bytes = hex::decode(s).map_err(|e| format!("invalid hash hex '{s}': {e}"))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("hash must be 32 bytes, got {}", b.len()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHash({})", self.to_hex())
    }
}

impl FromStr for NodeHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for NodeHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for NodeHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NodeHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ─── Hashing ─────────────────────────────────────────────────────────────────

/// Deterministic byte encoding of the on-chain fields of a swap.
///
/// `height u64 | tx_index u32 | event_index u32 | pool_id u64 | sender |
/// denom | amount`, then `out_denom | out_amount` when the swap carries a
/// `token_out`. Integers are big-endian, strings prefixed by their u32
/// big-endian byte length. Derived fields are not included.
pub fn canonical_bytes(event: &SwapEvent) -> Vec<u8> {
    let amount = event.token_in.amount.to_string();
    let mut buf = Vec::with_capacity(
        24 + 12 + event.sender.len() + event.token_in.denom.len() + amount.len(),
    );
    buf.extend_from_slice(&event.height.to_be_bytes());
    buf.extend_from_slice(&event.tx_index.to_be_bytes());
    buf.extend_from_slice(&event.event_index.to_be_bytes());
    buf.extend_from_slice(&event.pool_id.to_be_bytes());
    put_str(&mut buf, &event.sender);
    put_str(&mut buf, &event.token_in.denom);
    put_str(&mut buf, &amount);
    if let Some(out) = &event.token_out {
        put_str(&mut buf, &out.denom);
        put_str(&mut buf, &out.amount.to_string());
    }
    buf
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

pub fn leaf_hash(event: &SwapEvent) -> NodeHash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(canonical_bytes(event));
    NodeHash(hasher.finalize().into())
}

pub fn node_hash(left: &NodeHash, right: &NodeHash) -> NodeHash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left.0);
    hasher.update(right.0);
    NodeHash(hasher.finalize().into())
}

// ─── Tree ────────────────────────────────────────────────────────────────────

/// All levels of the tree, leaves first, root level last.
fn levels(leaves: &[NodeHash]) -> Vec<Vec<NodeHash>> {
    let mut levels = vec![leaves.to_vec()];
    while levels.last().map_or(false, |l| l.len() > 1) {
        let prev = &levels[levels.len() - 1];
        let next: Vec<NodeHash> = prev
            .chunks(2)
            .map(|pair| match pair {
                [l, r] => node_hash(l, r),
                [odd] => *odd,
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
        levels.push(next);
    }
    levels
}

/// Root over `leaves`; [`NodeHash::ZERO`] for an empty list.
pub fn merkle_root(leaves: &[NodeHash]) -> NodeHash {
    if leaves.is_empty() {
        return NodeHash::ZERO;
    }
    levels(leaves)
        .last()
        .and_then(|l| l.first().copied())
        .unwrap_or(NodeHash::ZERO)
}

/// Which side of the running hash the sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// One level of an inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: NodeHash,
    pub side: Side,
}

/// Sibling path from leaf `index` to the root, or `None` if out of range.
pub fn proof_path(leaves: &[NodeHash], index: usize) -> Option<Vec<ProofStep>> {
    if index >= leaves.len() {
        return None;
    }
    let mut path = Vec::new();
    let mut idx = index;
    for level in levels(leaves).iter().filter(|l| l.len() > 1) {
        let sibling = idx ^ 1;
        if sibling < level.len() {
            let side = if sibling < idx { Side::Left } else { Side::Right };
            path.push(ProofStep {
                sibling: level[sibling],
                side,
            });
        }
        idx /= 2;
    }
    Some(path)
}

/// Recompute the root from `leaf` and `path` and compare with `root`.
pub fn verify_proof(leaf: &NodeHash, path: &[ProofStep], root: &NodeHash) -> bool {
    let computed = path.iter().fold(*leaf, |acc, step| match step.side {
        Side::Left => node_hash(&step.sibling, &acc),
        Side::Right => node_hash(&acc, &step.sibling),
    });
    computed == *root
}
