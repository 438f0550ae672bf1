use {
    super::*,
    sha3::{
        CShake256, CShake256Core,
        digest::{ExtendableOutput, Update, XofReader},
    },
};

const BLOCK_HASH_DOMAIN: &[u8] = b"BlockHash";
const POW_HASH_DOMAIN: &[u8] = b"ProofOfWorkHash";

/// Precomputed per-template proof-of-work context.
///
/// The pre-PoW hash commits to the whole header except the two fields the
/// miner rolls (nonce) or that are fixed per job (timestamp), so one state
/// serves every nonce a miner tries against the job.
pub struct PowState {
    pre_pow_hash: Hash256,
    timestamp: u64,
    pub target: U256,
}

impl PowState {
    pub fn new(header: &RpcHeader) -> Self {
        Self {
            pre_pow_hash: pre_pow_hash(header),
            timestamp: header.timestamp,
            target: target_from_bits(header.bits),
        }
    }

    pub fn pre_pow_hash(&self) -> Hash256 {
        self.pre_pow_hash
    }

    /// Recompute the PoW hash for a nonce. Returns the comparison integer
    /// and the little-endian hash itself.
    pub fn pow_value(&self, nonce: u64) -> (U256, Hash256) {
        let hash = cshake256(
            POW_HASH_DOMAIN,
            &[
                self.pre_pow_hash.as_bytes(),
                &self.timestamp.to_le_bytes(),
                &[0u8; 32],
                &nonce.to_le_bytes(),
            ],
        );

        (pow_hash_to_num(&hash), hash)
    }

    pub fn meets_network_target(&self, pow_value: &U256) -> bool {
        *pow_value <= self.target
    }
}

/// Hash the header with nonce and timestamp zeroed, in the block-hash domain.
pub fn pre_pow_hash(header: &RpcHeader) -> Hash256 {
    cshake256(
        BLOCK_HASH_DOMAIN,
        &[
            &header.version.to_le_bytes(),
            header.prev_hash.as_bytes(),
            header.merkle_root.as_bytes(),
            &0u64.to_le_bytes(), // timestamp
            &header.bits.to_le_bytes(),
            &0u64.to_le_bytes(), // nonce
            &header.blue_score.to_le_bytes(),
        ],
    )
}

/// PoW hashes are little-endian 32-byte values; target comparison treats them
/// as big integers, so the byte order is reversed to big-endian first.
pub fn pow_hash_to_num(hash: &Hash256) -> U256 {
    let mut bytes = hash.0;
    bytes.reverse();
    U256::from_big_endian(&bytes)
}

/// Decode the compact target representation carried in the header bits.
pub fn target_from_bits(bits: u32) -> U256 {
    let exponent = bits >> 24;
    let mantissa = U256::from(bits & 0x00ff_ffff);

    if exponent <= 3 {
        mantissa >> (8 * (3 - exponent) as usize)
    } else {
        let shift = 8 * (exponent - 3) as usize;
        if shift > 256 - 24 {
            U256::MAX
        } else {
            mantissa << shift
        }
    }
}

fn cshake256(domain: &[u8], chunks: &[&[u8]]) -> Hash256 {
    let mut hasher = CShake256::from_core(CShake256Core::new(domain));
    for chunk in chunks {
        hasher.update(chunk);
    }

    let mut out = [0u8; 32];
    hasher.finalize_xof().read(&mut out);
    Hash256(out)
}
