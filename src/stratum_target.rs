use super::*;

/// Difficulty 1 corresponds to the largest possible target.
pub static MAX_TARGET: LazyLock<U256> = LazyLock::new(|| U256::MAX >> 1);

/// Fixed-point scale for fractional difficulties. 2^32 keeps ~9 significant
/// digits, well past what miners configure.
const DIFFICULTY_SCALE: u64 = 1 << 32;

/// A miner's assigned share difficulty and its 256-bit comparator.
///
/// `target = ⌊MAX_TARGET / difficulty⌋`; difficulties below one can push the
/// quotient past 256 bits, in which case the comparator saturates and every
/// hash qualifies.
#[derive(Debug, Clone, PartialEq)]
pub struct StratumTarget {
    hash_value: f64,
    target_value: U256,
}

impl StratumTarget {
    pub fn from_difficulty(difficulty: f64) -> Self {
        assert!(
            difficulty.is_finite() && difficulty > 0.0,
            "difficulty must be finite and > 0"
        );

        let numerator = U512::from(*MAX_TARGET) * U512::from(DIFFICULTY_SCALE);
        let denominator = (difficulty * DIFFICULTY_SCALE as f64).round().max(1.0) as u128;
        let quotient = numerator / U512::from(denominator);

        let target_value = U256::try_from(quotient).unwrap_or(U256::MAX);

        Self {
            hash_value: difficulty,
            target_value,
        }
    }

    /// Solo mining hands miners the network target itself.
    pub fn from_network_target(target: U256) -> Self {
        let target_value = if target.is_zero() { U256::MAX } else { target };

        Self {
            hash_value: u256_to_f64(*MAX_TARGET) / u256_to_f64(target_value),
            target_value,
        }
    }

    pub fn difficulty(&self) -> f64 {
        self.hash_value
    }

    pub fn target(&self) -> &U256 {
        &self.target_value
    }

    pub fn met_by(&self, pow_value: &U256) -> bool {
        *pow_value <= self.target_value
    }
}

pub fn u256_to_f64(value: U256) -> f64 {
    value
        .0
        .iter()
        .rev()
        .fold(0.0, |acc, &limb| acc * 2f64.powi(64) + limb as f64)
}
