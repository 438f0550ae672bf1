use super::*;

/// One unit of share difficulty corresponds to a gigahash of expected work
/// under this network's stratum convention.
pub const HASHES_PER_DIFF_1: f64 = 1e9;

/// Explicit prefix table; lookup walks from the largest step down so the
/// boundary values land on the right prefix.
const SI_PREFIXES: &[(&str, f64)] = &[
    ("", 1.0),
    ("K", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
    ("Z", 1e21),
    ("Y", 1e24),
];

/// Hashes per second.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct HashRate(pub f64);

impl HashRate {
    pub const ZERO: Self = Self(0.0);

    /// Estimate from accumulated share-difficulty credit over a window.
    pub fn estimate(total_difficulty: f64, window: Duration) -> Self {
        if window.is_zero() {
            return Self::ZERO;
        }

        Self(total_difficulty * HASHES_PER_DIFF_1 / window.as_secs_f64())
    }

    /// Rate implied by a difficulty and an expected solve frequency.
    pub fn from_difficulty_rate(difficulty: f64, solves_per_second: f64) -> Self {
        Self(difficulty * solves_per_second * HASHES_PER_DIFF_1)
    }

    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl std::ops::Add for HashRate {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl std::iter::Sum for HashRate {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, std::ops::Add::add)
    }
}

impl Display for HashRate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let (prefix, divisor) = SI_PREFIXES
            .iter()
            .rev()
            .find(|(_, divisor)| self.0 >= *divisor)
            .unwrap_or(&SI_PREFIXES[0]);

        write!(f, "{:.2}{prefix}H/s", self.0 / divisor)
    }
}
