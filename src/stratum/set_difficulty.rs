use super::*;

/// `mining.set_difficulty` params: the difficulty as a bare number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetDifficulty(pub f64);

impl Serialize for SetDifficulty {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.0,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SetDifficulty {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (difficulty,) = <(f64,)>::deserialize(deserializer)?;
        Ok(Self(difficulty))
    }
}
