use super::*;

/// Server-assigned nonce prefix partitioning the search space between miners.
/// At most three bytes so miners keep at least five nonce bytes to roll.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Extranonce(Vec<u8>);

impl Extranonce {
    /// Derive a per-connection extranonce from a connection counter,
    /// truncated to `size` low-order bytes.
    pub fn from_counter(counter: u32, size: usize) -> Self {
        let bytes = counter.to_be_bytes();
        Self(bytes[bytes.len() - size..].to_vec())
    }

    pub fn from_hex(s: &str) -> Result<Self, InternalError> {
        let bytes = hex::decode(s).map_err(|source| InternalError::HexParse { source })?;
        Ok(Self(bytes))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Rebuild the full sixteen-hex-character nonce from a miner submission.
    ///
    /// A miner that was assigned an extranonce only rolls the remaining
    /// `16 - 2·len` characters; its submission is prefixed with the
    /// extranonce and left-padded with zeros in between. A longer submission
    /// already carries the full nonce and passes through untouched.
    pub fn pad_nonce(&self, nonce: &str) -> String {
        let rolled_width = NONCE_HEX_WIDTH - 2 * self.len();
        if nonce.len() <= rolled_width {
            format!("{}{:0>rolled_width$}", self.to_hex(), nonce)
        } else {
            nonce.to_string()
        }
    }
}

impl Display for Extranonce {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Extranonce {
    type Err = InternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Extranonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Extranonce {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}
