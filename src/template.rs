use super::*;

/// A 32-byte hash, hex on the wire. PoW hashes are little-endian byte order;
/// the big-endian interpretation only exists inside target comparisons.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn from_hex(s: &str) -> Result<Self, stratum::InternalError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|source| stratum::InternalError::HexParse { source })?;
        let bytes: [u8; 32] =
            bytes
                .try_into()
                .map_err(|bytes: Vec<u8>| stratum::InternalError::InvalidLength {
                    expected: 32,
                    actual: bytes.len(),
                })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({self})")
    }
}

impl Display for Hash256 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Hash256 {
    type Err = stratum::InternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

/// Block header as served by the node template RPC. The nonce is the only
/// field the bridge mutates.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcHeader {
    pub version: u16,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    /// Milliseconds since epoch.
    pub timestamp: u64,
    pub bits: u32,
    pub nonce: u64,
    pub blue_score: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcOutput {
    pub amount: u64,
    pub script_public_key_address: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    /// Hex-encoded payload. The coinbase payload carries the worker tag.
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub outputs: Vec<RpcOutput>,
}

/// Verbose metadata the node attaches when a block is fetched by hash.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlockVerboseData {
    pub hash: String,
    pub blue_score: u64,
    #[serde(default)]
    pub is_chain_block: bool,
    #[serde(default)]
    pub selected_parent_hash: String,
    #[serde(default)]
    pub merge_set_blues_hashes: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    pub header: RpcHeader,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose_data: Option<RpcBlockVerboseData>,
}

impl RpcBlock {
    pub fn coinbase(&self) -> Option<&RpcTransaction> {
        self.transactions.first()
    }

    /// Same header identity means the template would produce duplicate work.
    pub fn same_work(&self, other: &RpcBlock) -> bool {
        self.header.prev_hash == other.header.prev_hash
            && self.header.merkle_root == other.header.merkle_root
            && self.header.timestamp == other.header.timestamp
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DagInfo {
    #[serde(default)]
    pub tip_hashes: Vec<String>,
    pub virtual_blue_score: u64,
    #[serde(default)]
    pub network_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash256_hex_roundtrip() {
        let hex = "0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20";
        let hash = Hash256::from_hex(hex).unwrap();
        assert_eq!(hash.to_string(), hex);
        assert_eq!(hash.0[0], 0x01);
        assert_eq!(hash.0[31], 0x20);
    }

    #[test]
    fn hash256_strips_0x_prefix() {
        let hex = "00000000000000000000000000000000000000000000000000000000000000ff";
        assert_eq!(
            Hash256::from_hex(&format!("0x{hex}")).unwrap(),
            Hash256::from_hex(hex).unwrap()
        );
    }

    #[test]
    fn hash256_rejects_wrong_length() {
        assert!(Hash256::from_hex("abcd").is_err());
        assert!(Hash256::from_hex("").is_err());
        assert!(Hash256::from_hex("zz").is_err());
    }

    #[test]
    fn hash256_serde_as_string() {
        let hash =
            Hash256::from_hex("4d16b6f85af6e2198f44ae2a6de67f78487ae5611b77c6c0440b921e00000000")
                .unwrap();
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(
            json,
            r#""4d16b6f85af6e2198f44ae2a6de67f78487ae5611b77c6c0440b921e00000000""#
        );
        assert_eq!(serde_json::from_str::<Hash256>(&json).unwrap(), hash);
    }

    #[test]
    fn same_work_ignores_nonce_and_blue_score() {
        let block = RpcBlock {
            header: RpcHeader {
                timestamp: 1000,
                blue_score: 50,
                ..Default::default()
            },
            ..Default::default()
        };

        let mut other = block.clone();
        other.header.nonce = 99;
        other.header.blue_score = 51;
        assert!(block.same_work(&other));

        other.header.timestamp = 1001;
        assert!(!block.same_work(&other));
    }

    #[test]
    fn rpc_block_json_field_names() {
        let block = RpcBlock {
            header: RpcHeader {
                blue_score: 7,
                ..Default::default()
            },
            ..Default::default()
        };

        let value = serde_json::to_value(&block).unwrap();
        assert!(value["header"]["blueScore"].is_u64());
        assert!(value["header"]["prevHash"].is_string());
    }
}
