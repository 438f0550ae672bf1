use super::*;
use snafu::Snafu;

/// Wire error codes replied to miners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StratumError {
    Unknown = 20,
    Stale = 21,
    Duplicate = 22,
    LowDifficulty = 23,
    Unauthorized = 24,
    BadData = 25,
    IncorrectPow = 26,
}

impl Display for StratumError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::Unknown => "Unknown problem",
            Self::Stale => "Job not found",
            Self::Duplicate => "Duplicate share submitted",
            Self::LowDifficulty => "Invalid difficulty",
            Self::Unauthorized => "Unauthorized worker",
            Self::BadData => "Bad data from miner",
            Self::IncorrectPow => "Incorrect proof of work",
        };
        f.write_str(message)
    }
}

impl StratumError {
    pub fn into_response(self, data: Option<Value>) -> JsonRpcError {
        JsonRpcError {
            code: self as i32,
            message: self.to_string(),
            data,
        }
    }
}

/// Serialized as the `[code, message, data]` array Stratum expects.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

impl Serialize for JsonRpcError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.code, &self.message, &self.data).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for JsonRpcError {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (code, message, data) = <(i32, String, Option<Value>)>::deserialize(deserializer)?;
        Ok(Self {
            code,
            message,
            data,
        })
    }
}

impl Display for JsonRpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Parse-level failures inside the wire types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum InternalError {
    #[snafu(display("Failed to parse hex string: {source}"))]
    HexParse { source: hex::FromHexError },

    #[snafu(display("Invalid length: expected {expected}, got {actual}"))]
    InvalidLength { expected: usize, actual: usize },

    #[snafu(display("Parse error: {message}"))]
    Parse { message: String },

    #[snafu(display("Invalid value: {reason}"))]
    InvalidValue { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_the_wire_contract() {
        assert_eq!(StratumError::Unknown as i32, 20);
        assert_eq!(StratumError::Stale as i32, 21);
        assert_eq!(StratumError::Duplicate as i32, 22);
        assert_eq!(StratumError::LowDifficulty as i32, 23);
        assert_eq!(StratumError::Unauthorized as i32, 24);
        assert_eq!(StratumError::BadData as i32, 25);
        assert_eq!(StratumError::IncorrectPow as i32, 26);
    }

    #[test]
    fn response_serializes_as_array() {
        let serialized =
            serde_json::to_string(&StratumError::Stale.into_response(None)).unwrap();
        assert_eq!(serialized, r#"[21,"Job not found",null]"#);
    }

    #[test]
    fn response_carries_data() {
        let response = StratumError::IncorrectPow.into_response(Some(json!({
            "submitted": "aa",
            "recalculated": "bb",
        })));

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value[0], 26);
        assert_eq!(value[2]["submitted"], "aa");
        assert_eq!(value[2]["recalculated"], "bb");
    }

    #[test]
    fn response_roundtrip() {
        let response = StratumError::Duplicate.into_response(None);
        let json = serde_json::to_string(&response).unwrap();
        let back: JsonRpcError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn internal_error_display() {
        let err = InternalError::InvalidLength {
            expected: 32,
            actual: 16,
        };
        assert_eq!(err.to_string(), "Invalid length: expected 32, got 16");
    }
}
