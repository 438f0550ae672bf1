use super::*;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Id {
    Null,
    Number(u64),
    String(String),
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Id::Null => serializer.serialize_none(),
            Id::Number(n) => serializer.serialize_u64(*n),
            Id::String(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(Id::Null),
            Value::Number(n) => n
                .as_u64()
                .map(Id::Number)
                .ok_or_else(|| de::Error::custom("request id out of range")),
            Value::String(s) => Ok(Id::String(s)),
            other => Err(de::Error::custom(format!("invalid request id: {other}"))),
        }
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Id::Null => f.write_str("null"),
            Id::Number(n) => write!(f, "{n}"),
            Id::String(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: Id,
        method: String,
        params: Value,
    },
    Response {
        id: Id,
        result: Option<Value>,
        error: Option<JsonRpcError>,
    },
    /// Server-initiated; carries `"id": null` on the wire, which some miners
    /// require even though JSON-RPC says the field should be absent.
    Notification { method: String, params: Value },
}

impl Message {
    pub fn notification(method: &str, params: Value) -> Self {
        Message::Notification {
            method: method.into(),
            params,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request { method, .. } | Message::Notification { method, .. } => Some(method),
            Message::Response { .. } => None,
        }
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = match self {
            Message::Request { id, method, params } => json!({
                "id": id,
                "method": method,
                "params": params,
            }),
            Message::Response { id, result, error } => json!({
                "id": id,
                "result": result,
                "error": error,
            }),
            Message::Notification { method, params } => json!({
                "id": Value::Null,
                "method": method,
                "params": params,
            }),
        };
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;

        let has_method = value.get("method").is_some();
        let null_id = matches!(value.get("id"), None | Some(Value::Null));

        if value.get("result").is_some() || value.get("error").is_some() {
            #[derive(Deserialize)]
            struct Resp {
                #[serde(default = "default_id")]
                id: Id,
                result: Option<Value>,
                error: Option<JsonRpcError>,
            }

            let resp: Resp = serde_json::from_value(value).map_err(de::Error::custom)?;
            Ok(Message::Response {
                id: resp.id,
                result: resp.result,
                error: resp.error,
            })
        } else if has_method && null_id {
            let method = value
                .get("method")
                .and_then(Value::as_str)
                .ok_or_else(|| de::Error::custom("method must be a string"))?
                .to_string();
            let params = value.get("params").cloned().unwrap_or(Value::Null);
            Ok(Message::Notification { method, params })
        } else if has_method {
            #[derive(Deserialize)]
            struct Req {
                id: Id,
                method: String,
                params: Value,
            }

            let req: Req = serde_json::from_value(value).map_err(de::Error::custom)?;
            Ok(Message::Request {
                id: req.id,
                method: req.method,
                params: req.params,
            })
        } else {
            Err(de::Error::custom("unknown message format"))
        }
    }
}

fn default_id() -> Id {
    Id::Null
}
