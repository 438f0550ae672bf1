use super::*;

/// `mining.subscribe` params: optionally the miner application string, which
/// selects job format quirks downstream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subscribe {
    pub user_agent: Option<String>,
}

impl<'de> Deserialize<'de> for Subscribe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let params = Vec::<Value>::deserialize(deserializer)?;
        let user_agent = params
            .first()
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Self { user_agent })
    }
}

impl Serialize for Subscribe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.user_agent {
            Some(agent) => vec![agent.as_str()].serialize(serializer),
            None => Vec::<&str>::new().serialize(serializer),
        }
    }
}

/// Reply to `mining.subscribe`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeResult {
    pub protocol: &'static str,
}

impl Default for SubscribeResult {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL_VERSION,
        }
    }
}

impl Serialize for SubscribeResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (true, self.protocol).serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_is_optional() {
        assert_eq!(
            serde_json::from_value::<Subscribe>(json!([])).unwrap(),
            Subscribe { user_agent: None }
        );
        assert_eq!(
            serde_json::from_value::<Subscribe>(json!(["BzMiner-v15"])).unwrap(),
            Subscribe {
                user_agent: Some("BzMiner-v15".into())
            }
        );
    }

    #[test]
    fn non_string_first_param_tolerated() {
        assert_eq!(
            serde_json::from_value::<Subscribe>(json!([42])).unwrap(),
            Subscribe { user_agent: None }
        );
    }

    #[test]
    fn result_advertises_protocol() {
        let value = serde_json::to_value(SubscribeResult::default()).unwrap();
        assert_eq!(value, json!([true, "EthereumStratum/1.0.0"]));
    }
}
