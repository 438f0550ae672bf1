use super::*;

/// `mining.authorize` params: `"<wallet>[.<worker>]"` plus an ignored
/// password.
#[derive(Debug, Clone, PartialEq)]
pub struct Authorize {
    pub username: String,
    pub password: Option<String>,
}

impl Authorize {
    /// The wallet part, before the first `.`.
    pub fn wallet(&self) -> &str {
        self.username.split('.').next().unwrap_or(&self.username)
    }

    /// The worker name, if the miner declared one.
    pub fn worker_name(&self) -> Option<&str> {
        let mut parts = self.username.splitn(2, '.');
        parts.next();
        parts.next().filter(|worker| !worker.is_empty())
    }
}

impl<'de> Deserialize<'de> for Authorize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let params = Vec::<Value>::deserialize(deserializer)?;

        let username = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| de::Error::custom("expected username as first param"))?
            .to_string();

        let password = params.get(1).and_then(Value::as_str).map(str::to_string);

        Ok(Self { username, password })
    }
}

impl Serialize for Authorize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.password {
            Some(password) => (&self.username, password).serialize(serializer),
            None => (&self.username,).serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_wallet_and_worker() {
        let authorize: Authorize =
            serde_json::from_value(json!(["hoosat:qqabc.rig1", "x"])).unwrap();
        assert_eq!(authorize.wallet(), "hoosat:qqabc");
        assert_eq!(authorize.worker_name(), Some("rig1"));
        assert_eq!(authorize.password.as_deref(), Some("x"));
    }

    #[test]
    fn worker_is_optional() {
        let authorize: Authorize = serde_json::from_value(json!(["hoosat:qqabc"])).unwrap();
        assert_eq!(authorize.wallet(), "hoosat:qqabc");
        assert_eq!(authorize.worker_name(), None);
    }

    #[test]
    fn worker_keeps_only_first_separator() {
        let authorize: Authorize =
            serde_json::from_value(json!(["hoosat:qqabc.rig.gpu0"])).unwrap();
        assert_eq!(authorize.wallet(), "hoosat:qqabc");
        assert_eq!(authorize.worker_name(), Some("rig.gpu0"));
    }

    #[test]
    fn missing_username_is_an_error() {
        assert!(serde_json::from_value::<Authorize>(json!([])).is_err());
        assert!(serde_json::from_value::<Authorize>(json!([7])).is_err());
    }
}
