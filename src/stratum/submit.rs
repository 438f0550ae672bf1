use super::*;

/// `mining.submit` params: worker, job id, nonce, claimed PoW hash.
///
/// The nonce is kept as the raw hex the miner sent; extranonce padding and
/// integer parsing happen during validation. Leading `0x` is tolerated on
/// both the nonce and the PoW hash.
#[derive(Debug, Clone, PartialEq)]
pub struct Submit {
    pub worker: String,
    pub job_id: JobId,
    pub nonce: String,
    pub pow_hash: Hash256,
}

impl Serialize for Submit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            &self.worker,
            &self.job_id,
            &self.nonce,
            &self.pow_hash,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Submit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let params = Vec::<Value>::deserialize(deserializer)?;

        if params.len() < 4 {
            return Err(de::Error::custom(format!(
                "expected at least 4 params, got {}",
                params.len()
            )));
        }

        let field = |index: usize, name: &str| -> Result<&str, D::Error> {
            params[index]
                .as_str()
                .ok_or_else(|| de::Error::custom(format!("{name} must be a string")))
        };

        let worker = field(0, "worker")?.to_string();
        let job_id = field(1, "job id")?.parse().map_err(de::Error::custom)?;
        let nonce = field(2, "nonce")?;
        let nonce = nonce.strip_prefix("0x").unwrap_or(nonce).to_string();
        let pow_hash = Hash256::from_hex(field(3, "pow hash")?).map_err(de::Error::custom)?;

        Ok(Self {
            worker,
            job_id,
            nonce,
            pow_hash,
        })
    }
}
