use super::*;

/// `mining.notify` params: job id, previous block hash, the header preimage
/// seed the miner hashes against, the template timestamp as sixteen hex
/// characters, and the clean-jobs flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Notify {
    pub job_id: JobId,
    pub prev_hash: Hash256,
    pub pre_pow_hash: Hash256,
    pub timestamp: u64,
    pub clean_jobs: bool,
}

impl Serialize for Notify {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            &self.job_id,
            &self.prev_hash,
            &self.pre_pow_hash,
            format!("{:016x}", self.timestamp),
            self.clean_jobs,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Notify {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (job_id, prev_hash, pre_pow_hash, timestamp, clean_jobs) =
            <(JobId, Hash256, Hash256, String, bool)>::deserialize(deserializer)?;

        let timestamp = u64::from_str_radix(&timestamp, 16)
            .map_err(|err| de::Error::custom(format!("invalid timestamp hex: {err}")))?;

        Ok(Self {
            job_id,
            prev_hash,
            pre_pow_hash,
            timestamp,
            clean_jobs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Notify {
        Notify {
            job_id: JobId::new(0x1f),
            prev_hash: Hash256::from_hex(
                "4d16b6f85af6e2198f44ae2a6de67f78487ae5611b77c6c0440b921e00000000",
            )
            .unwrap(),
            pre_pow_hash: Hash256::from_hex(
                "a080d9a9c3ad4c9c9e18be6959eb2c12c04e1b85a4fcf4e3a6d8e62926b1f52f",
            )
            .unwrap(),
            timestamp: 0x18c2_862a_0f00,
            clean_jobs: true,
        }
    }

    #[test]
    fn serializes_as_five_params() {
        let value = serde_json::to_value(sample()).unwrap();
        let params = value.as_array().unwrap();

        assert_eq!(params.len(), 5);
        assert_eq!(params[0], "1f");
        assert_eq!(
            params[1],
            "4d16b6f85af6e2198f44ae2a6de67f78487ae5611b77c6c0440b921e00000000"
        );
        assert_eq!(params[3], "000018c2862a0f00");
        assert_eq!(params[4], true);
    }

    #[test]
    fn roundtrip() {
        let notify = sample();
        let value = serde_json::to_value(&notify).unwrap();
        assert_eq!(serde_json::from_value::<Notify>(value).unwrap(), notify);
    }
}
