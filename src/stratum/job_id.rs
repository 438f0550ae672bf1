use {
    super::*,
    serde_with::{DeserializeFromStr, SerializeDisplay},
};

/// Locally assigned job identifier, lowercase hex on the wire. Monotonic per
/// connection; wraps at `u64::MAX`, far beyond any connection lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, DeserializeFromStr, SerializeDisplay)]
#[repr(transparent)]
pub struct JobId(u64);

impl JobId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl FromStr for JobId {
    type Err = InternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(JobId).map_err(|err| {
            ParseSnafu {
                message: format!("invalid job id `{s}`: {err}"),
            }
            .build()
        })
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_is_bare_hex() {
        assert_eq!(JobId::new(0).to_string(), "0");
        assert_eq!(JobId::new(0x2a).to_string(), "2a");
        assert_eq!("2A".parse::<JobId>().unwrap(), JobId::new(0x2a));
        assert_eq!(
            serde_json::to_string(&JobId::new(0xbeef)).unwrap(),
            r#""beef""#
        );
    }

    #[test]
    fn rejects_non_hex() {
        assert!("".parse::<JobId>().is_err());
        assert!("0x1".parse::<JobId>().is_err());
        assert!("xyz".parse::<JobId>().is_err());
        assert!("10000000000000000".parse::<JobId>().is_err());
    }

    #[test]
    fn next_is_monotonic_and_wraps() {
        let id = JobId::new(5);
        assert_eq!(id.next(), JobId::new(6));
        assert_eq!(JobId::new(u64::MAX).next(), JobId::new(0));
    }
}
