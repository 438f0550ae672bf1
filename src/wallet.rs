use {super::*, regex::Regex};

pub const MAINNET_PREFIX: &str = "hoosat";
pub const TESTNET_PREFIX: &str = "hoosattest";

/// Bech32 payload alphabet used by network addresses.
const CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// Payload length of a schnorr public key address.
const PAYLOAD_LENGTH: usize = 54;

/// Mainnet addresses are exactly this long; longer inputs from miner
/// configuration templates get truncated back down to it.
const ADDRESS_LENGTH: usize = 61;

static WALLET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("(hoosat|hoosattest):[a-z0-9]+").unwrap());

/// Coerce miner-supplied wallet strings into a usable payout address.
///
/// Accepts well-formed addresses under either network prefix verbatim,
/// retries once with the mainnet prefix when none was given, and trims
/// overlong but otherwise plausible addresses down to the canonical length.
pub fn clean_wallet(input: &str) -> Result<String> {
    if decodes_as_address(input) {
        return Ok(input.to_string());
    }

    if !input.starts_with(&format!("{MAINNET_PREFIX}:"))
        && !input.starts_with(&format!("{TESTNET_PREFIX}:"))
    {
        return clean_wallet(&format!("{MAINNET_PREFIX}:{input}"));
    }

    if WALLET_REGEX.is_match(input) && input.len() >= ADDRESS_LENGTH {
        if let Some(truncated) = input.get(..ADDRESS_LENGTH) {
            return Ok(truncated.to_string());
        }
    }

    bail!("unable to coerce `{input}` to a valid hoosat or hoosattest address")
}

fn decodes_as_address(input: &str) -> bool {
    [MAINNET_PREFIX, TESTNET_PREFIX].iter().any(|prefix| {
        input
            .strip_prefix(&format!("{prefix}:"))
            .is_some_and(|payload| {
                payload.len() == PAYLOAD_LENGTH
                    && payload.chars().all(|c| CHARSET.contains(c))
            })
    })
}
