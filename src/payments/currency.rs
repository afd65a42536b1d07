//! Static catalog of pay currencies offered at checkout

use serde::Serialize;

/// Pay currency used when neither the processor nor the local record names one
pub const DEFAULT_PAY_CURRENCY: &str = "btc";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CurrencyInfo {
    pub code: &'static str,
    pub name: &'static str,
    /// `false` for codes the processor lists but cannot settle reliably
    pub supported: bool,
}

const fn currency(code: &'static str, name: &'static str) -> CurrencyInfo {
    CurrencyInfo {
        code,
        name,
        supported: true,
    }
}

static CATALOG: &[CurrencyInfo] = &[
    currency("btc", "Bitcoin"),
    currency("eth", "Ethereum"),
    currency("usdt", "Tether (ERC20)"),
    currency("usdttrc20", "Tether (TRC20)"),
    currency("usdc", "USD Coin"),
    currency("ltc", "Litecoin"),
    currency("bch", "Bitcoin Cash"),
    currency("doge", "Dogecoin"),
    currency("xrp", "Ripple"),
    currency("trx", "Tron"),
    currency("bnbbsc", "BNB (BSC)"),
    currency("sol", "Solana"),
    currency("matic", "Polygon"),
    currency("ada", "Cardano"),
    currency("dot", "Polkadot"),
    // Conversions into TUSD fail on the processor side.
    CurrencyInfo {
        code: "tusd",
        name: "TrueUSD",
        supported: false,
    },
];

pub fn catalog() -> &'static [CurrencyInfo] {
    CATALOG
}

/// Look up a catalog entry, case-insensitively
pub fn lookup(code: &str) -> Option<&'static CurrencyInfo> {
    let code = code.trim();
    CATALOG.iter().find(|c| c.code.eq_ignore_ascii_case(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let info = lookup(" ETH ").unwrap();
        assert_eq!(info.code, "eth");
        assert_eq!(info.name, "Ethereum");
        assert!(info.supported);
    }

    #[test]
    fn test_tusd_is_listed_but_unsupported() {
        let info = lookup("tusd").unwrap();
        assert!(!info.supported);
    }

    #[test]
    fn test_unknown_code() {
        assert!(lookup("notacoin").is_none());
    }

    #[test]
    fn test_codes_are_unique_and_default_is_supported() {
        let mut codes: Vec<_> = catalog().iter().map(|c| c.code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), catalog().len());
        assert!(lookup(DEFAULT_PAY_CURRENCY).unwrap().supported);
    }
}
