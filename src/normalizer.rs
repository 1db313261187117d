// Symbol normalization and per-provider ticker mapping

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChinaExchange {
    Shanghai,
    Shenzhen,
}

/// Canonical form used for cache keys and pool lookups.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Splits a mainland listing ("600519", "SH600519", "600519.SS", "159915.SZ")
/// into exchange and six-digit code.
pub fn china_listing(symbol: &str) -> Option<(ChinaExchange, String)> {
    let s = normalize_symbol(symbol);

    let (explicit, code) = if let Some(rest) = s.strip_prefix("SH") {
        (Some(ChinaExchange::Shanghai), rest)
    } else if let Some(rest) = s.strip_prefix("SZ") {
        (Some(ChinaExchange::Shenzhen), rest)
    } else if let Some(rest) = s.strip_suffix(".SS").or_else(|| s.strip_suffix(".SH")) {
        (Some(ChinaExchange::Shanghai), rest)
    } else if let Some(rest) = s.strip_suffix(".SZ") {
        (Some(ChinaExchange::Shenzhen), rest)
    } else {
        (None, s.as_str())
    };

    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let exchange = explicit.unwrap_or_else(|| match code.as_bytes()[0] {
        // 6xxxxx main board, 5xxxxx funds/ETFs, 9xxxxx B shares
        b'5' | b'6' | b'9' => ChinaExchange::Shanghai,
        _ => ChinaExchange::Shenzhen,
    });

    Some((exchange, code.to_string()))
}

/// Eastmoney `secid`: "1.600519" for Shanghai, "0.000001" for Shenzhen.
pub fn eastmoney_secid(symbol: &str) -> Option<String> {
    china_listing(symbol).map(|(exchange, code)| match exchange {
        ChinaExchange::Shanghai => format!("1.{}", code),
        ChinaExchange::Shenzhen => format!("0.{}", code),
    })
}

/// Yahoo Finance ticker; mainland codes get the exchange suffix.
pub fn yahoo_ticker(symbol: &str) -> String {
    match china_listing(symbol) {
        Some((ChinaExchange::Shanghai, code)) => format!("{}.SS", code),
        Some((ChinaExchange::Shenzhen, code)) => format!("{}.SZ", code),
        None => normalize_symbol(symbol),
    }
}
