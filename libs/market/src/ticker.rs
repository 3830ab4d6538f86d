/// Canonical ticker for user input: uppercased, aliases resolved.
pub fn normalize(ticker: &str) -> String {
    let upper = ticker.trim().to_uppercase();
    match upper.as_str() {
        "GOLD" => "GLD".to_string(),
        "SILVER" => "SLV".to_string(),
        "NASDAQ" => "QQQ".to_string(),
        _ => upper,
    }
}

/// True for the gold ETF or its alias.
pub fn is_gold(ticker: &str) -> bool {
    matches!(ticker.trim().to_uppercase().as_str(), "GLD" | "GOLD")
}
