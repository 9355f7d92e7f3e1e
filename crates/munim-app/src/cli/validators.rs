/// Validate batch size: must be between 1 and 50.
pub fn validate_batch_size(s: &str) -> Result<usize, String> {
    let value = s
        .parse::<usize>()
        .map_err(|_| format!("invalid number: {}", s))?;

    if value == 0 {
        return Err("batch size must be at least 1".to_string());
    }

    if value > 50 {
        return Err("batch size cannot exceed 50".to_string());
    }

    Ok(value)
}

/// Validate a ledger or company name: non-empty after trimming, at most 200
/// characters.
pub fn validate_ledger_name(s: &str) -> Result<String, String> {
    let trimmed = s.trim();

    if trimmed.is_empty() {
        return Err("name cannot be empty".to_string());
    }

    if trimmed.len() > 200 {
        return Err(format!("name too long: {} chars (max 200)", trimmed.len()));
    }

    Ok(trimmed.to_string())
}
