use anyhow::{bail, Context, Result};

/// Parses sizes such as `500`, `10K`, `50M` or `2G` into bytes.
///
/// Suffixes are binary multiples and case-insensitive. An empty string means no
/// limit and parses to 0.
pub fn parse_human_size(text: &str) -> Result<u64> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(0);
    }

    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, suffix) = text.split_at(split);
    if digits.is_empty() {
        bail!("Invalid size '{}': missing number", text);
    }
    let multiplier: u64 = match suffix.to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" => 1024,
        "M" => 1024 * 1024,
        "G" => 1024 * 1024 * 1024,
        other => bail!("Invalid size '{}': unknown suffix '{}'", text, other),
    };

    let value: u64 = digits
        .parse()
        .with_context(|| format!("Invalid size '{}'", text))?;
    value
        .checked_mul(multiplier)
        .with_context(|| format!("Size '{}' is too large", text))
}
