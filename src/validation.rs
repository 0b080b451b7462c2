//! Request validation: account id, amount, and memo contract as pure
//! functions, independently testable without a running server or RPC.

use crate::GatewayError;

const MAX_AMOUNT: u128 = 1_000_000_000_000; // 10^12 base units
const MAX_MEMO_LEN: usize = 256;

/// Validate a NEAR account-id: lowercase alphanumerics, `_`, `-`, dots;
/// 2-64 chars; dot-separated segments, no leading/trailing/consecutive dots.
pub fn validate_account_id(id: &str) -> Result<(), GatewayError> {
    if id.len() < 2 || id.len() > 64 {
        return Err(GatewayError::Validation(format!(
            "receiverId must be 2-64 characters, got {}",
            id.len()
        )));
    }
    if id.starts_with('.') || id.ends_with('.') || id.contains("..") {
        return Err(GatewayError::Validation(
            "receiverId has leading, trailing, or consecutive dots".into(),
        ));
    }
    let valid_char = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.');
    if !id.chars().all(valid_char) {
        return Err(GatewayError::Validation(
            "receiverId contains characters outside [a-z0-9_-.]".into(),
        ));
    }
    for segment in id.split('.') {
        if segment.is_empty() {
            return Err(GatewayError::Validation(
                "receiverId has an empty dot-separated segment".into(),
            ));
        }
    }
    Ok(())
}

/// Validate the amount: non-empty decimal string, > 0, <= 10^12 base units,
/// <= 24 fractional digits.
pub fn validate_amount(amount: &str) -> Result<(), GatewayError> {
    if amount.is_empty() {
        return Err(GatewayError::Validation("amount must not be empty".into()));
    }
    if !amount.chars().all(|c| c.is_ascii_digit()) {
        return Err(GatewayError::Validation(
            "amount must be a non-negative decimal integer string".into(),
        ));
    }
    if amount.len() > 24 + MAX_AMOUNT.to_string().len() {
        return Err(GatewayError::Validation(
            "amount exceeds 24 fractional digits of precision".into(),
        ));
    }
    let value: u128 = amount
        .parse()
        .map_err(|_| GatewayError::Validation("amount exceeds representable range".into()))?;
    if value == 0 {
        return Err(GatewayError::Validation("amount must be greater than zero".into()));
    }
    if value > MAX_AMOUNT {
        return Err(GatewayError::Validation(format!(
            "amount exceeds the maximum of {MAX_AMOUNT} base units"
        )));
    }
    Ok(())
}

/// Validate an optional memo: printable ASCII (0x20-0x7E, tab, CR, LF),
/// <= 256 chars.
pub fn validate_memo(memo: Option<&str>) -> Result<(), GatewayError> {
    let Some(memo) = memo else {
        return Ok(());
    };
    if memo.len() > MAX_MEMO_LEN {
        return Err(GatewayError::Validation(format!(
            "memo exceeds {MAX_MEMO_LEN} characters"
        )));
    }
    let printable = |b: u8| (0x20..=0x7E).contains(&b) || matches!(b, b'\t' | b'\r' | b'\n');
    if !memo.bytes().all(printable) {
        return Err(GatewayError::Validation(
            "memo contains non-printable bytes".into(),
        ));
    }
    Ok(())
}

pub fn validate_transfer_request(
    receiver_id: &str,
    amount: &str,
    memo: Option<&str>,
) -> Result<(), GatewayError> {
    validate_account_id(receiver_id)?;
    validate_amount(amount)?;
    validate_memo(memo)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_zero_is_invalid() {
        assert!(validate_amount("0").is_err());
    }

    #[test]
    fn amount_over_cap_is_invalid() {
        assert!(validate_amount("1000000000001").is_err());
    }

    #[test]
    fn amount_negative_string_is_invalid() {
        assert!(validate_amount("-1").is_err());
    }

    #[test]
    fn amount_within_range_is_valid() {
        assert!(validate_amount("100").is_ok());
    }

    #[test]
    fn receiver_leading_dot_is_invalid() {
        assert!(validate_account_id(".foo.near").is_err());
    }

    #[test]
    fn receiver_uppercase_is_invalid() {
        assert!(validate_account_id("UPPER.TESTNET").is_err());
    }

    #[test]
    fn receiver_valid_account_passes() {
        assert!(validate_account_id("alice.testnet").is_ok());
    }

    #[test]
    fn memo_with_nul_byte_is_invalid() {
        assert!(validate_memo(Some("bad\u{0}memo")).is_err());
    }

    #[test]
    fn memo_absent_is_valid() {
        assert!(validate_memo(None).is_ok());
    }

    #[test]
    fn memo_too_long_is_invalid() {
        let long = "a".repeat(257);
        assert!(validate_memo(Some(&long)).is_err());
    }

    #[test]
    fn missing_receiver_combination_fails() {
        assert!(validate_transfer_request("a.testnet", "10", None).is_ok());
        assert!(validate_transfer_request("a.testnet", "-1", None).is_err());
    }
}
