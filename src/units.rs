//! Conversions between display amounts ("10.5") and token base units.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount '{0}' is not a decimal number")]
    Malformed(String),

    #[error("amount '{0}' has more than {1} fractional digits")]
    TooPrecise(String, u8),

    #[error("amount '{0}' does not fit in base units")]
    Overflow(String),
}

pub fn parse_token_amount(raw: &str, decimals: u8) -> Result<u128, AmountError> {
    let trimmed = raw.trim();
    let (whole, fraction) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (trimmed, ""),
    };
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !all_digits(whole) || !all_digits(fraction)
    {
        return Err(AmountError::Malformed(raw.to_string()));
    }
    if fraction.len() > decimals as usize {
        return Err(AmountError::TooPrecise(raw.to_string(), decimals));
    }

    let overflow = || AmountError::Overflow(raw.to_string());
    let scale = 10u128.checked_pow(decimals as u32).ok_or_else(overflow)?;
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().map_err(|_| overflow())?
    };
    let fraction_units = if fraction.is_empty() {
        0
    } else {
        let padding = 10u128
            .checked_pow((decimals as usize - fraction.len()) as u32)
            .ok_or_else(overflow)?;
        fraction
            .parse::<u128>()
            .map_err(|_| overflow())?
            .checked_mul(padding)
            .ok_or_else(overflow)?
    };
    whole_units
        .checked_mul(scale)
        .and_then(|units| units.checked_add(fraction_units))
        .ok_or_else(overflow)
}

pub fn format_token_amount(amount: u128, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let Some(scale) = 10u128.checked_pow(decimals as u32) else {
        return amount.to_string();
    };
    let whole = amount / scale;
    let fraction = amount % scale;
    if fraction == 0 {
        return whole.to_string();
    }
    let padded = format!("{:0width$}", fraction, width = decimals as usize);
    format!("{whole}.{}", padded.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn parse_token_amount__scales_whole_and_fractional_parts() {
        assert_eq!(parse_token_amount("10", 18).unwrap(), 10 * 10u128.pow(18));
        assert_eq!(parse_token_amount("0.5", 2).unwrap(), 50);
        assert_eq!(parse_token_amount(".25", 2).unwrap(), 25);
        assert_eq!(parse_token_amount("3", 0).unwrap(), 3);
    }

    #[test]
    fn parse_token_amount__rejects_bad_input() {
        assert!(matches!(
            parse_token_amount("1.234", 2),
            Err(AmountError::TooPrecise(_, 2))
        ));
        assert!(matches!(
            parse_token_amount("-1", 18),
            Err(AmountError::Malformed(_))
        ));
        assert!(matches!(parse_token_amount(".", 18), Err(AmountError::Malformed(_))));
        assert!(matches!(
            parse_token_amount("340282366920938463463374607431768211456", 0),
            Err(AmountError::Overflow(_))
        ));
    }

    #[test]
    fn format_token_amount__trims_trailing_zeros() {
        assert_eq!(format_token_amount(10 * 10u128.pow(18), 18), "10");
        assert_eq!(format_token_amount(1_500_000, 6), "1.5");
        assert_eq!(format_token_amount(5, 3), "0.005");
    }
}
