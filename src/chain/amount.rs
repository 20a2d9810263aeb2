//! Conversion between decimal currency strings and integer chain units.
//!
//! The chain counts in integer units, `scale` units per currency unit
//! (100 by default, so one unit is a cent). Conversion happens exactly once,
//! at the adapter boundary: inbound decimal strings round half-to-even to
//! the nearest unit, outbound units render with two decimals. Negative and
//! malformed inbound values convert to zero; rejecting them is the
//! operation layer's job, before they get here.

/// Parses a decimal string into chain units. Round-half-to-even at the unit
/// boundary; malformed or negative input yields 0.
pub fn to_units(decimal: &str, scale: u64) -> u64 {
    let trimmed = decimal.trim();
    if trimmed.is_empty() || trimmed.starts_with('-') || scale == 0 {
        return 0;
    }
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);

    let (int_part, frac_part) = match trimmed.split_once('.') {
        Some((i, f)) => (i, f),
        None => (trimmed, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return 0;
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return 0;
    }

    let whole: u128 = if int_part.is_empty() {
        0
    } else {
        match int_part.parse() {
            Ok(v) => v,
            Err(_) => return 0,
        }
    };

    // The fraction contributes frac * scale / 10^len, rounded half-to-even.
    let mut numerator: u128 = 0;
    let mut denominator: u128 = 1;
    for c in frac_part.chars() {
        // Past ~30 digits the contribution is noise; stop before overflow.
        if denominator > u128::MAX / 10 {
            break;
        }
        numerator = numerator * 10 + (c as u128 - '0' as u128);
        denominator *= 10;
    }
    let scaled = numerator * scale as u128;
    let quotient = scaled / denominator;
    let remainder = scaled % denominator;
    let frac_units = match (remainder * 2).cmp(&denominator) {
        std::cmp::Ordering::Less => quotient,
        std::cmp::Ordering::Greater => quotient + 1,
        // Exactly half: round to even.
        std::cmp::Ordering::Equal => {
            if quotient % 2 == 0 {
                quotient
            } else {
                quotient + 1
            }
        }
    };

    let total = whole.saturating_mul(scale as u128).saturating_add(frac_units);
    total.min(u64::MAX as u128) as u64
}

/// Renders chain units as a two-decimal currency string.
pub fn from_units(units: u64, scale: u64) -> String {
    if scale == 0 {
        return "0.00".to_string();
    }
    let whole = units / scale;
    let frac = units % scale;
    // Normalise the fraction to two decimals regardless of scale.
    let cents = (frac as u128 * 100 / scale as u128) as u64;
    format!("{}.{:02}", whole, cents)
}

/// The canonical two-decimal form of a decimal string.
pub fn canonicalise(decimal: &str, scale: u64) -> String {
    from_units(to_units(decimal, scale), scale)
}
