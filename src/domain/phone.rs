//! Phone Normalizer (spec §4.1).
//!
//! Canonicalizes phone strings to a single `254XXXXXXXXX` form (E.164
//! without the leading `+`) and validates the 9-digit subscriber portion
//! against the operator-prefix table. The normalized form is the identity
//! used everywhere else: user id lookup, session key, lock owner tag.

use crate::error::AppError;
use regex::Regex;
use std::sync::OnceLock;

/// Kenyan mobile operator prefixes for the 9-digit subscriber portion
/// (Safaricom, Airtel, Telkom ranges). Grounded in the provider contract
/// implied by spec §6 (M-Pesa STK push, KES amounts): only numbers that
/// could plausibly receive an STK push are accepted.
fn operator_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // compiled once from a fixed literal, infallible in practice
        Regex::new(
            r"^7(0[0-9]|1[0-9]|2[0-9]|3[0-8]|4[0-3]|5[0-9]|6[0-8]|7[0-8]|9[0-2])\d{6}$|^1(0[0-2]|1[0-5])\d{6}$",
        )
        .unwrap()
    })
}

/// Normalizes an arbitrary input phone string to `254XXXXXXXXX`.
///
/// # Errors
///
/// Returns [`AppError::InvalidPhone`] if the string is empty, doesn't
/// resolve to a 9-digit Kenyan subscriber number, or fails the
/// operator-prefix check.
pub fn normalize(input: &str) -> Result<String, AppError> {
    if input.trim().is_empty() {
        return Err(AppError::InvalidPhone);
    }

    let stripped: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let stripped = stripped.strip_prefix('+').unwrap_or(&stripped);

    let national = if let Some(rest) = stripped.strip_prefix("254") {
        rest.to_string()
    } else if let Some(rest) = stripped.strip_prefix('0') {
        rest.to_string()
    } else if stripped.len() == 9 && stripped.chars().all(|c| c.is_ascii_digit()) {
        stripped.to_string()
    } else {
        return Err(AppError::InvalidPhone);
    };

    if national.len() != 9 || !national.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::InvalidPhone);
    }

    if !operator_prefix_re().is_match(&national) {
        return Err(AppError::InvalidPhone);
    }

    Ok(format!("254{national}"))
}

/// `true` iff `input` normalizes successfully.
#[must_use]
pub fn validate(input: &str) -> bool {
    normalize(input).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_254_prefixed() {
        assert_eq!(normalize("254712345678").unwrap(), "254712345678");
    }

    #[test]
    fn accepts_leading_zero() {
        assert_eq!(normalize("0712345678").unwrap(), "254712345678");
    }

    #[test]
    fn accepts_bare_nine_digits() {
        assert_eq!(normalize("712345678").unwrap(), "254712345678");
    }

    #[test]
    fn accepts_plus_and_hyphens() {
        assert_eq!(normalize("+254-712-345-678").unwrap(), "254712345678");
    }

    #[test]
    fn rejects_bad_prefix() {
        assert!(normalize("254012345678").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(normalize("not a phone").is_err());
        assert!(normalize("").is_err());
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize("0712345678").unwrap();
        let twice = normalize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn validate_agrees_with_normalize() {
        for candidate in ["0712345678", "254712345678", "not a phone", "0700012345"] {
            assert_eq!(validate(candidate), normalize(candidate).is_ok());
        }
    }

    proptest::proptest! {
        /// Any string that normalizes once keeps normalizing to the same
        /// value forever after — the normalized form is used as a storage
        /// key (session, lock owner), so it must be a fixed point.
        #[test]
        fn normalize_is_a_fixed_point(subscriber in "7[0-2][0-9]{7}") {
            let once = normalize(&subscriber).expect("prop-generated subscriber number should be valid");
            let twice = normalize(&once).expect("normalized output should re-normalize");
            proptest::prop_assert_eq!(once, twice);
        }

        /// Every equivalent spelling of the same subscriber number
        /// (bare, leading-zero, 254-prefixed, `+`-prefixed) normalizes to
        /// the same canonical form.
        #[test]
        fn equivalent_spellings_agree(subscriber in "7[0-2][0-9]{7}") {
            let bare = normalize(&subscriber).unwrap();
            let with_zero = normalize(&format!("0{subscriber}")).unwrap();
            let with_254 = normalize(&format!("254{subscriber}")).unwrap();
            let with_plus = normalize(&format!("+254{subscriber}")).unwrap();
            proptest::prop_assert_eq!(&bare, &with_zero);
            proptest::prop_assert_eq!(&bare, &with_254);
            proptest::prop_assert_eq!(&bare, &with_plus);
        }
    }
}
