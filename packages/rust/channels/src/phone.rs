//! Phone number helpers.

/// Minimum digit count for a usable phone number.
pub const MIN_PHONE_DIGITS: usize = 10;

fn digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Whether `raw` carries enough digits to dial.
pub fn is_valid_phone(raw: &str) -> bool {
    digits(raw).len() >= MIN_PHONE_DIGITS
}

/// Normalize to E.164-ish form: a bare 10-digit number gets `+1`, anything
/// else gets a `+` prefix. Formatting characters are dropped.
/// Returns `None` when there are no digits at all.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits = digits(raw);
    if digits.is_empty() {
        return None;
    }
    if digits.len() == 10 && !raw.trim_start().starts_with('+') {
        Some(format!("+1{digits}"))
    } else {
        Some(format!("+{digits}"))
    }
}
