// Numeric-string check for submitted values: optional surrounding whitespace, optional sign,
// decimal mantissa with at least one digit, optional exponent. No hex, no inf/nan.

const WHITESPACE: &[char] = &[' ', '\t', '\n', '\r', '\u{0B}', '\u{0C}'];

/// Parse `s` if it is a numeric string, else `None`.
pub fn parse_numeric(s: &str) -> Option<f64> {
    let trimmed = s.trim_matches(WHITESPACE);
    if !is_numeric_literal(trimmed) {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Loose equality between a stored value and a candidate name:
/// numerically when both are numeric strings, byte-wise otherwise.
pub fn loose_eq(a: &str, b: &str) -> bool {
    match (parse_numeric(a), parse_numeric(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn is_numeric_literal(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }
    let int_digits = count_digits(&bytes[i..]);
    i += int_digits;
    let mut frac_digits = 0;
    if bytes.get(i) == Some(&b'.') {
        i += 1;
        frac_digits = count_digits(&bytes[i..]);
        i += frac_digits;
    }
    if int_digits + frac_digits == 0 {
        return false;
    }
    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        i += 1;
        if matches!(bytes.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        let exp_digits = count_digits(&bytes[i..]);
        if exp_digits == 0 {
            return false;
        }
        i += exp_digits;
    }
    i == bytes.len()
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}
