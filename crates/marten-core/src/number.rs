//! JS number formatting.
//!
//! `number_to_string` produces the shortest decimal representation that
//! round-trips (ECMA-262 `Number::toString`): ryu supplies the shortest
//! significant digits, the notation rules below pick fixed vs exponent
//! form.

/// Format a double per `ToString(number)`.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }

    let negative = n < 0.0;
    let (digits, exponent) = shortest_digits(n.abs());
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    format_digits(&mut out, &digits, exponent);
    out
}

/// Format an int32 (itoa fast path).
pub fn int_to_string(n: i32) -> String {
    let mut buf = itoa::Buffer::new();
    buf.format(n).to_string()
}

/// Shortest significant digits and the decimal exponent `n` such that the
/// value is `0.digits × 10^n` (the `n` of ECMA-262 §6.1.6.1.20).
fn shortest_digits(value: f64) -> (String, i32) {
    debug_assert!(value > 0.0 && value.is_finite());
    let mut buf = ryu::Buffer::new();
    let text = buf.format(value);

    let (mantissa, exp10) = match text.split_once(['e', 'E']) {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (text, 0),
    };
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };

    let mut digits: String = int_part.chars().chain(frac_part.chars()).collect();
    // Decimal point position relative to the digit string.
    let mut point = int_part.len() as i32 + exp10;

    // Strip leading zeros ("0.5" → digits "05").
    let leading = digits.chars().take_while(|&c| c == '0').count();
    digits.drain(..leading);
    point -= leading as i32;
    // Strip trailing zeros.
    let trailing = digits.chars().rev().take_while(|&c| c == '0').count();
    digits.truncate(digits.len() - trailing);

    (digits, point)
}

/// Apply the fixed/exponent notation rules given digits `d` and exponent
/// `n` (value = 0.d × 10^n).
fn format_digits(out: &mut String, digits: &str, n: i32) {
    let k = digits.len() as i32;
    if k <= n && n <= 21 {
        // Integer with trailing zeros.
        out.push_str(digits);
        for _ in 0..(n - k) {
            out.push('0');
        }
    } else if 0 < n && n <= 21 {
        // Decimal point inside the digits.
        out.push_str(&digits[..n as usize]);
        out.push('.');
        out.push_str(&digits[n as usize..]);
    } else if -6 < n && n <= 0 {
        // Leading zeros after "0.".
        out.push_str("0.");
        for _ in 0..(-n) {
            out.push('0');
        }
        out.push_str(digits);
    } else {
        // Exponent notation.
        out.push_str(&digits[..1]);
        if k > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        out.push('e');
        let e = n - 1;
        if e >= 0 {
            out.push('+');
        }
        out.push_str(&e.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_specials() {
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::INFINITY), "Infinity");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(number_to_string(0.0), "0");
        assert_eq!(number_to_string(-0.0), "0");
    }

    #[test]
    fn test_integers() {
        assert_eq!(number_to_string(1.0), "1");
        assert_eq!(number_to_string(-42.0), "-42");
        assert_eq!(number_to_string(2147483648.0), "2147483648");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1e20), "100000000000000000000");
    }

    #[test]
    fn test_fractions() {
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(1.5), "1.5");
        assert_eq!(number_to_string(0.000001), "0.000001");
        assert_eq!(number_to_string(0.0000001), "1e-7");
        assert_eq!(number_to_string(-0.25), "-0.25");
    }

    #[test]
    fn test_shortest_roundtrip() {
        assert_eq!(number_to_string(0.1), "0.1");
        assert_eq!(number_to_string(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(number_to_string(123.456), "123.456");
    }

    proptest! {
        #[test]
        fn prop_roundtrip(value in proptest::num::f64::NORMAL | proptest::num::f64::SUBNORMAL) {
            let text = number_to_string(value);
            let parsed: f64 = text.parse().unwrap();
            prop_assert_eq!(parsed.to_bits(), value.to_bits());
        }
    }
}
