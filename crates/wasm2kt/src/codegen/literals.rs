//! Numeric literal formatting with exact bit patterns.
//!
//! Kotlin has to reproduce every IEEE-754 value the Wasm module carried:
//! signed zeros, infinities, NaNs with arbitrary payloads, and `Int.MIN_VALUE`
//! shaped integers. NaNs go through `fromBits` because no decimal literal can
//! carry a payload. Any literal whose text starts with `-` is parenthesized so
//! a precedence-0 value never needs caller parens.

use crate::ir::Const;

pub fn const_literal(c: &Const) -> String {
    match *c {
        Const::I32(v) => i32_literal(v),
        Const::I64(v) => i64_literal(v),
        Const::F32(bits) => f32_literal(bits),
        Const::F64(bits) => f64_literal(bits),
    }
}

pub fn i32_literal(v: i32) -> String {
    if v < 0 {
        format!("({v})")
    } else {
        v.to_string()
    }
}

pub fn i64_literal(v: i64) -> String {
    if v == i64::MIN {
        // -9223372036854775808L does not parse: the parser sees a unary minus
        // applied to an out-of-range literal.
        "(-0x7FFFFFFFFFFFFFFFL - 1L)".to_string()
    } else if v < 0 {
        format!("({v}L)")
    } else {
        format!("{v}L")
    }
}

pub fn f32_literal(bits: u32) -> String {
    if (bits & 0x7f80_0000) == 0x7f80_0000 {
        let sign = if bits & 0x8000_0000 != 0 { "-" } else { "" };
        let significand = bits & 0x007f_ffff;
        if significand == 0 {
            if sign.is_empty() {
                "Float.POSITIVE_INFINITY".to_string()
            } else {
                "(-Float.POSITIVE_INFINITY)".to_string()
            }
        } else {
            format!(
                "Float.fromBits({}) /* {}nan:0x{:06x} */",
                bits as i32, sign, significand
            )
        }
    } else if bits == 0x8000_0000 {
        // Negative zero. Special-cased so it isn't formatted as plain 0.
        "(-0.0f)".to_string()
    } else {
        let v = f32::from_bits(bits);
        let text = format!("{}f", format_g(v as f64, 9, false));
        if v.is_sign_negative() {
            format!("({text})")
        } else {
            text
        }
    }
}

pub fn f64_literal(bits: u64) -> String {
    if (bits & 0x7ff0_0000_0000_0000) == 0x7ff0_0000_0000_0000 {
        let sign = if bits & 0x8000_0000_0000_0000 != 0 { "-" } else { "" };
        let significand = bits & 0x000f_ffff_ffff_ffff;
        if significand == 0 {
            if sign.is_empty() {
                "Double.POSITIVE_INFINITY".to_string()
            } else {
                "(-Double.POSITIVE_INFINITY)".to_string()
            }
        } else {
            let bits_text = if bits as i64 == i64::MIN {
                "-0x7FFFFFFFFFFFFFFFL - 1L".to_string()
            } else {
                format!("{}L", bits as i64)
            };
            format!(
                "Double.fromBits({}) /* {}nan:0x{:013x} */",
                bits_text, sign, significand
            )
        }
    } else if bits == 0x8000_0000_0000_0000 {
        "(-0.0)".to_string()
    } else {
        let v = f64::from_bits(bits);
        let mut text = format_g(v, 17, true);
        if text.ends_with('.') {
            text.push('0');
        }
        if v.is_sign_negative() {
            format!("({text})")
        } else {
            text
        }
    }
}

/// Emulation of C `%.<prec>g` (`alt` = the `#` flag): `prec` significant
/// digits, fixed notation when the decimal exponent X satisfies
/// `-4 <= X < prec`, scientific otherwise; without `#`, trailing fractional
/// zeros (and a bare trailing point) are removed.
fn format_g(v: f64, prec: usize, alt: bool) -> String {
    debug_assert!(v.is_finite());
    let prec = prec.max(1);

    // The exponent after rounding to `prec` significant digits; formatting in
    // e-notation first gets rounding cases like 9.99 -> 1.0e1 right.
    let e_text = format!("{:.*e}", prec - 1, v);
    let exp: i32 = e_text[e_text.find('e').expect("e-format contains e") + 1..]
        .parse()
        .expect("exponent is an integer");

    if exp >= -4 && (exp as i64) < prec as i64 {
        let frac_digits = (prec as i32 - 1 - exp).max(0) as usize;
        let mut text = format!("{:.*}", frac_digits, v);
        if alt {
            if frac_digits == 0 {
                text.push('.');
            }
        } else {
            text = strip_fraction_zeros(text);
        }
        text
    } else {
        let (mantissa, _) = e_text.split_at(e_text.find('e').expect("e-format contains e"));
        let mut mantissa = mantissa.to_string();
        if !alt {
            mantissa = strip_fraction_zeros(mantissa);
        } else if !mantissa.contains('.') {
            mantissa.push('.');
        }
        format!("{}e{}{:02}", mantissa, if exp < 0 { '-' } else { '+' }, exp.abs())
    }
}

fn strip_fraction_zeros(mut text: String) -> String {
    if text.contains('.') {
        while text.ends_with('0') {
            text.pop();
        }
        if text.ends_with('.') {
            text.pop();
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i32_parenthesized_when_negative() {
        assert_eq!(i32_literal(0), "0");
        assert_eq!(i32_literal(7), "7");
        assert_eq!(i32_literal(-1), "(-1)");
        assert_eq!(i32_literal(i32::MIN), "(-2147483648)");
    }

    #[test]
    fn i64_min_workaround() {
        assert_eq!(i64_literal(0), "0L");
        assert_eq!(i64_literal(-5), "(-5L)");
        assert_eq!(i64_literal(i64::MIN), "(-0x7FFFFFFFFFFFFFFFL - 1L)");
    }

    #[test]
    fn f32_specials() {
        assert_eq!(f32_literal(f32::INFINITY.to_bits()), "Float.POSITIVE_INFINITY");
        assert_eq!(
            f32_literal(f32::NEG_INFINITY.to_bits()),
            "(-Float.POSITIVE_INFINITY)"
        );
        assert_eq!(f32_literal(0x8000_0000), "(-0.0f)");
        assert_eq!(f32_literal(0f32.to_bits()), "0f");
        // The canonical quiet NaN.
        assert_eq!(
            f32_literal(0x7fc0_0000),
            "Float.fromBits(2143289344) /* nan:0x400000 */"
        );
        // Negative NaN keeps the sign in the comment and a signed bit value.
        assert_eq!(
            f32_literal(0xffc0_0000),
            "Float.fromBits(-4194304) /* -nan:0x400000 */"
        );
    }

    #[test]
    fn f32_round_trip() {
        for bits in [
            0x0000_0001u32, // smallest subnormal
            0x0080_0000,    // smallest normal
            0x3f80_0000,    // 1.0
            0x3fc0_0000,    // 1.5
            0x7f7f_ffff,    // largest finite
            0x4b80_0000,    // 2^24
            0xc2c8_0000,    // -100.0
            0x3eaa_aaab,    // ~1/3
        ] {
            let text = f32_literal(bits);
            let text = text.trim_start_matches('(').trim_end_matches(')');
            let parsed: f32 = text.trim_end_matches('f').parse().unwrap();
            assert_eq!(parsed.to_bits(), bits, "round trip failed for {text}");
        }
    }

    #[test]
    fn f64_round_trip() {
        for bits in [
            0x0000_0000_0000_0001u64,
            0x3ff0_0000_0000_0000, // 1.0
            0x3fb9_9999_9999_999a, // 0.1
            0x7fef_ffff_ffff_ffff, // largest finite
            0x4340_0000_0000_0000, // 2^53
            0xc059_0000_0000_0000, // -100.0
        ] {
            let text = f64_literal(bits);
            let text = text.trim_start_matches('(').trim_end_matches(')');
            let parsed: f64 = text.parse().unwrap();
            assert_eq!(parsed.to_bits(), bits, "round trip failed for {text}");
        }
    }

    #[test]
    fn f64_alt_keeps_precision_and_point() {
        assert_eq!(f64_literal(1f64.to_bits()), "1.0000000000000000");
        assert_eq!(f64_literal(0.1f64.to_bits()), "0.10000000000000001");
        // 2^53 formats with one fractional digit; 2^60 overflows the 17
        // significant digits and switches to scientific notation.
        assert_eq!(f64_literal((2f64.powi(53)).to_bits()), "9007199254740992.0");
        assert_eq!(
            f64_literal((2f64.powi(60)).to_bits()),
            "1.1529215046068470e+18"
        );
        assert_eq!(f64_literal(1e300f64.to_bits()), "1.0000000000000000e+300");
    }

    #[test]
    fn f32_strips_trailing_zeros() {
        assert_eq!(f32_literal(1.5f32.to_bits()), "1.5f");
        assert_eq!(f32_literal(1f32.to_bits()), "1f");
        assert_eq!(f32_literal((-1.5f32).to_bits()), "(-1.5f)");
        assert_eq!(f32_literal(1e10f32.to_bits()), "1e+10f");
    }
}
