// vim: tw=80
//! Size-string parsing and human-readable formatting for the `-s`/`--size`
//! option and for progress reporting.
//!
//! Accepts a decimal, hexadecimal (`0x...`) or octal (`0...`) integer
//! followed by an optional multiplier suffix: `c` for 1, `b` for 512, and
//! `K`/`M`/`G`/`T`/`P`/`E`/`Z`/`Y` for the binary power of 1024, or the same
//! letter immediately followed by `B` for the corresponding power of 1000
//! (so `1K` is 1024 bytes, `1KB` is 1000 bytes).

use std::ffi::OsStr;

use clap::{
    builder::TypedValueParser,
    error::ErrorKind,
    Arg,
    Command,
    Error,
};

use crate::error::ShredError;

fn suffix_multiplier(letter: char, decimal: bool) -> Option<u64> {
    let power = match letter {
        'c' => return Some(1),
        'b' => return Some(512),
        'K' => 1,
        'M' => 2,
        'G' => 3,
        'T' => 4,
        'P' => 5,
        'E' => 6,
        'Z' => 7,
        'Y' => 8,
        _ => return None,
    };
    let base: u64 = if decimal { 1000 } else { 1024 };
    base.checked_pow(power)
}

/// Parse a size string of the form accepted by `-s`/`--size`. Returns the
/// size in bytes, or `None` on any malformed input (bad numeral, unknown
/// suffix, trailing garbage, or overflow).
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (digits_end, base) = numeral_end(s)?;
    let (numeral, rest) = s.split_at(digits_end);
    let value = u64::from_str_radix(strip_base_prefix(numeral, base), base)
        .ok()?;

    if rest.is_empty() {
        return Some(value);
    }

    let mut rest_chars = rest.chars();
    let letter = rest_chars.next()?;
    let (decimal, trailing_ok) = match rest_chars.next() {
        None => (false, true),
        Some('B') => (true, rest_chars.next().is_none()),
        Some(_) => (false, false),
    };
    if !trailing_ok {
        return None;
    }
    let mult = suffix_multiplier(letter, decimal)?;
    value.checked_mul(mult)
}

/// Returns the byte length of the leading numeral in `s` and its radix (16
/// for `0x`/`0X` prefixed, 8 for a bare leading `0` followed by more octal
/// digits, 10 otherwise).
fn numeral_end(s: &str) -> Option<(usize, u32)> {
    let bytes = s.as_bytes();
    if bytes.is_empty() || !bytes[0].is_ascii_digit() {
        return None;
    }
    if bytes.len() >= 2
        && bytes[0] == b'0'
        && (bytes[1] == b'x' || bytes[1] == b'X')
    {
        let end = 2 + s[2..]
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or(s.len() - 2);
        return Some((end, 16));
    }
    if bytes[0] == b'0' && bytes.len() > 1 && bytes[1].is_ascii_digit() {
        let end = s.find(|c: char| !('0'..='7').contains(&c)).unwrap_or(s.len());
        return Some((end, 8));
    }
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    Some((end, 10))
}

fn strip_base_prefix(numeral: &str, base: u32) -> &str {
    if base == 16 {
        &numeral[2..]
    } else {
        numeral
    }
}

/// A `clap` value parser wrapping [`parse_size`], mirroring the way the
/// monitor-range option is parsed: a small, purpose-built `TypedValueParser`
/// rather than a generic string-to-number conversion.
#[derive(Clone, Debug, Default)]
pub struct SizeParser;

impl TypedValueParser for SizeParser {
    type Value = u64;

    fn parse_ref(
        &self,
        cmd: &Command,
        arg: Option<&Arg>,
        value: &OsStr,
    ) -> Result<Self::Value, Error> {
        let text = value.to_str().ok_or_else(|| {
            Error::new(ErrorKind::InvalidUtf8).with_cmd(cmd)
        })?;
        parse_size(text).ok_or_else(|| {
            let reason = ShredError::InvalidSize(text.to_owned());
            let mut err = Error::new(ErrorKind::InvalidValue).with_cmd(cmd);
            if let Some(arg) = arg {
                err.insert(
                    clap::error::ContextKind::InvalidArg,
                    clap::error::ContextValue::String(arg.to_string()),
                );
            }
            err.insert(
                clap::error::ContextKind::InvalidValue,
                clap::error::ContextValue::String(reason.to_string()),
            );
            err
        })
    }
}

/// Render `bytes` as a human-scaled value with a binary (base-1024) suffix,
/// e.g. `1.5M`, for progress messages. Rounds toward the ceiling so a
/// not-yet-finished pass never claims to be fully done.
pub fn human_readable_ceiling(bytes: u64) -> String {
    const UNITS: [&str; 9] =
        ["", "K", "M", "G", "T", "P", "E", "Z", "Y"];
    if bytes == 0 {
        return "0".to_string();
    }
    let mut scaled = bytes as f64;
    let mut unit = 0;
    while scaled >= 1024.0 && unit < UNITS.len() - 1 {
        scaled /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        return format!("{bytes}");
    }
    // One decimal digit of precision, rounded up, matches the ceiling mode
    // upstream uses for the "total size" half of a progress line.
    let tenths = (scaled * 10.0).ceil() / 10.0;
    if (tenths.fract()).abs() < f64::EPSILON {
        format!("{}{}", tenths as u64, UNITS[unit])
    } else {
        format!("{:.1}{}", tenths, UNITS[unit])
    }
}

/// Render `bytes` the same way as [`human_readable_ceiling`] but rounding
/// toward the floor, for the "current offset" half of a progress line.
pub fn human_readable_floor(bytes: u64) -> String {
    const UNITS: [&str; 9] =
        ["", "K", "M", "G", "T", "P", "E", "Z", "Y"];
    if bytes == 0 {
        return "0".to_string();
    }
    let mut scaled = bytes as f64;
    let mut unit = 0;
    while scaled >= 1024.0 && unit < UNITS.len() - 1 {
        scaled /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        return format!("{bytes}");
    }
    let tenths = (scaled * 10.0).floor() / 10.0;
    if (tenths.fract()).abs() < f64::EPSILON {
        format!("{}{}", tenths as u64, UNITS[unit])
    } else {
        format!("{:.1}{}", tenths, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_decimal() {
        assert_eq!(parse_size("4096"), Some(4096));
        assert_eq!(parse_size("0"), Some(0));
    }

    #[test]
    fn hex_and_octal_numerals() {
        assert_eq!(parse_size("0x1000"), Some(0x1000));
        assert_eq!(parse_size("0755"), Some(0o755));
    }

    #[test]
    fn byte_and_block_suffixes() {
        assert_eq!(parse_size("1c"), Some(1));
        assert_eq!(parse_size("1b"), Some(512));
    }

    #[test]
    fn binary_vs_decimal_suffixes() {
        assert_eq!(parse_size("1K"), Some(1024));
        assert_eq!(parse_size("1KB"), Some(1000));
        assert_eq!(parse_size("2M"), Some(2 * 1024 * 1024));
        assert_eq!(parse_size("2MB"), Some(2_000_000));
        assert_eq!(parse_size("1G"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size("1GB"), Some(1_000_000_000));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_size(""), None);
        assert_eq!(parse_size("K"), None);
        assert_eq!(parse_size("10Q"), None);
        assert_eq!(parse_size("10KiB"), None);
        assert_eq!(parse_size("-5"), None);
    }

    #[test]
    fn rejects_overflow() {
        assert_eq!(parse_size("99999999999999999999Y"), None);
    }

    #[test]
    fn human_readable_examples() {
        assert_eq!(human_readable_floor(0), "0");
        assert_eq!(human_readable_floor(512), "512");
        assert_eq!(human_readable_floor(1024), "1K");
        assert_eq!(human_readable_ceiling(1536), "1.5K");
    }
}
