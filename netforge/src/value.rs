//! Component value parsing and reference designator ordering.

use std::cmp::Ordering;

/// Parse an engineering-notation component value into its SI magnitude.
///
/// Accepts `100nF`, `0.1uF`, `4.7k`, `4k7`, `47kΩ`, `1000µF 10V`, `10K`, `2M2`.
/// Only the first whitespace-separated token is considered, so voltage ratings
/// and dielectric notes after the value are ignored.
pub fn parse_si_value(value: &str) -> Option<f64> {
    let token = value.split_whitespace().next()?;

    let mut num_str = String::new();
    let mut rest = String::new();
    let mut found_digit = false;

    for ch in token.chars() {
        if rest.is_empty() && (ch.is_ascii_digit() || ch == '.') {
            num_str.push(ch);
            found_digit = true;
        } else if found_digit {
            rest.push(ch);
        } else {
            return None;
        }
    }

    if num_str.is_empty() {
        return None;
    }

    let mut chars = rest.chars();
    let first = chars.next();
    let multiplier = first.and_then(multiplier_for);

    // RKM notation: the multiplier letter stands in for the decimal point ("4k7").
    if let Some(mult) = multiplier {
        let tail: String = chars.clone().take_while(|c| c.is_ascii_digit()).collect();
        if !tail.is_empty() && !num_str.contains('.') {
            num_str = format!("{}.{}", num_str, tail);
        }
        let base = num_str.parse::<f64>().ok()?;
        return Some(base * mult);
    }

    // "4R7" means 4.7 ohm
    if matches!(first, Some('R') | Some('r')) {
        let tail: String = chars.take_while(|c| c.is_ascii_digit()).collect();
        if !tail.is_empty() && !num_str.contains('.') {
            num_str = format!("{}.{}", num_str, tail);
        }
    }

    num_str.parse::<f64>().ok()
}

fn multiplier_for(ch: char) -> Option<f64> {
    match ch {
        'p' | 'P' => Some(1e-12),
        'n' | 'N' => Some(1e-9),
        'u' | 'U' | 'µ' | 'μ' => Some(1e-6),
        'm' => Some(1e-3),
        'k' | 'K' => Some(1e3),
        'M' => Some(1e6),
        'G' => Some(1e9),
        _ => None,
    }
}

/// True when `value` is within `tolerance` (fraction, e.g. 0.2) of `target`.
pub fn within_tolerance(value: f64, target: f64, tolerance: f64) -> bool {
    (value - target).abs() <= target.abs() * tolerance + f64::EPSILON * target.abs()
}

/// Split a reference designator into its alphabetic prefix, numeric suffix
/// and whatever trails the number.
fn natural_key(reference: &str) -> (&str, Option<u64>, &str) {
    let digit_start = reference
        .char_indices()
        .find(|(_, c)| c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(reference.len());
    let (prefix, tail) = reference.split_at(digit_start);
    let digit_end = tail
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(tail.len());
    let (digits, rest) = tail.split_at(digit_end);
    (prefix, digits.parse::<u64>().ok(), rest)
}

/// Natural ordering of reference designators: `C2 < C10 < R1`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (pa, na, ra) = natural_key(a);
    let (pb, nb, rb) = natural_key(b);
    pa.cmp(pb)
        .then_with(|| na.cmp(&nb))
        .then_with(|| ra.cmp(rb))
        .then_with(|| a.cmp(b))
}

/// Format a millimetre quantity with at most four decimals and no trailing zeros.
pub fn format_mm(value: f64) -> String {
    let rounded = (value * 10_000.0).round() / 10_000.0;
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    let mut s = format!("{:.4}", rounded);
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.pop();
    }
    s
}
