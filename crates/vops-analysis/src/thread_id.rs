//! Thread references inside a slow event's phase breakdown.
//!
//! Threads appear as bracketed hex tokens, e.g. `lock wait[7f3a9c0d1e00]`.
//! Slow events report their own thread as a decimal string, so every token
//! is converted to decimal. Tokens can exceed 64 bits.

use regex::Regex;
use std::sync::OnceLock;

fn bracket_token() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[.+?\]").ok()).as_ref()
}

/// Decimal thread ids referenced by `phases`, deduplicated, in order of
/// first appearance. Tokens that are not valid hex are skipped.
pub fn parse_thread_ids(phases: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let Some(re) = bracket_token() else {
        return ids;
    };
    for m in re.find_iter(phases) {
        let token = &m.as_str()[1..m.as_str().len() - 1];
        let Some(id) = hex_to_decimal(token) else {
            tracing::debug!("skipping non-hex thread token '{token}'");
            continue;
        };
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

const LIMB_BASE: u64 = 1_000_000_000;

/// Convert an arbitrarily long hex string to decimal. Accepts an optional
/// `0x` prefix.
pub fn hex_to_decimal(hex: &str) -> Option<String> {
    let digits = hex.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);
    if digits.is_empty() {
        return None;
    }

    // Little-endian base 10^9 limbs.
    let mut limbs: Vec<u64> = vec![0];
    for c in digits.chars() {
        let mut carry = u64::from(c.to_digit(16)?);
        for limb in limbs.iter_mut() {
            let v = *limb * 16 + carry;
            *limb = v % LIMB_BASE;
            carry = v / LIMB_BASE;
        }
        while carry > 0 {
            limbs.push(carry % LIMB_BASE);
            carry /= LIMB_BASE;
        }
    }

    let mut out = String::new();
    let mut iter = limbs.iter().rev();
    if let Some(top) = iter.next() {
        out.push_str(&top.to_string());
    }
    for limb in iter {
        out.push_str(&format!("{limb:09}"));
    }
    Some(out)
}
