//! Constant-time comparison for secrets and policy fields that must not leak
//! timing information (PSKs, auth tags, audience/issuer strings).

use subtle::ConstantTimeEq;

/// Constant-time byte-slice equality. Unequal lengths short-circuit (length
/// itself is not considered sensitive here) but return `false` without
/// comparing contents.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Constant-time string equality, for `aud`/`iss` checks (spec.md §4.1).
pub fn ct_eq_str(a: &str, b: &str) -> bool {
    ct_eq(a.as_bytes(), b.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_slices_match() {
        assert!(ct_eq(b"flowersec", b"flowersec"));
    }

    #[test]
    fn differing_slices_do_not_match() {
        assert!(!ct_eq(b"flowersec", b"flowersek"));
    }

    #[test]
    fn differing_lengths_do_not_match() {
        assert!(!ct_eq(b"short", b"shorter"));
    }

    #[test]
    fn str_helper_matches_bytes_helper() {
        assert!(ct_eq_str("aud-1", "aud-1"));
        assert!(!ct_eq_str("aud-1", "aud-2"));
    }
}
