/// Compares an entered cancellation code against the two stored codes.
///
/// A non-matching entry is not an error: the caller falls through to the
/// normal cancel path. Comparison time does not depend on where the codes
/// first differ.
#[derive(Clone, Debug, Default)]
pub struct DuressDetector {
    cancel_code: String,
    duress_code: String,
}

impl DuressDetector {
    pub fn new(cancel_code: impl Into<String>, duress_code: impl Into<String>) -> Self {
        Self {
            cancel_code: cancel_code.into(),
            duress_code: duress_code.into(),
        }
    }

    /// True iff a duress code is configured and the entry matches it exactly.
    pub fn check_duress(&self, entered: &str) -> bool {
        if self.duress_code.is_empty() {
            return false;
        }
        constant_time_eq(entered.as_bytes(), self.duress_code.as_bytes())
    }

    /// True iff the entry matches the configured safe-cancel code.
    pub fn check_cancel(&self, entered: &str) -> bool {
        if self.cancel_code.is_empty() {
            return false;
        }
        constant_time_eq(entered.as_bytes(), self.cancel_code.as_bytes())
    }
}

/// Byte-XOR fold over the longer of the two inputs; never early-exits on a
/// mismatched byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len = a.len().max(b.len());
    let mut diff = (a.len() ^ b.len()) as u8;
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_duress_code_never_matches() {
        let detector = DuressDetector::new("1234", "");
        assert!(!detector.check_duress(""));
        assert!(!detector.check_duress("1234"));
    }

    #[test]
    fn test_duress_exact_match_only() {
        let detector = DuressDetector::new("1234", "9999");
        assert!(detector.check_duress("9999"));
        assert!(!detector.check_duress("999"));
        assert!(!detector.check_duress("99999"));
        // The safe-cancel code is not duress.
        assert!(!detector.check_duress("1234"));
    }

    #[test]
    fn test_cancel_code() {
        let detector = DuressDetector::new("1234", "9999");
        assert!(detector.check_cancel("1234"));
        assert!(!detector.check_cancel("9999"));
        // Anything else falls through to normal cancel handling upstream.
        assert!(!detector.check_cancel("0000"));
    }

    #[test]
    fn test_constant_time_eq_lengths() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
        assert!(constant_time_eq(b"", b""));
    }
}
