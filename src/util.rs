//! Internal utilities.

/// Lowercase hex encoding of a byte slice.
pub(crate) fn hex_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        use std::fmt::Write;
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Round to two decimal places, the precision rates are reported at.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_lowercase() {
        assert_eq!(hex_encode(&[0x00, 0x1A, 0xFF]), "001aff");
        assert_eq!(hex_encode(&[]), "");
    }

    #[test]
    fn round_two_places() {
        assert_eq!(round2(3.14159), 3.14);
        assert_eq!(round2(1.0 / 3.0), 0.33);
        assert_eq!(round2(-2.346), -2.35);
        assert_eq!(round2(5.0), 5.0);
    }
}
