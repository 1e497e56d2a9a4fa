//! URL-safe, unpadded base64 — the encoding every Flowersec wire format uses
//! for embedding binary blobs (keys, nonces, tokens, PSKs) inside JSON.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Encode `bytes` as URL-safe base64 with no padding.
pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode a URL-safe, unpadded base64 string.
pub fn decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let data = b"flowersec";
        let encoded = encode(data);
        assert!(!encoded.contains('='));
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn rejects_standard_padding_alphabet() {
        assert!(decode("not base64!!").is_err());
    }
}
