//! Transcript hash binding every negotiated parameter into the Ack's auth
//! tag (spec.md §4.4 step 5).

use sha2::{Digest, Sha256};

use flowersec_util::beio;

const TRANSCRIPT_LABEL: &[u8] = b"flowersec-e2ee-v1";
const VERSION: u8 = 1;
const ROLE_CLIENT: u8 = 1;

#[allow(clippy::too_many_arguments)]
pub fn compute_transcript(
    suite_wire: u16,
    client_features: u32,
    server_features: u32,
    channel_id: &str,
    nonce_c: &[u8; 32],
    nonce_s: &[u8; 32],
    client_pub: &[u8],
    server_pub: &[u8],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(TRANSCRIPT_LABEL);
    hasher.update([VERSION]);

    let mut suite_buf = Vec::new();
    beio::put_u16_be(&mut suite_buf, suite_wire);
    hasher.update(&suite_buf);

    hasher.update([ROLE_CLIENT]);

    let mut features_buf = Vec::new();
    beio::put_u32_be(&mut features_buf, client_features);
    beio::put_u32_be(&mut features_buf, server_features);
    hasher.update(&features_buf);

    let mut len_buf = Vec::new();
    beio::put_u16_be(&mut len_buf, channel_id.len() as u16);
    hasher.update(&len_buf);
    hasher.update(channel_id.as_bytes());

    hasher.update(nonce_c);
    hasher.update(nonce_s);

    let mut client_len = Vec::new();
    beio::put_u16_be(&mut client_len, client_pub.len() as u16);
    hasher.update(&client_len);
    hasher.update(client_pub);

    let mut server_len = Vec::new();
    beio::put_u16_be(&mut server_len, server_pub.len() as u16);
    hasher.update(&server_len);
    hasher.update(server_pub);

    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_inputs() {
        let a = compute_transcript(1, 0, 0, "chan_1", &[1u8; 32], &[2u8; 32], &[3u8; 32], &[4u8; 65]);
        let b = compute_transcript(1, 0, 0, "chan_1", &[1u8; 32], &[2u8; 32], &[3u8; 32], &[4u8; 65]);
        assert_eq!(a, b);
    }

    #[test]
    fn differs_when_any_field_changes() {
        let base = compute_transcript(1, 0, 0, "chan_1", &[1u8; 32], &[2u8; 32], &[3u8; 32], &[4u8; 65]);
        let different_channel =
            compute_transcript(1, 0, 0, "chan_2", &[1u8; 32], &[2u8; 32], &[3u8; 32], &[4u8; 65]);
        assert_ne!(base, different_channel);

        let different_features =
            compute_transcript(1, 7, 0, "chan_1", &[1u8; 32], &[2u8; 32], &[3u8; 32], &[4u8; 65]);
        assert_ne!(base, different_features);
    }
}
