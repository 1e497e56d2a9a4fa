//! AEAD record layer (spec.md §4.5): `"FSEC" | version:u8 | flags:u8 |
//! seq:u64be | cipher_len:u32be | ciphertext+tag`, AES-256-GCM with
//! `nonce = nonce_prefix(4) || seq(8)` and AAD equal to the 18-byte header.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use flowersec_util::beio;

use crate::error::{E2eeError, E2eeResult};
use crate::keys::HandshakeKeys;

const MAGIC: &[u8; 4] = b"FSEC";
const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 4 + 1 + 1 + 8 + 4;

/// Record control/content flag (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFlag {
    App = 0,
    Ping = 1,
    Rekey = 2,
}

impl RecordFlag {
    fn from_u8(v: u8) -> E2eeResult<Self> {
        match v {
            0 => Ok(RecordFlag::App),
            1 => Ok(RecordFlag::Ping),
            2 => Ok(RecordFlag::Rekey),
            _ => Err(E2eeError::MalformedFrame("unknown record flag")),
        }
    }
}

struct Half {
    cipher: Aes256Gcm,
    nonce_prefix: [u8; 4],
    seq: AtomicU64,
}

impl Half {
    fn new(key: [u8; 32], nonce_prefix: [u8; 4], initial_seq: u64) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
            nonce_prefix,
            seq: AtomicU64::new(initial_seq),
        }
    }

    fn nonce_bytes(&self, seq: u64) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&self.nonce_prefix);
        nonce[4..].copy_from_slice(&seq.to_be_bytes());
        nonce
    }
}

struct RecvBuffer {
    queue: VecDeque<Vec<u8>>,
    buffered_bytes: usize,
    max_buffered_bytes: usize,
}

/// One directional AEAD session atop a binary frame transport.
pub struct SecureChannel {
    send: Half,
    recv: Half,
    max_record_bytes: usize,
    recv_buffer: Mutex<RecvBuffer>,
}

fn build_header(flags: RecordFlag, seq: u64, cipher_len: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(MAGIC);
    header[4] = VERSION;
    header[5] = flags as u8;
    header[6..14].copy_from_slice(&seq.to_be_bytes());
    header[14..18].copy_from_slice(&cipher_len.to_be_bytes());
    header
}

impl SecureChannel {
    /// Construct as the handshake client: send=C2S (seq starts 1), recv=S2C (seq starts 2).
    pub fn new_client(keys: &HandshakeKeys, max_record_bytes: usize, max_buffered_bytes: usize) -> Self {
        Self::new(
            Half::new(keys.c2s_key, keys.c2s_nonce_prefix, 1),
            Half::new(keys.s2c_key, keys.s2c_nonce_prefix, 2),
            max_record_bytes,
            max_buffered_bytes,
        )
    }

    /// Construct as the handshake server: send=S2C, recv=C2S (seq starts 1).
    ///
    /// The send counter also starts at 1, not 2: the very next `encrypt()`
    /// call after construction is the server-finished `PING`, which spec.md
    /// §4.4 requires at S2C seq 1. Ordinary application traffic that follows
    /// it naturally lands at seq 2 onward.
    pub fn new_server(keys: &HandshakeKeys, max_record_bytes: usize, max_buffered_bytes: usize) -> Self {
        Self::new(
            Half::new(keys.s2c_key, keys.s2c_nonce_prefix, 1),
            Half::new(keys.c2s_key, keys.c2s_nonce_prefix, 1),
            max_record_bytes,
            max_buffered_bytes,
        )
    }

    fn new(send: Half, recv: Half, max_record_bytes: usize, max_buffered_bytes: usize) -> Self {
        Self {
            send,
            recv,
            max_record_bytes,
            recv_buffer: Mutex::new(RecvBuffer { queue: VecDeque::new(), buffered_bytes: 0, max_buffered_bytes }),
        }
    }

    /// Seal `plaintext` into the next outbound record, advancing the send
    /// sequence by exactly one (spec.md §4.5 invariants).
    pub fn encrypt(&self, flags: RecordFlag, plaintext: &[u8]) -> E2eeResult<Vec<u8>> {
        let seq = self.send.seq.fetch_add(1, Ordering::SeqCst);
        let nonce_bytes = self.send.nonce_bytes(seq);
        let header = build_header(flags, seq, 0); // cipher_len patched below
        let ciphertext = self
            .send
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), Payload { msg: plaintext, aad: &header })
            .map_err(|_| E2eeError::CryptoFailure)?;

        let header = build_header(flags, seq, ciphertext.len() as u32);
        let mut frame = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&ciphertext);
        if frame.len() > self.max_record_bytes {
            return Err(E2eeError::RecordTooLarge);
        }
        Ok(frame)
    }

    /// Send an empty `PING` record (liveness, and the server-finished
    /// confirmation at send-sequence 1).
    pub fn send_ping(&self) -> E2eeResult<Vec<u8>> {
        self.encrypt(RecordFlag::Ping, &[])
    }

    /// Open an inbound record. Strict sequence checking per spec.md §4.5:
    /// `seq` must equal the expected receive sequence exactly.
    pub fn decrypt(&self, frame: &[u8]) -> E2eeResult<(RecordFlag, u64, Vec<u8>)> {
        if frame.len() > self.max_record_bytes {
            return Err(E2eeError::RecordTooLarge);
        }
        if frame.len() < HEADER_LEN {
            return Err(E2eeError::MalformedFrame("frame shorter than header"));
        }
        if &frame[0..4] != MAGIC {
            return Err(E2eeError::MalformedFrame("bad magic"));
        }
        let version = beio::read_u8(frame, 4).ok_or(E2eeError::MalformedFrame("missing version"))?;
        if version != VERSION {
            return Err(E2eeError::InvalidVersion);
        }
        let flags = RecordFlag::from_u8(
            beio::read_u8(frame, 5).ok_or(E2eeError::MalformedFrame("missing flags"))?,
        )?;
        let seq = beio::read_u64_be(frame, 6).ok_or(E2eeError::MalformedFrame("missing seq"))?;
        let cipher_len =
            beio::read_u32_be(frame, 14).ok_or(E2eeError::MalformedFrame("missing cipher_len"))? as usize;
        if cipher_len != frame.len() - HEADER_LEN {
            return Err(E2eeError::BadCipherLen);
        }

        let expected = self.recv.seq.load(Ordering::SeqCst);
        if seq != expected {
            return Err(E2eeError::BadSeq { expected, got: seq });
        }

        let header = &frame[..HEADER_LEN];
        let ciphertext = &frame[HEADER_LEN..];
        let nonce_bytes = self.recv.nonce_bytes(seq);
        let plaintext = self
            .recv
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), Payload { msg: ciphertext, aad: header })
            .map_err(|_| E2eeError::CryptoFailure)?;

        self.recv.seq.fetch_add(1, Ordering::SeqCst);

        if flags == RecordFlag::Rekey {
            return Err(E2eeError::RekeyUnimplemented);
        }
        if flags == RecordFlag::App && !plaintext.is_empty() {
            self.buffer_plaintext(plaintext.clone())?;
        }
        Ok((flags, seq, plaintext))
    }

    fn buffer_plaintext(&self, data: Vec<u8>) -> E2eeResult<()> {
        let mut guard = self.recv_buffer.lock().unwrap_or_else(|e| e.into_inner());
        if guard.buffered_bytes + data.len() > guard.max_buffered_bytes {
            return Err(E2eeError::RecvBufferExceeded);
        }
        guard.buffered_bytes += data.len();
        guard.queue.push_back(data);
        Ok(())
    }

    /// Pop the oldest buffered application plaintext, if any.
    pub fn read_plain(&self) -> Option<Vec<u8>> {
        let mut guard = self.recv_buffer.lock().unwrap_or_else(|e| e.into_inner());
        let data = guard.queue.pop_front()?;
        guard.buffered_bytes -= data.len();
        Some(data)
    }

    pub fn buffered_bytes(&self) -> usize {
        self.recv_buffer.lock().unwrap_or_else(|e| e.into_inner()).buffered_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::derive_handshake_keys;

    fn test_keys() -> HandshakeKeys {
        derive_handshake_keys(&[1u8; 32], &[2u8; 32], &[3u8; 32]).unwrap()
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let keys = test_keys();
        let client = SecureChannel::new_client(&keys, 16 * 1024, 4 * 1024 * 1024);
        let server = SecureChannel::new_server(&keys, 16 * 1024, 4 * 1024 * 1024);

        let frame = client.encrypt(RecordFlag::App, b"hello server").unwrap();
        let (flags, seq, plaintext) = server.decrypt(&frame).unwrap();
        assert_eq!(flags, RecordFlag::App);
        assert_eq!(seq, 1);
        assert_eq!(plaintext, b"hello server");
        assert_eq!(server.read_plain().unwrap(), b"hello server");
    }

    #[test]
    fn server_finished_ping_is_seq_one_on_s2c() {
        let keys = test_keys();
        let server = SecureChannel::new_server(&keys, 16 * 1024, 4 * 1024 * 1024);
        let client = SecureChannel::new_client(&keys, 16 * 1024, 4 * 1024 * 1024);

        let ping = server.send_ping().unwrap();
        let (flags, seq, plaintext) = client.decrypt(&ping).unwrap();
        assert_eq!(flags, RecordFlag::Ping);
        assert_eq!(seq, 1);
        assert!(plaintext.is_empty());
    }

    #[test]
    fn sequence_must_match_exactly() {
        let keys = test_keys();
        let client = SecureChannel::new_client(&keys, 16 * 1024, 4 * 1024 * 1024);
        let server = SecureChannel::new_server(&keys, 16 * 1024, 4 * 1024 * 1024);

        let first = client.encrypt(RecordFlag::App, b"one").unwrap();
        let second = client.encrypt(RecordFlag::App, b"two").unwrap();
        // Deliver out of order: server expects seq 1 first.
        assert!(matches!(server.decrypt(&second), Err(E2eeError::BadSeq { expected: 1, got: 2 })));
        server.decrypt(&first).unwrap();
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let keys = test_keys();
        let client = SecureChannel::new_client(&keys, 16 * 1024, 4 * 1024 * 1024);
        let server = SecureChannel::new_server(&keys, 16 * 1024, 4 * 1024 * 1024);

        let mut frame = client.encrypt(RecordFlag::App, b"hello").unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(matches!(server.decrypt(&frame), Err(E2eeError::CryptoFailure)));
    }

    #[test]
    fn tampered_header_fails_aad_check() {
        let keys = test_keys();
        let client = SecureChannel::new_client(&keys, 16 * 1024, 4 * 1024 * 1024);
        let server = SecureChannel::new_server(&keys, 16 * 1024, 4 * 1024 * 1024);

        let mut frame = client.encrypt(RecordFlag::App, b"hello").unwrap();
        frame[5] = RecordFlag::Ping as u8; // flip the flags byte post-encrypt
        assert!(server.decrypt(&frame).is_err());
    }

    #[test]
    fn oversized_record_is_rejected() {
        let keys = test_keys();
        let client = SecureChannel::new_client(&keys, 32, 4 * 1024 * 1024);
        assert!(matches!(client.encrypt(RecordFlag::App, &[0u8; 64]), Err(E2eeError::RecordTooLarge)));
    }

    #[test]
    fn recv_buffer_cap_is_enforced() {
        let keys = test_keys();
        let client = SecureChannel::new_client(&keys, 16 * 1024, 8);
        let server = SecureChannel::new_server(&keys, 16 * 1024, 8);

        let frame = client.encrypt(RecordFlag::App, b"0123456789").unwrap();
        assert!(matches!(server.decrypt(&frame), Err(E2eeError::RecvBufferExceeded)));
    }

    #[test]
    fn rekey_flag_is_rejected_as_unimplemented() {
        let keys = test_keys();
        let client = SecureChannel::new_client(&keys, 16 * 1024, 4 * 1024 * 1024);
        let server = SecureChannel::new_server(&keys, 16 * 1024, 4 * 1024 * 1024);

        let frame = client.encrypt(RecordFlag::Rekey, &[]).unwrap();
        assert!(matches!(server.decrypt(&frame), Err(E2eeError::RekeyUnimplemented)));
    }
}
