//! Traffic key derivation and frame sealing
//!
//! The SRP shared key is expanded into independent AES-256-CTR and
//! HMAC-SHA256 keys per direction. Post-handshake frame payloads are
//! sealed encrypt-then-MAC; the nonce is an implicit 64-bit per-direction
//! counter, which TCP's ordering guarantees keep in sync. Counter reuse is
//! impossible within a connection and keys never outlive one.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::SecureError;

type Aes256Ctr = Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Size of the authentication tag appended to each sealed frame
pub const TAG_BYTES: usize = 32;

/// Which end of the connection this crypto state belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The host: seals host-to-client, opens client-to-host
    Host,
    /// The remote client: seals client-to-host, opens host-to-client
    Client,
}

#[derive(Clone)]
struct DirectionKeys {
    enc: [u8; 32],
    mac: [u8; 32],
}

fn expand(shared_key: &[u8], label: &[u8]) -> [u8; 32] {
    let mut prf =
        HmacSha256::new_from_slice(shared_key).expect("HMAC accepts any key length");
    prf.update(label);
    prf.finalize().into_bytes().into()
}

fn direction_keys(shared_key: &[u8], direction: &str) -> DirectionKeys {
    DirectionKeys {
        enc: expand(shared_key, format!("sg-traffic {} enc", direction).as_bytes()),
        mac: expand(shared_key, format!("sg-traffic {} mac", direction).as_bytes()),
    }
}

struct SealState {
    keys: DirectionKeys,
    counter: u64,
}

impl SealState {
    fn iv(&self) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[8..].copy_from_slice(&self.counter.to_be_bytes());
        iv
    }

    fn seal(&mut self, plaintext: &[u8]) -> Vec<u8> {
        let mut out = plaintext.to_vec();
        Aes256Ctr::new(&self.keys.enc.into(), &self.iv().into()).apply_keystream(&mut out);

        let mut mac =
            HmacSha256::new_from_slice(&self.keys.mac).expect("HMAC accepts any key length");
        mac.update(&self.counter.to_be_bytes());
        mac.update(&out);
        out.extend_from_slice(&mac.finalize().into_bytes());

        self.counter += 1;
        out
    }

    fn open(&mut self, sealed: &[u8]) -> Result<Vec<u8>, SecureError> {
        if sealed.len() < TAG_BYTES {
            return Err(SecureError::TooShort);
        }
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_BYTES);

        let mut mac =
            HmacSha256::new_from_slice(&self.keys.mac).expect("HMAC accepts any key length");
        mac.update(&self.counter.to_be_bytes());
        mac.update(ciphertext);
        mac.verify_slice(tag).map_err(|_| SecureError::BadTag)?;

        let mut out = ciphertext.to_vec();
        Aes256Ctr::new(&self.keys.enc.into(), &self.iv().into()).apply_keystream(&mut out);

        self.counter += 1;
        Ok(out)
    }
}

/// Per-connection traffic crypto for one side
pub struct TrafficCrypto {
    seal: SealState,
    open: SealState,
}

impl TrafficCrypto {
    /// Derive traffic state for one side from the SRP shared key
    pub fn derive(shared_key: &[u8], side: Side) -> Self {
        let to_client = direction_keys(shared_key, "host-to-client");
        let to_host = direction_keys(shared_key, "client-to-host");

        let (seal_keys, open_keys) = match side {
            Side::Host => (to_client, to_host),
            Side::Client => (to_host, to_client),
        };

        Self {
            seal: SealState {
                keys: seal_keys,
                counter: 0,
            },
            open: SealState {
                keys: open_keys,
                counter: 0,
            },
        }
    }

    /// Seal an outbound payload
    pub fn seal(&mut self, plaintext: &[u8]) -> Vec<u8> {
        self.seal.seal(plaintext)
    }

    /// Open an inbound payload
    pub fn open(&mut self, sealed: &[u8]) -> Result<Vec<u8>, SecureError> {
        self.open.open(sealed)
    }
}
