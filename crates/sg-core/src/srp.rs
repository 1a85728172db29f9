//! SRP-6a password-proof handshake math
//!
//! Zero-knowledge password proof over the RFC 5054 2048-bit group with
//! SHA-256 digests. The password never crosses the wire: the store holds a
//! verifier `v = g^x`, the client proves knowledge of `x`, and both sides
//! derive the same shared key `K` from the exchanged ephemerals.
//!
//! The server half drives live connections; the client half exists so the
//! handshake can be exercised end to end in tests and by outbound tooling.
//! Both halves accept an explicit ephemeral seed, which makes the derived
//! key a fixed, reproducible vector.

use std::sync::OnceLock;

use num_bigint::BigUint;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::AuthError;

/// Size of the group modulus in bytes (2048 bits)
pub const GROUP_BYTES: usize = 256;

/// Size of private ephemeral seeds in bytes
pub const EPHEMERAL_BYTES: usize = 32;

/// Size of the derived shared key in bytes
pub const KEY_BYTES: usize = 32;

// RFC 5054 Appendix A, 2048-bit group. Generator is 2.
const N_HEX: &str = "\
AC6BDB41324A9A9BF166DE5E1389582FAF72B6651987EE07FC3192943DB56050\
A37329CBB4A099ED8193E0757767A13DD52312AB4B03310DCD7F48A9DA04FD50\
E8083969EDB767B0CF6095179A163AB3661A05FBD5FAAAE82918A9962F0B93B8\
55F97993EC975EEAA80D740ADBF4FF747359D041D5C33EA71D281E446B14773B\
CA97B43A23FB801676BD207A436C6481F1D2B9078717461A5B9D32E688F87748\
544523B524B0D57D5EA77A2775D2ECFA032CFBDBF52FB3786160279004E57AE6\
AF874E7303CE53299CCC041C7BC308D82A5698F3A8D0C38271AE35F8E9DBFBB6\
94B5C803D89F7AE435DE236D525F54759B65E372FCD68EF20FA7111F9E4AFF73";

struct SrpGroup {
    n: BigUint,
    g: BigUint,
}

fn group() -> &'static SrpGroup {
    static GROUP: OnceLock<SrpGroup> = OnceLock::new();
    GROUP.get_or_init(|| SrpGroup {
        n: BigUint::parse_bytes(N_HEX.as_bytes(), 16).expect("group modulus constant"),
        g: BigUint::from(2u32),
    })
}

fn zero() -> BigUint {
    BigUint::from(0u32)
}

/// Left-pad a group element to the modulus width
fn pad(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    let mut out = vec![0u8; GROUP_BYTES - bytes.len().min(GROUP_BYTES)];
    out.extend_from_slice(&bytes[bytes.len().saturating_sub(GROUP_BYTES)..]);
    out
}

fn hash(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// k = H(N | PAD(g))
fn multiplier() -> BigUint {
    let grp = group();
    BigUint::from_bytes_be(&hash(&[&pad(&grp.n), &pad(&grp.g)]))
}

/// x = H(salt | H(username ":" password))
fn private_key(username: &str, password: &str, salt: &[u8]) -> BigUint {
    let identity = hash(&[username.as_bytes(), b":", password.as_bytes()]);
    BigUint::from_bytes_be(&hash(&[salt, &identity]))
}

/// u = H(PAD(A) | PAD(B))
fn scrambler(a_pub: &BigUint, b_pub: &BigUint) -> BigUint {
    BigUint::from_bytes_be(&hash(&[&pad(a_pub), &pad(b_pub)]))
}

/// M1 = H((H(N) xor H(PAD(g))) | H(username) | salt | PAD(A) | PAD(B) | K)
fn client_evidence(
    username: &str,
    salt: &[u8],
    a_pub: &BigUint,
    b_pub: &BigUint,
    key: &[u8],
) -> [u8; 32] {
    let grp = group();
    let hn = hash(&[&pad(&grp.n)]);
    let hg = hash(&[&pad(&grp.g)]);
    let mut hng = [0u8; 32];
    for (out, (a, b)) in hng.iter_mut().zip(hn.iter().zip(hg.iter())) {
        *out = a ^ b;
    }
    let hu = hash(&[username.as_bytes()]);
    hash(&[&hng, &hu, salt, &pad(a_pub), &pad(b_pub), key])
}

/// M2 = H(PAD(A) | M1 | K)
fn server_evidence(a_pub: &BigUint, m1: &[u8], key: &[u8]) -> [u8; 32] {
    hash(&[&pad(a_pub), m1, key])
}

fn random_seed() -> [u8; EPHEMERAL_BYTES] {
    let mut seed = [0u8; EPHEMERAL_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    seed
}

fn seed_to_scalar(seed: &[u8]) -> BigUint {
    // Hash the seed so short test seeds still give full-width scalars
    let digest = hash(&[seed]);
    let scalar = BigUint::from_bytes_be(&digest) % &group().n;
    if scalar == zero() {
        BigUint::from(1u32)
    } else {
        scalar
    }
}

/// Compute the verifier `PAD(g^x)` for storage in the credential file
pub fn compute_verifier(username: &str, password: &str, salt: &[u8]) -> Vec<u8> {
    let grp = group();
    let x = private_key(username, password, salt);
    pad(&grp.g.modpow(&x, &grp.n))
}

/// Outcome of a verified handshake
pub struct SessionProof {
    /// Shared key K, equal on both sides
    pub shared_key: [u8; KEY_BYTES],
    /// Server evidence M2 to return to the client
    pub evidence: Vec<u8>,
}

/// Server side of one handshake
pub struct ServerHandshake {
    username: String,
    salt: Vec<u8>,
    verifier: BigUint,
    b: BigUint,
    b_pub: BigUint,
}

impl ServerHandshake {
    /// Start a handshake with a random ephemeral
    pub fn new(username: &str, salt: &[u8], verifier: &[u8]) -> Self {
        Self::with_ephemeral(username, salt, verifier, &random_seed())
    }

    /// Start a handshake with an explicit ephemeral seed (reproducible)
    pub fn with_ephemeral(username: &str, salt: &[u8], verifier: &[u8], seed: &[u8]) -> Self {
        let grp = group();
        let v = BigUint::from_bytes_be(verifier);
        let b = seed_to_scalar(seed);
        // B = (k*v + g^b) mod N
        let b_pub = (multiplier() * &v + grp.g.modpow(&b, &grp.n)) % &grp.n;

        Self {
            username: username.to_string(),
            salt: salt.to_vec(),
            verifier: v,
            b,
            b_pub,
        }
    }

    /// Server public ephemeral B, padded to group width
    pub fn server_public(&self) -> Vec<u8> {
        pad(&self.b_pub)
    }

    /// Salt to send alongside the challenge
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// Verify the client's proof.
    ///
    /// On success returns the shared key and the server evidence M2.
    /// Rejects degenerate A values before doing any group math.
    pub fn verify(&self, client_public: &[u8], evidence: &[u8]) -> Result<SessionProof, AuthError> {
        let grp = group();
        let a_pub = BigUint::from_bytes_be(client_public);
        if &a_pub % &grp.n == zero() {
            return Err(AuthError::IllegalEphemeral);
        }

        let u = scrambler(&a_pub, &self.b_pub);
        if u == zero() {
            return Err(AuthError::IllegalEphemeral);
        }

        // S = (A * v^u)^b mod N
        let s = (&a_pub * self.verifier.modpow(&u, &grp.n)).modpow(&self.b, &grp.n);
        let key = hash(&[&pad(&s)]);

        let expected = client_evidence(&self.username, &self.salt, &a_pub, &self.b_pub, &key);
        if expected[..].ct_eq(evidence).unwrap_u8() != 1 {
            return Err(AuthError::BadProof);
        }

        Ok(SessionProof {
            shared_key: key,
            evidence: server_evidence(&a_pub, &expected, &key).to_vec(),
        })
    }
}

/// Client proof material produced by [`ClientHandshake::respond`]
pub struct ClientProof {
    /// Client public ephemeral A, padded to group width
    pub client_public: Vec<u8>,
    /// Client evidence M1
    pub evidence: Vec<u8>,
    /// Shared key K
    pub shared_key: [u8; KEY_BYTES],
    expected_server_evidence: [u8; 32],
}

impl ClientProof {
    /// Verify the server's evidence M2
    pub fn verify_server(&self, evidence: &[u8]) -> Result<(), AuthError> {
        if self.expected_server_evidence[..].ct_eq(evidence).unwrap_u8() != 1 {
            return Err(AuthError::BadProof);
        }
        Ok(())
    }
}

/// Client side of one handshake
pub struct ClientHandshake {
    username: String,
    password: String,
    a: BigUint,
    a_pub: BigUint,
}

impl ClientHandshake {
    /// Start a handshake with a random ephemeral
    pub fn new(username: &str, password: &str) -> Self {
        Self::with_ephemeral(username, password, &random_seed())
    }

    /// Start a handshake with an explicit ephemeral seed (reproducible)
    pub fn with_ephemeral(username: &str, password: &str, seed: &[u8]) -> Self {
        let grp = group();
        let a = seed_to_scalar(seed);
        let a_pub = grp.g.modpow(&a, &grp.n);

        Self {
            username: username.to_string(),
            password: password.to_string(),
            a,
            a_pub,
        }
    }

    /// Answer the server's challenge with a proof
    pub fn respond(&self, salt: &[u8], server_public: &[u8]) -> Result<ClientProof, AuthError> {
        let grp = group();
        let b_pub = BigUint::from_bytes_be(server_public);
        if &b_pub % &grp.n == zero() {
            return Err(AuthError::IllegalEphemeral);
        }

        let u = scrambler(&self.a_pub, &b_pub);
        if u == zero() {
            return Err(AuthError::IllegalEphemeral);
        }

        let x = private_key(&self.username, &self.password, salt);
        // S = (B - k*g^x)^(a + u*x) mod N, with the subtraction kept in-group
        let kgx = (multiplier() * grp.g.modpow(&x, &grp.n)) % &grp.n;
        let base = (&b_pub + &grp.n - kgx) % &grp.n;
        let exponent = &self.a + u * x;
        let s = base.modpow(&exponent, &grp.n);
        let key = hash(&[&pad(&s)]);

        let m1 = client_evidence(&self.username, salt, &self.a_pub, &b_pub, &key);
        let m2 = server_evidence(&self.a_pub, &m1, &key);

        Ok(ClientProof {
            client_public: pad(&self.a_pub),
            evidence: m1.to_vec(),
            shared_key: key,
            expected_server_evidence: m2,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &[u8] = &[7u8; 16];

    fn run_handshake(
        username: &str,
        stored_password: &str,
        typed_password: &str,
    ) -> Result<(SessionProof, ClientProof), AuthError> {
        let verifier = compute_verifier(username, stored_password, SALT);
        let server = ServerHandshake::new(username, SALT, &verifier);
        let client = ClientHandshake::new(username, typed_password);

        let proof = client.respond(SALT, &server.server_public())?;
        let session = server.verify(&proof.client_public, &proof.evidence)?;
        Ok((session, proof))
    }

    #[test]
    fn test_valid_password_completes() {
        let (session, proof) = run_handshake("alice", "hunter2", "hunter2").unwrap();
        assert_eq!(session.shared_key, proof.shared_key);
        proof.verify_server(&session.evidence).unwrap();
    }

    #[test]
    fn test_wrong_password_rejected() {
        let result = run_handshake("alice", "hunter2", "hunter3");
        assert!(matches!(result, Err(AuthError::BadProof)));
    }

    #[test]
    fn test_fixed_ephemerals_reproduce_key() {
        let verifier = compute_verifier("bob", "secret", SALT);

        let derive = || {
            let server = ServerHandshake::with_ephemeral("bob", SALT, &verifier, &[1u8; 32]);
            let client = ClientHandshake::with_ephemeral("bob", "secret", &[2u8; 32]);
            let proof = client.respond(SALT, &server.server_public()).unwrap();
            let session = server.verify(&proof.client_public, &proof.evidence).unwrap();
            session.shared_key
        };

        assert_eq!(derive(), derive());
    }

    #[test]
    fn test_different_ephemerals_change_key() {
        let verifier = compute_verifier("bob", "secret", SALT);

        let server1 = ServerHandshake::with_ephemeral("bob", SALT, &verifier, &[1u8; 32]);
        let client1 = ClientHandshake::with_ephemeral("bob", "secret", &[2u8; 32]);
        let proof1 = client1.respond(SALT, &server1.server_public()).unwrap();
        let key1 = server1
            .verify(&proof1.client_public, &proof1.evidence)
            .unwrap()
            .shared_key;

        let server2 = ServerHandshake::with_ephemeral("bob", SALT, &verifier, &[3u8; 32]);
        let client2 = ClientHandshake::with_ephemeral("bob", "secret", &[4u8; 32]);
        let proof2 = client2.respond(SALT, &server2.server_public()).unwrap();
        let key2 = server2
            .verify(&proof2.client_public, &proof2.evidence)
            .unwrap()
            .shared_key;

        assert_ne!(key1, key2);
    }

    #[test]
    fn test_zero_client_ephemeral_rejected() {
        let verifier = compute_verifier("alice", "hunter2", SALT);
        let server = ServerHandshake::new("alice", SALT, &verifier);

        let result = server.verify(&[0u8; GROUP_BYTES], &[0u8; 32]);
        assert!(matches!(result, Err(AuthError::IllegalEphemeral)));
    }

    #[test]
    fn test_verifier_is_group_width() {
        let verifier = compute_verifier("alice", "hunter2", SALT);
        assert_eq!(verifier.len(), GROUP_BYTES);
    }
}
