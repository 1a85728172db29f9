//! Handshake negotiator
//!
//! Drives one connection's password-proof handshake. Unknown usernames get
//! a synthesized verifier from the store, so they walk the same states and
//! produce the same message shapes as a known user with a wrong password;
//! the proof simply never verifies.

use sg_core::srp::ServerHandshake;
use sg_core::users::{UserGroup, UserStore};
use sg_core::AuthError;
use sg_protocol::Message;

/// Result of a completed handshake
pub struct AuthSuccess {
    /// Authenticated account name
    pub username: String,
    /// The account's access group
    pub group: UserGroup,
    /// Shared key for traffic key derivation
    pub shared_key: [u8; 32],
    /// Server evidence (M2) to send as `Confirm`
    pub evidence: Vec<u8>,
}

/// What the caller should do after feeding one message in
pub enum AuthOutcome {
    /// Send this reply and keep reading
    Continue(Message),
    /// Handshake complete; send `Confirm` with the evidence and promote
    /// the connection
    Success(AuthSuccess),
    /// Handshake failed; close the connection
    Failure(AuthError),
}

enum State {
    AwaitHello,
    AwaitProof {
        username: String,
        group: Option<UserGroup>,
        handshake: ServerHandshake,
    },
    Done,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::AwaitHello => "await-hello",
            State::AwaitProof { .. } => "await-proof",
            State::Done => "done",
        }
    }
}

/// Per-connection handshake state machine
pub struct Negotiator<'a> {
    users: &'a UserStore,
    state: State,
    attempts: u32,
    max_attempts: u32,
}

impl<'a> Negotiator<'a> {
    /// Begin a handshake against the given credential store
    pub fn new(users: &'a UserStore, max_attempts: u32) -> Self {
        Self {
            users,
            state: State::AwaitHello,
            attempts: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Feed one message in; the connection acts on the outcome.
    ///
    /// Out-of-order or malformed messages fail the handshake outright;
    /// a bad proof consumes an attempt and, while attempts remain, resets
    /// to the `Hello` state.
    pub fn process(&mut self, message: Message) -> AuthOutcome {
        match (std::mem::replace(&mut self.state, State::Done), message) {
            (State::AwaitHello, Message::Hello { username }) => {
                let credential = self.users.lookup(&username);
                let handshake =
                    ServerHandshake::new(&username, &credential.salt, &credential.verifier);
                let challenge = Message::Challenge {
                    salt: credential.salt,
                    server_public: handshake.server_public(),
                };
                self.state = State::AwaitProof {
                    username,
                    group: credential.group,
                    handshake,
                };
                AuthOutcome::Continue(challenge)
            }

            (
                State::AwaitProof {
                    username,
                    group,
                    handshake,
                },
                Message::Proof {
                    client_public,
                    evidence,
                },
            ) => match (handshake.verify(&client_public, &evidence), group) {
                (Ok(proof), Some(group)) => {
                    tracing::info!("User {} authenticated", username);
                    AuthOutcome::Success(AuthSuccess {
                        username,
                        group,
                        shared_key: proof.shared_key,
                        evidence: proof.evidence,
                    })
                }
                // A synthesized verifier can never verify, but refuse even
                // if it somehow did: the account does not exist.
                (Ok(_), None) | (Err(AuthError::BadProof), _) => self.reject(&username),
                (Err(e), _) => AuthOutcome::Failure(e),
            },

            (state, _) => AuthOutcome::Failure(AuthError::MalformedHandshake {
                state: state.name(),
            }),
        }
    }

    fn reject(&mut self, username: &str) -> AuthOutcome {
        self.attempts += 1;
        tracing::warn!(
            "Proof verification failed for {} (attempt {}/{})",
            username,
            self.attempts,
            self.max_attempts
        );
        if self.attempts >= self.max_attempts {
            AuthOutcome::Failure(AuthError::AttemptsExceeded)
        } else {
            self.state = State::AwaitHello;
            AuthOutcome::Continue(Message::Denied {
                attempts_left: self.max_attempts - self.attempts,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_core::srp::ClientHandshake;

    fn store_with(username: &str, password: &str) -> UserStore {
        let mut store = UserStore::new();
        store.insert(username, password, UserGroup::User);
        store
    }

    /// Drive a complete handshake from the client side; returns the
    /// outcome of the proof step and the client's derived key.
    fn drive(
        negotiator: &mut Negotiator<'_>,
        username: &str,
        password: &str,
    ) -> (AuthOutcome, Option<[u8; 32]>) {
        let challenge = negotiator.process(Message::Hello {
            username: username.to_string(),
        });
        let (salt, server_public) = match challenge {
            AuthOutcome::Continue(Message::Challenge {
                salt,
                server_public,
            }) => (salt, server_public),
            _ => panic!("expected challenge"),
        };

        let client = ClientHandshake::new(username, password);
        let proof = client.respond(&salt, &server_public).unwrap();
        let key = proof.shared_key;

        let outcome = negotiator.process(Message::Proof {
            client_public: proof.client_public,
            evidence: proof.evidence,
        });
        (outcome, Some(key))
    }

    #[test]
    fn test_valid_credentials_succeed() {
        let store = store_with("alice", "hunter2");
        let mut negotiator = Negotiator::new(&store, 3);

        let (outcome, client_key) = drive(&mut negotiator, "alice", "hunter2");
        match outcome {
            AuthOutcome::Success(success) => {
                assert_eq!(success.username, "alice");
                assert_eq!(success.group, UserGroup::User);
                assert_eq!(Some(success.shared_key), client_key);
            }
            _ => panic!("expected success"),
        }
    }

    #[test]
    fn test_wrong_password_consumes_attempt() {
        let store = store_with("alice", "hunter2");
        let mut negotiator = Negotiator::new(&store, 3);

        let (outcome, _) = drive(&mut negotiator, "alice", "wrong");
        assert!(matches!(
            outcome,
            AuthOutcome::Continue(Message::Denied { attempts_left: 2 })
        ));

        // Retry succeeds within the ceiling
        let (outcome, _) = drive(&mut negotiator, "alice", "hunter2");
        assert!(matches!(outcome, AuthOutcome::Success(_)));
    }

    #[test]
    fn test_attempt_ceiling_closes() {
        let store = store_with("alice", "hunter2");
        let mut negotiator = Negotiator::new(&store, 2);

        let (outcome, _) = drive(&mut negotiator, "alice", "wrong");
        assert!(matches!(outcome, AuthOutcome::Continue(_)));
        let (outcome, _) = drive(&mut negotiator, "alice", "wrong");
        assert!(matches!(
            outcome,
            AuthOutcome::Failure(AuthError::AttemptsExceeded)
        ));
    }

    #[test]
    fn test_unknown_user_shape_matches_wrong_password() {
        let store = store_with("alice", "hunter2");

        let mut negotiator = Negotiator::new(&store, 3);
        let (known_wrong, _) = drive(&mut negotiator, "alice", "wrong");

        let mut negotiator = Negotiator::new(&store, 3);
        let (unknown, _) = drive(&mut negotiator, "mallory", "whatever");

        // Identical message shape: both reach the proof stage and are
        // denied there with the same attempts_left
        match (known_wrong, unknown) {
            (
                AuthOutcome::Continue(Message::Denied { attempts_left: a }),
                AuthOutcome::Continue(Message::Denied { attempts_left: b }),
            ) => assert_eq!(a, b),
            _ => panic!("expected both denied at the proof stage"),
        }
    }

    #[test]
    fn test_unknown_user_challenge_is_well_formed() {
        let store = store_with("alice", "hunter2");
        let mut negotiator = Negotiator::new(&store, 3);

        let outcome = negotiator.process(Message::Hello {
            username: "mallory".to_string(),
        });
        match outcome {
            AuthOutcome::Continue(Message::Challenge {
                salt,
                server_public,
            }) => {
                assert_eq!(salt.len(), sg_core::users::SALT_BYTES);
                assert_eq!(server_public.len(), sg_core::srp::GROUP_BYTES);
            }
            _ => panic!("expected challenge"),
        }
    }

    #[test]
    fn test_out_of_order_message_fails() {
        let store = store_with("alice", "hunter2");
        let mut negotiator = Negotiator::new(&store, 3);

        let outcome = negotiator.process(Message::Proof {
            client_public: vec![1; 256],
            evidence: vec![2; 32],
        });
        assert!(matches!(
            outcome,
            AuthOutcome::Failure(AuthError::MalformedHandshake {
                state: "await-hello"
            })
        ));
    }
}
