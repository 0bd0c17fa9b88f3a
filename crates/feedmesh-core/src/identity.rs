//! Feed keypairs using Ed25519

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::{FeedId, FeedKey, PrivateKey};

/// Keypair owning a feed: the verifying key is the feed key
#[derive(Clone)]
pub struct FeedIdentity {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl FeedIdentity {
    /// Generate a new random feed identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();

        FeedIdentity {
            signing_key,
            verifying_key,
        }
    }

    /// Create identity from existing signing key bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        let verifying_key = signing_key.verifying_key();

        FeedIdentity {
            signing_key,
            verifying_key,
        }
    }

    pub fn feed_key(&self) -> FeedKey {
        FeedKey::from_bytes(self.verifying_key.to_bytes())
    }

    pub fn feed_id(&self) -> FeedId {
        self.feed_key().feed_id()
    }

    /// Secret half, for handing to the transport handshake
    pub fn private_key(&self) -> PrivateKey {
        PrivateKey::from_bytes(self.signing_key.to_bytes())
    }
}

impl std::fmt::Debug for FeedIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedIdentity")
            .field("feed", &self.feed_id())
            .finish_non_exhaustive()
    }
}
