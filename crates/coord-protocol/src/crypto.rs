/// Default [`Crypto`] provider.
///
/// Identities are Ed25519 seeds; encryption is ephemeral X25519
/// Diffie-Hellman + XChaCha20-Poly1305 against the recipient's Ed25519 key
/// converted to Montgomery form. Every message gets a fresh ephemeral key.
///
/// Sealed layout: `ephemeral_pk (32) || nonce (24) || ciphertext+tag`.
use chacha20poly1305::{
    aead::{
        rand_core::{OsRng, RngCore},
        Aead, KeyInit,
    },
    XChaCha20Poly1305, XNonce,
};
use curve25519_dalek::edwards::CompressedEdwardsY;
use hkdf::Hkdf;
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519Secret};

use crate::error::CoordError;
use crate::transport::{Crypto, Identity};

const HKDF_INFO: &[u8] = b"coord-protocol-sealed-box-v1";

const EPHEMERAL_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// Bytes added to every plaintext by [`SealedBoxCrypto::encrypt`].
pub const SEAL_OVERHEAD: usize = EPHEMERAL_LEN + NONCE_LEN + TAG_LEN;

#[derive(Debug, Clone, Copy, Default)]
pub struct SealedBoxCrypto;

impl SealedBoxCrypto {
    pub fn new() -> Self {
        Self
    }

    /// Identity from a known seed. Deterministic; used by tests and tooling.
    pub fn identity_from_seed(seed: [u8; 32]) -> Identity {
        let public = ed25519_dalek::SigningKey::from_bytes(&seed)
            .verifying_key()
            .to_bytes();
        let digest = Sha256::digest(public);
        Identity {
            dial_id: hex::encode(&digest[..20]),
            public_key: hex::encode(public),
            secret: seed,
        }
    }
}

impl Crypto for SealedBoxCrypto {
    fn generate_identity(&self) -> Result<Identity, CoordError> {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Ok(Self::identity_from_seed(seed))
    }

    fn encrypt(&self, public_key: &str, plaintext: &[u8]) -> Result<Vec<u8>, CoordError> {
        let pk = decode_public_key(public_key)?;
        let recipient = X25519PublicKey::from(ed25519_to_x25519_public(&pk)?);

        let ephemeral_secret = X25519Secret::random_from_rng(OsRng);
        let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);
        let shared = ephemeral_secret.diffie_hellman(&recipient);
        let cipher = XChaCha20Poly1305::new(&derive_key(shared.as_bytes())?.into());

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(&XNonce::from(nonce_bytes), plaintext)
            .map_err(|e| CoordError::Crypto(format!("encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(EPHEMERAL_LEN + NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(ephemeral_public.as_bytes());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, secret: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>, CoordError> {
        if sealed.len() < SEAL_OVERHEAD {
            return Err(CoordError::Crypto("sealed payload too short".into()));
        }
        let (ephemeral, rest) = sealed.split_at(EPHEMERAL_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let mut ephemeral_pk = [0u8; EPHEMERAL_LEN];
        ephemeral_pk.copy_from_slice(ephemeral);

        let x_secret = X25519Secret::from(ed25519_to_x25519_secret(secret));
        let shared = x_secret.diffie_hellman(&X25519PublicKey::from(ephemeral_pk));
        let cipher = XChaCha20Poly1305::new(&derive_key(shared.as_bytes())?.into());

        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CoordError::Crypto("decryption failed: authentication error".into()))
    }
}

fn decode_public_key(public_key: &str) -> Result<[u8; 32], CoordError> {
    let bytes = hex::decode(public_key)
        .map_err(|e| CoordError::Crypto(format!("public key is not hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| CoordError::Crypto("public key must be 32 bytes".into()))
}

/// Edwards → Montgomery, as libsodium's `crypto_sign_ed25519_pk_to_curve25519`.
pub fn ed25519_to_x25519_public(ed25519_pk: &[u8; 32]) -> Result<[u8; 32], CoordError> {
    let edwards = CompressedEdwardsY(*ed25519_pk)
        .decompress()
        .ok_or_else(|| CoordError::Crypto("invalid Ed25519 public key".into()))?;
    Ok(edwards.to_montgomery().to_bytes())
}

/// SHA-512(seed)[..32], clamped.
pub fn ed25519_to_x25519_secret(seed: &[u8; 32]) -> [u8; 32] {
    let hash = Sha512::digest(seed);
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&hash[..32]);
    secret[0] &= 248;
    secret[31] &= 127;
    secret[31] |= 64;
    secret
}

fn derive_key(shared_secret: &[u8; 32]) -> Result<[u8; 32], CoordError> {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = [0u8; 32];
    hkdf.expand(HKDF_INFO, &mut key)
        .map_err(|e| CoordError::Crypto(format!("key derivation failed: {e}")))?;
    Ok(key)
}
