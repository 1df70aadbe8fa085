use std::sync::Arc;

use rand::Rng;

use crate::{Ciphertext, CipherError, CiphertextKind, DeviceAddress, EncryptedEnvelope, KeyBundle};

/// The session cipher engine and its session/sender-key stores. Implemented outside
/// this crate; every call is expected to be safe from multiple threads as long
/// as calls for the same device are not interleaved.
pub trait CipherEngine: Send + Sync {
    fn contains_session(&self, address: &DeviceAddress) -> Result<bool, CipherError>;

    /// Establish a pairwise session from a fetched key bundle.
    fn process_bundle(&self, address: &DeviceAddress, bundle: &KeyBundle)
        -> Result<(), CipherError>;

    fn encrypt(&self, address: &DeviceAddress, padded: &[u8]) -> Result<Ciphertext, CipherError>;

    /// Create (or reuse) our sender key for the group and return the
    /// serialized distribution message.
    fn create_sender_key_distribution(
        &self,
        group: &DeviceAddress,
        sender: &DeviceAddress,
    ) -> Result<Vec<u8>, CipherError>;

    fn encrypt_group(
        &self,
        group: &DeviceAddress,
        sender: &DeviceAddress,
        padded: &[u8],
    ) -> Result<Vec<u8>, CipherError>;
}

/// Wraps a [`CipherEngine`] with the send-side contract: padding, the
/// no-session signal, and group sender-key handling.
#[derive(Clone)]
pub struct CipherAdapter {
    engine: Arc<dyn CipherEngine>,
}

impl CipherAdapter {
    pub fn new(engine: Arc<dyn CipherEngine>) -> Self {
        Self { engine }
    }

    pub fn has_session(&self, destination: &DeviceAddress) -> Result<bool, CipherError> {
        self.engine.contains_session(destination)
    }

    /// Encrypt on an existing session. Fails with [`CipherError::NoSession`]
    /// when there is none.
    pub fn encrypt_pairwise(
        &self,
        destination: &DeviceAddress,
        plaintext: &[u8],
    ) -> Result<EncryptedEnvelope, CipherError> {
        if !self.engine.contains_session(destination)? {
            return Err(CipherError::NoSession);
        }
        let ciphertext = self.engine.encrypt(destination, &pad_message(plaintext))?;
        Ok(EncryptedEnvelope {
            destination: destination.clone(),
            used_bundle: ciphertext.kind == CiphertextKind::PreKey,
            kind: ciphertext.kind,
            ciphertext: ciphertext.bytes,
        })
    }

    pub fn establish_from_bundle(
        &self,
        destination: &DeviceAddress,
        bundle: &KeyBundle,
    ) -> Result<(), CipherError> {
        tracing::debug!(device = %destination, "Processing key bundle");
        self.engine.process_bundle(destination, bundle)
    }

    pub fn create_group_session(
        &self,
        group: &DeviceAddress,
        sender: &DeviceAddress,
    ) -> Result<Vec<u8>, CipherError> {
        self.engine.create_sender_key_distribution(group, sender)
    }

    pub fn encrypt_group(
        &self,
        group: &DeviceAddress,
        sender: &DeviceAddress,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        self.engine
            .encrypt_group(group, sender, &pad_message(plaintext))
    }
}

/// Append 1 to 15 bytes, each holding the pad length.
pub fn pad_message(plaintext: &[u8]) -> Vec<u8> {
    let mut pad: u8 = rand::thread_rng().gen_range(0..16);
    if pad == 0 {
        pad = 0x0f;
    }
    let mut padded = Vec::with_capacity(plaintext.len() + pad as usize);
    padded.extend_from_slice(plaintext);
    padded.resize(plaintext.len() + pad as usize, pad);
    padded
}
