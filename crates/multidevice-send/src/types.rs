use serde::{Deserialize, Serialize};

use crate::DeviceAddress;

pub const MESSAGE_TAG: &str = "message";
pub const PARTICIPANTS_TAG: &str = "participants";
pub const DEVICE_IDENTITY_TAG: &str = "device-identity";
pub const ENC_TAG: &str = "enc";

pub const ENC_TYPE_PREKEY: &str = "pkmsg";
pub const ENC_TYPE_MESSAGE: &str = "msg";
pub const ENC_TYPE_SENDER_KEY: &str = "skmsg";

pub const GROUP_NAMESPACE: &str = "w:g2";
pub const USYNC_NAMESPACE: &str = "usync";
pub const ENCRYPT_NAMESPACE: &str = "encrypt";

/// Version tag prefixed to participant hashes.
pub const PARTICIPANT_HASH_VERSION: &str = "2";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub address: DeviceAddress,
    pub is_admin: bool,
}

/// Group metadata as returned by the group info query. Rebuilt on every
/// group send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub group_id: String,
    pub owner: Option<DeviceAddress>,

    pub name: String,
    pub name_set_by: Option<DeviceAddress>,
    pub name_set_at: i64,
    pub created_at: i64,

    pub topic: String,
    pub topic_id: String,
    pub topic_set_by: Option<DeviceAddress>,
    pub topic_set_at: i64,

    pub announce_only: bool,
    pub locked: bool,

    pub participants: Vec<Participant>,
}

/// Material needed to establish a first-contact session with one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBundle {
    pub registration_id: u32,
    pub identity_key: [u8; 32],
    pub signed_pre_key: SignedPreKey,
    pub pre_key: Option<PreKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKey {
    pub id: u32,
    pub public_key: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPreKey {
    pub id: u32,
    pub public_key: [u8; 32],
    pub signature: [u8; 64],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiphertextKind {
    /// First-contact message carrying session establishment material.
    PreKey,
    /// Message on an established session.
    Whisper,
}

impl CiphertextKind {
    pub fn enc_type(self) -> &'static str {
        match self {
            CiphertextKind::PreKey => ENC_TYPE_PREKEY,
            CiphertextKind::Whisper => ENC_TYPE_MESSAGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext {
    pub kind: CiphertextKind,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    pub destination: DeviceAddress,
    pub ciphertext: Vec<u8>,
    pub kind: CiphertextKind,
    /// The session is not yet acknowledged by the peer or was just built from
    /// a fetched bundle, so the sender's identity must go along.
    pub used_bundle: bool,
}

impl EncryptedEnvelope {
    /// Wire marker of the ciphertext, taken from what the engine produced.
    pub fn enc_type(&self) -> &'static str {
        self.kind.enc_type()
    }
}

/// The sending device: its own address plus the signed identity record that
/// is attached whenever a first-contact ciphertext goes out.
#[derive(Debug, Clone)]
pub struct LocalDevice {
    pub address: DeviceAddress,
    pub signed_identity: Vec<u8>,
}
