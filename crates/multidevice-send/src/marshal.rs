use base64::Engine;
use serde::{Serialize, Serializer};

use crate::{DeviceAddress, Error, Result};

/// Copy of an outgoing direct message delivered to the sender's other devices,
/// recording who it was actually sent to.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSentMessage<'a, M: Serialize> {
    pub destination_jid: String,
    pub message: &'a M,
}

/// Pairwise-delivered wrapper around a serialized sender key distribution.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderKeyDistributionMessage<'a> {
    pub group_id: String,
    #[serde(serialize_with = "serialize_base64")]
    pub axolotl_sender_key_distribution_message: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marshaled {
    pub plaintext: Vec<u8>,
    /// Present for non-group destinations only.
    pub self_copy: Option<Vec<u8>>,
}

pub fn marshal_message<M: Serialize>(to: &DeviceAddress, message: &M) -> Result<Marshaled> {
    let plaintext = serde_json::to_vec(message).map_err(|source| Error::Marshal {
        what: "message",
        source,
    })?;

    let self_copy = if to.is_group() {
        None
    } else {
        let dsm = DeviceSentMessage {
            destination_jid: to.to_string(),
            message,
        };
        Some(serde_json::to_vec(&dsm).map_err(|source| Error::Marshal {
            what: "message (for own devices)",
            source,
        })?)
    };

    Ok(Marshaled {
        plaintext,
        self_copy,
    })
}

pub fn marshal_sender_key_distribution(group: &DeviceAddress, skdm: &[u8]) -> Result<Vec<u8>> {
    let message = SenderKeyDistributionMessage {
        group_id: group.to_string(),
        axolotl_sender_key_distribution_message: skdm,
    };
    serde_json::to_vec(&message).map_err(|source| Error::Marshal {
        what: "sender key distribution message",
        source,
    })
}

fn serialize_base64<S>(bytes: &&[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}
