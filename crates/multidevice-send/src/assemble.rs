use base64::Engine;
use sha2::{Digest, Sha256};

use crate::fanout::FanoutReport;
use crate::{
    DeviceAddress, LocalDevice, Node, NodeBuilder, DEVICE_IDENTITY_TAG, ENC_TAG,
    ENC_TYPE_SENDER_KEY, MESSAGE_TAG, PARTICIPANTS_TAG, PARTICIPANT_HASH_VERSION,
};

/// Short fingerprint of a group's membership, so receivers can tell when their
/// cached participant list has drifted from ours. Order of the input does not
/// matter.
pub fn participant_hash<S: AsRef<str>>(participants: &[S]) -> String {
    let mut sorted: Vec<&str> = participants.iter().map(|p| p.as_ref()).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    for participant in sorted {
        hasher.update(participant.as_bytes());
    }
    let digest = hasher.finalize();
    format!(
        "{}:{}",
        PARTICIPANT_HASH_VERSION,
        base64::engine::general_purpose::STANDARD_NO_PAD.encode(&digest[..6])
    )
}

/// Group-only parts of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPayload {
    pub participant_hash: String,
    pub sender_key_ciphertext: Vec<u8>,
}

pub struct MessageAssembler<'a> {
    pub message_type: &'a str,
    pub protocol_version: &'a str,
}

impl MessageAssembler<'_> {
    fn enc_node(&self, enc_type: &str, ciphertext: Vec<u8>) -> Node {
        NodeBuilder::new(ENC_TAG)
            .attr("v", self.protocol_version)
            .attr("type", enc_type)
            .bytes(ciphertext)
            .build()
    }

    /// Build the outbound message node. The sender's signed identity is
    /// attached iff any envelope was produced from a fetched bundle.
    pub fn assemble(
        &self,
        id: &str,
        to: &DeviceAddress,
        fanout: &FanoutReport,
        group: Option<&GroupPayload>,
        local: &LocalDevice,
    ) -> Node {
        let mut builder = NodeBuilder::new(MESSAGE_TAG)
            .attr("id", id)
            .attr("type", self.message_type)
            .attr("to", to.clone());
        if let Some(group) = group {
            builder = builder.attr("phash", group.participant_hash.clone());
        }

        let participants = fanout.envelopes.iter().map(|envelope| {
            NodeBuilder::new("to")
                .attr("jid", envelope.destination.clone())
                .children([self.enc_node(envelope.enc_type(), envelope.ciphertext.clone())])
                .build()
        });

        let mut children = vec![NodeBuilder::new(PARTICIPANTS_TAG)
            .children(participants)
            .build()];
        if let Some(group) = group {
            children.push(self.enc_node(ENC_TYPE_SENDER_KEY, group.sender_key_ciphertext.clone()));
        }
        if fanout.any_used_bundle {
            children.push(
                NodeBuilder::new(DEVICE_IDENTITY_TAG)
                    .bytes(local.signed_identity.clone())
                    .build(),
            );
        }

        builder.children(children).build()
    }
}
