use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::assemble::{participant_hash, GroupPayload, MessageAssembler};
use crate::bundle::{BundleFetcher, IqBundleFetcher};
use crate::cipher::{CipherAdapter, CipherEngine};
use crate::devices::DeviceResolver;
use crate::fanout::{DroppedDevice, FanoutEngine, FanoutReport, SessionLocks};
use crate::marshal::{marshal_message, marshal_sender_key_distribution};
use crate::{
    group_info, DeviceAddress, DispatchConfig, EntropyError, Error, GroupInfo, LocalDevice,
    Result, Transport,
};

/// Outcome of a successful send. Devices that could not be encrypted for are
/// listed in `dropped`; the message still went out to everyone in `delivered`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub message_id: String,
    pub delivered: Vec<DeviceAddress>,
    pub dropped: Vec<DroppedDevice>,
    pub used_bundle: bool,
}

/// Sends end-to-end encrypted messages to every device of the recipients.
///
/// The dispatcher is `Sync`; concurrent sends share the per-device session
/// locks so two sends never establish the same session twice.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    cipher: CipherAdapter,
    fetcher: Arc<dyn BundleFetcher>,
    local: LocalDevice,
    config: DispatchConfig,
    locks: SessionLocks,
}

impl Dispatcher {
    /// Create a dispatcher that fetches key bundles over the same transport.
    pub fn new(
        transport: Arc<dyn Transport>,
        engine: Arc<dyn CipherEngine>,
        local: LocalDevice,
        config: DispatchConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            fetcher: Arc::new(IqBundleFetcher::new(transport.clone())),
            transport,
            cipher: CipherAdapter::new(engine),
            local,
            config,
            locks: SessionLocks::new(),
        })
    }

    /// Encrypt and send `message` to a user or group.
    ///
    /// `to` must not name a specific device. A message id is generated when
    /// `id` is `None` or empty.
    pub fn send<M: Serialize>(
        &self,
        to: &DeviceAddress,
        id: Option<String>,
        message: &M,
    ) -> Result<SendReport> {
        if to.directory_qualified {
            return Err(Error::InvalidDestination(to.clone()));
        }
        let id = id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_message_id);

        if to.is_group() {
            self.send_group(to, &id, message)
        } else {
            self.send_direct(to, &id, message)
        }
    }

    pub fn get_group_info(&self, group: &DeviceAddress) -> Result<GroupInfo> {
        group_info::get_group_info(self.transport.as_ref(), group)
    }

    pub fn resolve_devices(
        &self,
        users: &[DeviceAddress],
        ignore_primary: bool,
    ) -> Result<Vec<DeviceAddress>> {
        DeviceResolver::new(self.transport.as_ref(), &self.local.address)
            .resolve_devices(users, ignore_primary)
    }

    fn fanout_engine(&self) -> FanoutEngine<'_> {
        FanoutEngine::new(
            &self.cipher,
            self.fetcher.as_ref(),
            &self.locks,
            &self.local.address,
            self.config.max_workers,
        )
    }

    fn send_group<M: Serialize>(
        &self,
        to: &DeviceAddress,
        id: &str,
        message: &M,
    ) -> Result<SendReport> {
        let marshaled = marshal_message(to, message)?;
        let info = self.get_group_info(to)?;

        let own = &self.local.address;
        let distribution = self.cipher.create_group_session(to, own)?;
        let distribution_plaintext = marshal_sender_key_distribution(to, &distribution)?;
        let sender_key_ciphertext = self.cipher.encrypt_group(to, own, &marshaled.plaintext)?;

        let participants: Vec<DeviceAddress> =
            info.participants.iter().map(|p| p.address.clone()).collect();
        let participant_ids: Vec<String> = participants.iter().map(ToString::to_string).collect();

        let devices = self.resolve_devices(&participants, false)?;
        debug!(message_id = id, group = %to, devices = devices.len(), "Sending group message");
        let fanout = self
            .fanout_engine()
            .fanout(&devices, id, &distribution_plaintext, None);

        let group = GroupPayload {
            participant_hash: participant_hash(&participant_ids),
            sender_key_ciphertext,
        };
        self.transmit(id, to, fanout, Some(&group))
    }

    fn send_direct<M: Serialize>(
        &self,
        to: &DeviceAddress,
        id: &str,
        message: &M,
    ) -> Result<SendReport> {
        let marshaled = marshal_message(to, message)?;

        let devices = self.resolve_devices(&[to.clone(), self.local.address.clone()], false)?;
        debug!(message_id = id, to = %to, devices = devices.len(), "Sending direct message");
        let fanout = self.fanout_engine().fanout(
            &devices,
            id,
            &marshaled.plaintext,
            marshaled.self_copy.as_deref(),
        );

        self.transmit(id, to, fanout, None)
    }

    fn transmit(
        &self,
        id: &str,
        to: &DeviceAddress,
        fanout: FanoutReport,
        group: Option<&GroupPayload>,
    ) -> Result<SendReport> {
        let nothing_delivered = fanout.envelopes.is_empty() && !fanout.dropped.is_empty();
        if self.config.fail_on_empty_fanout && nothing_delivered {
            warn!(
                message_id = id,
                to = %to,
                attempted = fanout.attempted(),
                "No device could be encrypted for, not sending"
            );
            return Err(Error::NoDeliverableDevices {
                attempted: fanout.attempted(),
            });
        }
        if !fanout.dropped.is_empty() {
            warn!(
                message_id = id,
                delivered = fanout.envelopes.len(),
                dropped = fanout.dropped.len(),
                "Sending message to a subset of devices"
            );
        }

        let assembler = MessageAssembler {
            message_type: &self.config.message_type,
            protocol_version: &self.config.protocol_version,
        };
        let node = assembler.assemble(id, to, &fanout, group, &self.local);
        self.transport.send_node(node)?;

        Ok(SendReport {
            message_id: id.to_string(),
            delivered: fanout.envelopes.into_iter().map(|e| e.destination).collect(),
            dropped: fanout.dropped,
            used_bundle: fanout.any_used_bundle,
        })
    }
}

/// 16 random bytes from the OS, hex encoded.
pub fn try_generate_message_id() -> std::result::Result<String, EntropyError> {
    let mut id = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut id)
        .map_err(|e| EntropyError(e.to_string()))?;
    Ok(hex::encode(id))
}

/// Like [`try_generate_message_id`], but aborts the process when the OS cannot
/// supply randomness. There is no safe fallback id.
pub fn generate_message_id() -> String {
    match try_generate_message_id() {
        Ok(id) => id,
        Err(err) => {
            error!(error = %err, "Cannot generate message id");
            std::process::abort()
        }
    }
}
