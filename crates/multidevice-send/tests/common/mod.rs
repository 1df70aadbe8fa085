//! Test utilities: scripted transport, cipher engine and bundle fetcher

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use multidevice_send::{
    BundleFetcher, BundleResults, Ciphertext, CiphertextKind, CipherEngine, CipherError,
    DeviceAddress, DispatchConfig, Dispatcher, Error, FetchError, InfoQuery, KeyBundle,
    LocalDevice, Node, NodeBuilder, PreKey, Result, SignedPreKey, Transport,
};
use serde::Serialize;

pub const SERVER: &str = "s.whatsapp.net";

pub fn user(name: &str) -> DeviceAddress {
    DeviceAddress::new(name, SERVER)
}

pub fn dev(name: &str, device: u8) -> DeviceAddress {
    DeviceAddress::device(name, device)
}

#[derive(Debug, Serialize)]
pub struct TextMessage {
    pub conversation: String,
}

pub fn text(body: &str) -> TextMessage {
    TextMessage {
        conversation: body.to_string(),
    }
}

pub fn local_device() -> LocalDevice {
    LocalDevice {
        address: dev("alice", 0),
        signed_identity: b"alice-identity".to_vec(),
    }
}

pub fn sample_bundle(seed: u8) -> KeyBundle {
    KeyBundle {
        registration_id: 1000 + seed as u32,
        identity_key: [seed; 32],
        signed_pre_key: SignedPreKey {
            id: 1,
            public_key: [seed.wrapping_add(1); 32],
            signature: [seed.wrapping_add(2); 64],
        },
        pre_key: Some(PreKey {
            id: 7,
            public_key: [seed.wrapping_add(3); 32],
        }),
    }
}

fn bytes_node(tag: &str, bytes: Vec<u8>) -> Node {
    NodeBuilder::new(tag).bytes(bytes).build()
}

/// Encode a bundle the way the key service returns it.
pub fn bundle_user_node(jid: &DeviceAddress, bundle: &KeyBundle) -> Node {
    let id3 = |id: u32| id.to_be_bytes()[1..].to_vec();
    let mut keys = vec![
        bytes_node("identity", bundle.identity_key.to_vec()),
        NodeBuilder::new("skey")
            .children([
                bytes_node("id", id3(bundle.signed_pre_key.id)),
                bytes_node("value", bundle.signed_pre_key.public_key.to_vec()),
                bytes_node("signature", bundle.signed_pre_key.signature.to_vec()),
            ])
            .build(),
    ];
    if let Some(pre_key) = &bundle.pre_key {
        keys.push(
            NodeBuilder::new("key")
                .children([
                    bytes_node("id", id3(pre_key.id)),
                    bytes_node("value", pre_key.public_key.to_vec()),
                ])
                .build(),
        );
    }
    NodeBuilder::new("user")
        .attr("jid", jid.clone())
        .children([
            bytes_node("registration", bundle.registration_id.to_be_bytes().to_vec()),
            NodeBuilder::new("keys").children(keys).build(),
        ])
        .build()
}

fn error_node(code: &str, text: &str) -> Node {
    NodeBuilder::new("error")
        .attr("code", code)
        .attr("text", text)
        .build()
}

/// Answers queries by namespace from scripted state and records everything.
#[derive(Default)]
pub struct FakeTransport {
    pub directory: Mutex<Vec<(String, Vec<u8>)>>,
    pub usync_error: Mutex<Option<String>>,
    pub group_participants: Mutex<Vec<String>>,
    pub group_error: Mutex<Option<String>>,
    pub bundles: Mutex<HashMap<DeviceAddress, KeyBundle>>,
    pub bundle_errors: Mutex<HashMap<DeviceAddress, String>>,
    pub queries: Mutex<Vec<InfoQuery>>,
    pub sent: Mutex<Vec<Node>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(self, user: &str, devices: &[u8]) -> Self {
        self.directory
            .lock()
            .unwrap()
            .push((user.to_string(), devices.to_vec()));
        self
    }

    pub fn with_group(self, participants: &[&str]) -> Self {
        *self.group_participants.lock().unwrap() =
            participants.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_bundle(self, device: DeviceAddress, bundle: KeyBundle) -> Self {
        self.bundles.lock().unwrap().insert(device, bundle);
        self
    }

    pub fn with_bundle_error(self, device: DeviceAddress, text: &str) -> Self {
        self.bundle_errors
            .lock()
            .unwrap()
            .insert(device, text.to_string());
        self
    }

    pub fn query_count(&self, namespace: &str) -> usize {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.namespace == namespace)
            .count()
    }

    pub fn sent_nodes(&self) -> Vec<Node> {
        self.sent.lock().unwrap().clone()
    }

    fn answer_usync(&self, query: &InfoQuery) -> Vec<Node> {
        if let Some(text) = self.usync_error.lock().unwrap().clone() {
            return vec![error_node("500", &text)];
        }
        let requested: Vec<String> = query.content[0]
            .child_by_tag("list")
            .map(|list| {
                list.children()
                    .iter()
                    .filter_map(|u| u.attr_getter().address("jid"))
                    .map(|a| a.user)
                    .collect()
            })
            .unwrap_or_default();

        let directory = self.directory.lock().unwrap();
        let users = requested.iter().map(|name| {
            let ids = directory
                .iter()
                .find(|(user, _)| user == name)
                .map(|(_, ids)| ids.clone())
                .unwrap_or_default();
            NodeBuilder::new("user")
                .attr("jid", user(name))
                .children([NodeBuilder::new("devices")
                    .children([NodeBuilder::new("device-list")
                        .children(
                            ids.iter()
                                .map(|id| NodeBuilder::new("device").attr("id", *id as i64).build()),
                        )
                        .build()])
                    .build()])
                .build()
        });
        vec![NodeBuilder::new("usync")
            .children([NodeBuilder::new("list").children(users).build()])
            .build()]
    }

    fn answer_group(&self, query: &InfoQuery) -> Vec<Node> {
        if let Some(text) = self.group_error.lock().unwrap().clone() {
            return vec![error_node("404", &text)];
        }
        let participants = self
            .group_participants
            .lock()
            .unwrap()
            .iter()
            .map(|jid| NodeBuilder::new("participant").attr("jid", jid.as_str()).build())
            .collect::<Vec<_>>();
        vec![NodeBuilder::new("group")
            .attr("id", query.to.user.as_str())
            .attr("subject", "Test group")
            .attr("creation", 1_700_000_000i64)
            .children(participants)
            .build()]
    }

    fn answer_encrypt(&self, query: &InfoQuery) -> Vec<Node> {
        let bundles = self.bundles.lock().unwrap();
        let errors = self.bundle_errors.lock().unwrap();
        let users = query.content[0]
            .children()
            .iter()
            .filter_map(|u| u.attr_getter().address("jid"))
            .filter_map(|jid| {
                if let Some(text) = errors.get(&jid) {
                    return Some(
                        NodeBuilder::new("user")
                            .attr("jid", jid.clone())
                            .children([error_node("406", text)])
                            .build(),
                    );
                }
                bundles.get(&jid).map(|b| bundle_user_node(&jid, b))
            })
            .collect::<Vec<_>>();
        vec![NodeBuilder::new("list").children(users).build()]
    }
}

impl Transport for FakeTransport {
    fn send_node(&self, node: Node) -> Result<()> {
        self.sent.lock().unwrap().push(node);
        Ok(())
    }

    fn send_iq(&self, query: InfoQuery) -> Result<Node> {
        self.queries.lock().unwrap().push(query.clone());
        let children = match query.namespace {
            "usync" => self.answer_usync(&query),
            "w:g2" => self.answer_group(&query),
            "encrypt" => self.answer_encrypt(&query),
            other => return Err(Error::Transport(format!("unexpected namespace {other}"))),
        };
        Ok(NodeBuilder::new("iq")
            .attr("type", "result")
            .children(children)
            .build())
    }
}

fn unpad(padded: &[u8]) -> Vec<u8> {
    let pad = padded.last().copied().unwrap_or(0) as usize;
    padded[..padded.len() - pad].to_vec()
}

/// Cipher engine with scripted sessions that counts every call.
#[derive(Default)]
pub struct FakeCipher {
    pub sessions: Mutex<HashSet<DeviceAddress>>,
    /// Sessions established from a bundle; encrypting on them yields
    /// first-contact ciphertext.
    pub fresh: Mutex<HashSet<DeviceAddress>>,
    pub failing: Mutex<HashSet<DeviceAddress>>,
    pub bad_bundles: Mutex<HashSet<DeviceAddress>>,
    /// Devices whose acknowledged session shows up right after the first
    /// lookup reports none, as if a concurrent send had established it.
    pub appearing: Mutex<HashSet<DeviceAddress>>,
    pub establish_calls: Mutex<HashMap<DeviceAddress, usize>>,
    pub encrypted: Mutex<Vec<(DeviceAddress, Vec<u8>)>>,
    pub sender_keys_created: AtomicUsize,
    pub sender_key_fails: AtomicBool,
    pub group_plaintexts: Mutex<Vec<Vec<u8>>>,
    in_flight: Mutex<HashSet<DeviceAddress>>,
    pub overlaps: AtomicUsize,
}

impl FakeCipher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sessions(self, devices: &[DeviceAddress]) -> Self {
        self.sessions.lock().unwrap().extend(devices.iter().cloned());
        self
    }

    /// Sessions that exist but were never acknowledged by the peer.
    pub fn with_fresh_sessions(self, devices: &[DeviceAddress]) -> Self {
        self.sessions.lock().unwrap().extend(devices.iter().cloned());
        self.fresh.lock().unwrap().extend(devices.iter().cloned());
        self
    }

    pub fn with_session_appearing_later(self, device: DeviceAddress) -> Self {
        self.appearing.lock().unwrap().insert(device);
        self
    }

    pub fn failing_for(self, device: DeviceAddress) -> Self {
        self.failing.lock().unwrap().insert(device);
        self
    }

    pub fn rejecting_bundle_for(self, device: DeviceAddress) -> Self {
        self.bad_bundles.lock().unwrap().insert(device);
        self
    }

    pub fn establish_count(&self, device: &DeviceAddress) -> usize {
        self.establish_calls
            .lock()
            .unwrap()
            .get(device)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_establish(&self) -> usize {
        self.establish_calls.lock().unwrap().values().sum()
    }

    pub fn encrypt_count(&self, device: &DeviceAddress) -> usize {
        self.encrypted
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == device)
            .count()
    }

    /// Unpadded plaintext of the latest encryption for a device.
    pub fn plaintext_for(&self, device: &DeviceAddress) -> Option<Vec<u8>> {
        self.encrypted
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(d, _)| d == device)
            .map(|(_, p)| p.clone())
    }

    fn enter(&self, device: &DeviceAddress) {
        if !self.in_flight.lock().unwrap().insert(device.clone()) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn leave(&self, device: &DeviceAddress) {
        self.in_flight.lock().unwrap().remove(device);
    }
}

impl CipherEngine for FakeCipher {
    fn contains_session(&self, address: &DeviceAddress) -> std::result::Result<bool, CipherError> {
        if self.appearing.lock().unwrap().remove(address) {
            self.sessions.lock().unwrap().insert(address.clone());
            return Ok(false);
        }
        Ok(self.sessions.lock().unwrap().contains(address))
    }

    fn process_bundle(
        &self,
        address: &DeviceAddress,
        _bundle: &KeyBundle,
    ) -> std::result::Result<(), CipherError> {
        self.enter(address);
        *self
            .establish_calls
            .lock()
            .unwrap()
            .entry(address.clone())
            .or_default() += 1;
        std::thread::sleep(Duration::from_millis(2));

        let result = if self.bad_bundles.lock().unwrap().contains(address) {
            Err(CipherError::InvalidBundle("untrusted identity".to_string()))
        } else {
            self.sessions.lock().unwrap().insert(address.clone());
            self.fresh.lock().unwrap().insert(address.clone());
            Ok(())
        };
        self.leave(address);
        result
    }

    fn encrypt(
        &self,
        address: &DeviceAddress,
        padded: &[u8],
    ) -> std::result::Result<Ciphertext, CipherError> {
        self.enter(address);
        let result = if self.failing.lock().unwrap().contains(address) {
            Err(CipherError::Encryption("scripted failure".to_string()))
        } else if !self.sessions.lock().unwrap().contains(address) {
            Err(CipherError::NoSession)
        } else {
            self.encrypted
                .lock()
                .unwrap()
                .push((address.clone(), unpad(padded)));
            let kind = if self.fresh.lock().unwrap().contains(address) {
                CiphertextKind::PreKey
            } else {
                CiphertextKind::Whisper
            };
            Ok(Ciphertext {
                kind,
                bytes: format!("ct:{address}").into_bytes(),
            })
        };
        self.leave(address);
        result
    }

    fn create_sender_key_distribution(
        &self,
        group: &DeviceAddress,
        sender: &DeviceAddress,
    ) -> std::result::Result<Vec<u8>, CipherError> {
        if self.sender_key_fails.load(Ordering::SeqCst) {
            return Err(CipherError::SenderKey("no sender key store".to_string()));
        }
        self.sender_keys_created.fetch_add(1, Ordering::SeqCst);
        Ok(format!("skdm:{group}:{sender}").into_bytes())
    }

    fn encrypt_group(
        &self,
        group: &DeviceAddress,
        _sender: &DeviceAddress,
        padded: &[u8],
    ) -> std::result::Result<Vec<u8>, CipherError> {
        self.group_plaintexts.lock().unwrap().push(unpad(padded));
        Ok(format!("skmsg:{group}").into_bytes())
    }
}

/// Bundle fetcher answering from a map, recording each batch.
#[derive(Default)]
pub struct FakeFetcher {
    pub results: Mutex<HashMap<DeviceAddress, std::result::Result<KeyBundle, FetchError>>>,
    pub fail_batch: AtomicBool,
    pub calls: Mutex<Vec<Vec<DeviceAddress>>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bundle(self, device: DeviceAddress, bundle: KeyBundle) -> Self {
        self.results.lock().unwrap().insert(device, Ok(bundle));
        self
    }

    pub fn with_error(self, device: DeviceAddress, error: FetchError) -> Self {
        self.results.lock().unwrap().insert(device, Err(error));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl BundleFetcher for FakeFetcher {
    fn fetch_bundles(&self, devices: &[DeviceAddress]) -> Result<BundleResults> {
        self.calls.lock().unwrap().push(devices.to_vec());
        if self.fail_batch.load(Ordering::SeqCst) {
            return Err(Error::Transport("key service unreachable".to_string()));
        }
        let results = self.results.lock().unwrap();
        Ok(devices
            .iter()
            .map(|d| {
                let result = results.get(d).cloned().unwrap_or(Err(FetchError::Missing));
                (d.clone(), result)
            })
            .collect())
    }
}

pub fn dispatcher(transport: &Arc<FakeTransport>, cipher: &Arc<FakeCipher>) -> Dispatcher {
    dispatcher_with_config(transport, cipher, DispatchConfig::default())
}

pub fn dispatcher_with_config(
    transport: &Arc<FakeTransport>,
    cipher: &Arc<FakeCipher>,
    config: DispatchConfig,
) -> Dispatcher {
    Dispatcher::new(transport.clone(), cipher.clone(), local_device(), config).unwrap()
}

/// `(jid, enc type)` of each entry in the participants container.
pub fn participant_entries(node: &Node) -> Vec<(String, String)> {
    node.child_by_tag("participants")
        .map(|p| {
            p.children()
                .iter()
                .map(|to| {
                    let jid = to.attr_getter().string("jid");
                    let enc_type = to
                        .child_by_tag("enc")
                        .map(|enc| enc.attr_getter().string("type"))
                        .unwrap_or_default();
                    (jid, enc_type)
                })
                .collect()
        })
        .unwrap_or_default()
}
