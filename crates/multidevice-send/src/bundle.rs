use std::collections::HashMap;
use std::sync::Arc;

use crate::address::DEFAULT_USER_SERVER;
use crate::{
    DeviceAddress, Error, FetchError, InfoQuery, KeyBundle, Node, NodeBuilder, PreKey, Result,
    SignedPreKey, Transport, ENCRYPT_NAMESPACE,
};

const QUERY: &str = "key bundle";

pub type BundleResults = HashMap<DeviceAddress, std::result::Result<KeyBundle, FetchError>>;

/// Batched first-contact key lookup. Every requested device gets an entry;
/// a failure for one device never affects the others.
pub trait BundleFetcher: Send + Sync {
    fn fetch_bundles(&self, devices: &[DeviceAddress]) -> Result<BundleResults>;
}

/// Fetches bundles with a single `encrypt` query over the transport.
pub struct IqBundleFetcher {
    transport: Arc<dyn Transport>,
}

impl IqBundleFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl BundleFetcher for IqBundleFetcher {
    fn fetch_bundles(&self, devices: &[DeviceAddress]) -> Result<BundleResults> {
        let requests = devices.iter().map(|device| {
            NodeBuilder::new("user")
                .attr("jid", device.clone())
                .attr("reason", "identity")
                .build()
        });
        let query = InfoQuery::get(
            ENCRYPT_NAMESPACE,
            DeviceAddress::server_only(DEFAULT_USER_SERVER),
            vec![NodeBuilder::new("key").children(requests).build()],
        );
        let response = self.transport.send_iq(query)?;
        parse_bundle_response(&response, devices)
    }
}

pub fn parse_bundle_response(response: &Node, requested: &[DeviceAddress]) -> Result<BundleResults> {
    if let Some(error) = response.child_by_tag("error") {
        return Err(Error::RemoteProtocol {
            query: QUERY,
            text: error.to_xml_string(),
        });
    }
    let list = response
        .child_by_tag("list")
        .ok_or_else(|| Error::MalformedResponse {
            query: QUERY,
            reason: "list node not found in response".to_string(),
        })?;

    let mut results: BundleResults = HashMap::with_capacity(requested.len());
    for user in list.children_by_tag("user") {
        let Some(jid) = user.attr_getter().address("jid") else {
            continue;
        };
        results.insert(jid, node_to_bundle(user));
    }
    for device in requested {
        results
            .entry(device.clone())
            .or_insert(Err(FetchError::Missing));
    }
    Ok(results)
}

fn node_to_bundle(user: &Node) -> std::result::Result<KeyBundle, FetchError> {
    if let Some(error) = user.child_by_tag("error") {
        let mut ag = error.attr_getter();
        return Err(FetchError::Remote {
            code: ag.optional_string("code").unwrap_or_default(),
            text: ag.optional_string("text").unwrap_or_default(),
        });
    }

    let registration: [u8; 4] = fixed_bytes(user, "registration")?;
    let keys = user.child_by_tag("keys").unwrap_or(user);
    let identity_key: [u8; 32] = fixed_bytes(keys, "identity")?;

    let signed = keys
        .child_by_tag("skey")
        .ok_or_else(|| FetchError::Malformed("missing signed pre-key".to_string()))?;
    let signed_pre_key = SignedPreKey {
        id: key_id(signed)?,
        public_key: fixed_bytes(signed, "value")?,
        signature: fixed_bytes(signed, "signature")?,
    };

    let pre_key = match keys.child_by_tag("key") {
        Some(node) => Some(PreKey {
            id: key_id(node)?,
            public_key: fixed_bytes(node, "value")?,
        }),
        None => None,
    };

    Ok(KeyBundle {
        registration_id: u32::from_be_bytes(registration),
        identity_key,
        signed_pre_key,
        pre_key,
    })
}

fn fixed_bytes<const N: usize>(parent: &Node, tag: &str) -> std::result::Result<[u8; N], FetchError> {
    parent
        .child_by_tag(tag)
        .and_then(Node::bytes)
        .and_then(|b| <[u8; N]>::try_from(b).ok())
        .ok_or_else(|| FetchError::Malformed(format!("invalid {tag} in key bundle")))
}

/// Key ids are 3-byte big-endian.
fn key_id(node: &Node) -> std::result::Result<u32, FetchError> {
    let id: [u8; 3] = fixed_bytes(node, "id")?;
    Ok(u32::from_be_bytes([0, id[0], id[1], id[2]]))
}
