use std::collections::HashSet;

use tracing::debug;

use crate::address::DEFAULT_USER_SERVER;
use crate::{
    DeviceAddress, Error, InfoQuery, Node, NodeBuilder, Result, Transport, USYNC_NAMESPACE,
};

const QUERY: &str = "usync";

/// Expands user addresses into every registered device address.
pub struct DeviceResolver<'a> {
    transport: &'a dyn Transport,
    own: &'a DeviceAddress,
}

impl<'a> DeviceResolver<'a> {
    pub fn new(transport: &'a dyn Transport, own: &'a DeviceAddress) -> Self {
        Self { transport, own }
    }

    /// One batched directory query for all users. The sender's own device is
    /// never part of the result; primary devices are left out when
    /// `ignore_primary` is set.
    pub fn resolve_devices(
        &self,
        users: &[DeviceAddress],
        ignore_primary: bool,
    ) -> Result<Vec<DeviceAddress>> {
        let response = self.transport.send_iq(build_usync_query(users))?;
        parse_usync_devices(&response, self.own, ignore_primary)
    }
}

pub fn build_usync_query(users: &[DeviceAddress]) -> InfoQuery {
    let mut seen = HashSet::new();
    let user_list: Vec<Node> = users
        .iter()
        .filter(|u| seen.insert(u.user.clone()))
        .map(|u| {
            NodeBuilder::new("user")
                .attr("jid", u.to_user_address())
                .build()
        })
        .collect();

    InfoQuery::get(
        USYNC_NAMESPACE,
        DeviceAddress::server_only(DEFAULT_USER_SERVER),
        vec![NodeBuilder::new("usync")
            .attr("sid", uuid::Uuid::new_v4().to_string())
            .attr("mode", "query")
            .attr("last", "true")
            .attr("index", "0")
            .attr("context", "message")
            .children([
                NodeBuilder::new("query")
                    .children([NodeBuilder::new("devices").attr("version", "2").build()])
                    .build(),
                NodeBuilder::new("list").children(user_list).build(),
            ])
            .build()],
    )
}

pub fn parse_usync_devices(
    response: &Node,
    own: &DeviceAddress,
    ignore_primary: bool,
) -> Result<Vec<DeviceAddress>> {
    if let Some(error) = response.child_by_tag("error") {
        return Err(Error::RemoteProtocol {
            query: QUERY,
            text: error.to_xml_string(),
        });
    }
    let usync = response
        .child_by_tag("usync")
        .ok_or_else(|| malformed("unexpected children in response to usync query"))?;
    let list = usync
        .child_by_tag("list")
        .ok_or_else(|| malformed("missing list inside usync tag"))?;

    let mut devices = Vec::new();
    for user in list.children_by_tag("user") {
        let Some(jid) = user.attr_getter().address("jid") else {
            debug!(entry = %user.to_xml_string(), "Skipping usync user without a valid jid");
            continue;
        };
        let Some(device_list) = user
            .child_by_tag("devices")
            .and_then(|d| d.child_by_tag("device-list"))
        else {
            debug!(user = %jid, "Skipping usync user without a device list");
            continue;
        };

        for device in device_list.children_by_tag("device") {
            let id = device.attr_getter().get_i64("id", true);
            let Some(id) = id.and_then(|id| u8::try_from(id).ok()) else {
                debug!(user = %jid, entry = %device.to_xml_string(), "Skipping device with invalid id");
                continue;
            };
            let address = DeviceAddress {
                user: jid.user.clone(),
                device: id,
                server: DEFAULT_USER_SERVER.to_string(),
                directory_qualified: true,
            };
            if (address.device > 0 || !ignore_primary) && address != *own {
                devices.push(address);
            }
        }
    }

    Ok(devices)
}

fn malformed(reason: &str) -> Error {
    Error::MalformedResponse {
        query: QUERY,
        reason: reason.to_string(),
    }
}
