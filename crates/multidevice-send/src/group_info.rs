use tracing::{debug, warn};

use crate::{
    DeviceAddress, Error, GroupInfo, InfoQuery, Node, NodeBuilder, Participant, Result, Transport,
    GROUP_NAMESPACE,
};

const QUERY: &str = "group info";

/// Fetch the current metadata and participant list of a group.
pub fn get_group_info(transport: &dyn Transport, group: &DeviceAddress) -> Result<GroupInfo> {
    let query = InfoQuery::get(
        GROUP_NAMESPACE,
        group.clone(),
        vec![NodeBuilder::new("query")
            .attr("request", "interactive")
            .build()],
    );
    let response = transport.send_iq(query)?;
    parse_group_info(group, &response)
}

/// Parse a group info response. Unknown children and children with bad
/// attributes are logged and skipped over; only a missing `group` element or
/// an explicit `error` element fails.
pub fn parse_group_info(group: &DeviceAddress, response: &Node) -> Result<GroupInfo> {
    if let Some(error) = response.child_by_tag("error") {
        return Err(Error::RemoteProtocol {
            query: QUERY,
            text: error.to_xml_string(),
        });
    }

    let Some(group_node) = response.child_by_tag("group") else {
        return Err(Error::MalformedResponse {
            query: QUERY,
            reason: "response didn't contain a group element".to_string(),
        });
    };

    let mut ag = group_node.attr_getter();
    let mut info = GroupInfo {
        group_id: ag
            .optional_string("id")
            .filter(|id| !id.is_empty())
            .map_or_else(|| group.to_string(), |id| DeviceAddress::group(id).to_string()),
        owner: ag.optional_address("creator"),
        name: ag.optional_string("subject").unwrap_or_default(),
        name_set_at: ag.get_i64("s_t", false).unwrap_or_default(),
        name_set_by: ag.optional_address("s_o"),
        created_at: ag.get_i64("creation", false).unwrap_or_default(),
        ..Default::default()
    };
    if !ag.ok() {
        warn!(group = %group, errors = ?ag.errors(), "Possibly failed to parse group node attributes");
    }

    for child in group_node.children() {
        let mut child_ag = child.attr_getter();
        match child.tag.as_str() {
            "participant" => {
                let is_admin = child_ag.optional_string("type").as_deref() == Some("admin");
                if let Some(address) = child_ag.address("jid") {
                    info.participants.push(Participant { address, is_admin });
                }
            }
            "description" => {
                if let Some(body) = child.child_by_tag("body") {
                    info.topic = body
                        .bytes()
                        .map(|b| String::from_utf8_lossy(b).into_owned())
                        .unwrap_or_default();
                    info.topic_id = child_ag.string("id");
                    info.topic_set_by = child_ag.address("participant");
                    info.topic_set_at = child_ag.i64("t");
                }
            }
            "announcement" => info.announce_only = true,
            "locked" => info.locked = true,
            _ => {
                debug!(group = %group, element = %child.to_xml_string(), "Unknown element in group node");
            }
        }
        if !child_ag.ok() {
            warn!(
                group = %group,
                tag = %child.tag,
                errors = ?child_ag.errors(),
                "Possibly failed to parse element in group node"
            );
        }
    }

    Ok(info)
}
