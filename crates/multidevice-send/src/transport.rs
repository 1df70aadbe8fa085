use tracing::trace;

use crate::{DeviceAddress, Error, Node, NodeBuilder, Result};

/// A `get` query. The transport assigns the request id and matches the
/// response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoQuery {
    pub namespace: &'static str,
    pub to: DeviceAddress,
    pub content: Vec<Node>,
}

impl InfoQuery {
    pub fn get(namespace: &'static str, to: DeviceAddress, content: Vec<Node>) -> Self {
        Self {
            namespace,
            to,
            content,
        }
    }

    /// Renders the query as an `iq` node without an id.
    pub fn to_node(&self) -> Node {
        NodeBuilder::new("iq")
            .attr("xmlns", self.namespace)
            .attr("type", "get")
            .attr("to", self.to.clone())
            .children(self.content.clone())
            .build()
    }
}

/// Outbound side of the connection. Implementations serialize and send nodes;
/// none of these calls carry a timeout or cancellation contract of their own.
pub trait Transport: Send + Sync {
    /// Send a node without waiting for a response.
    fn send_node(&self, node: Node) -> Result<()>;

    /// Send a query and block until its response node arrives.
    fn send_iq(&self, query: InfoQuery) -> Result<Node>;
}

/// Requests emitted by [`ChannelTransport`] for an external connection loop.
pub enum TransportRequest {
    Send(Node),
    Query {
        query: InfoQuery,
        reply: crossbeam_channel::Sender<Result<Node>>,
    },
}

/// Channel-based transport. The receiving end owns the actual connection and
/// answers queries through the supplied reply channel.
pub struct ChannelTransport {
    requests: crossbeam_channel::Sender<TransportRequest>,
}

impl ChannelTransport {
    pub fn new(requests: crossbeam_channel::Sender<TransportRequest>) -> Self {
        Self { requests }
    }
}

impl Transport for ChannelTransport {
    fn send_node(&self, node: Node) -> Result<()> {
        self.requests
            .send(TransportRequest::Send(node))
            .map_err(|_| Error::Transport("Failed to send node: connection closed".to_string()))
    }

    fn send_iq(&self, query: InfoQuery) -> Result<Node> {
        trace!(query = %query.to_node().to_xml_string(), "Queueing query");
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.requests
            .send(TransportRequest::Query {
                query,
                reply: reply_tx,
            })
            .map_err(|_| Error::Transport("Failed to send query: connection closed".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| Error::Transport("Query dropped without a response".to_string()))?
    }
}
