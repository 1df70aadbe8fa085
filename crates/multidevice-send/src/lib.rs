//! Multi-device message dispatch.
//!
//! Encrypts one logical message for every device of its recipients,
//! recovering missing sessions with a single batched key bundle fetch, and
//! assembles the outbound message node for the transport.

pub mod address;
pub mod assemble;
pub mod bundle;
pub mod cipher;
mod config;
pub mod devices;
mod dispatcher;
mod error;
pub mod fanout;
pub mod group_info;
pub mod marshal;
pub mod node;
mod transport;
mod types;

pub use address::{DeviceAddress, ParseAddressError};
pub use assemble::{participant_hash, GroupPayload, MessageAssembler};
pub use bundle::{BundleFetcher, BundleResults, IqBundleFetcher};
pub use cipher::{pad_message, CipherAdapter, CipherEngine};
pub use config::DispatchConfig;
pub use devices::DeviceResolver;
pub use dispatcher::{generate_message_id, try_generate_message_id, Dispatcher, SendReport};
pub use error::{CipherError, EntropyError, Error, FetchError, Result};
pub use fanout::{DropReason, DroppedDevice, FanoutEngine, FanoutReport, SessionLocks};
pub use group_info::get_group_info;
pub use marshal::{marshal_message, marshal_sender_key_distribution, Marshaled};
pub use node::{AttrError, AttrGetter, AttrValue, Attrs, Content, Node, NodeBuilder};
pub use transport::{ChannelTransport, InfoQuery, Transport, TransportRequest};
pub use types::*;
