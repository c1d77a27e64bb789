//! Child channel routing for Framelink.
//!
//! A proxy can act as the parent of nested connections. Each child is
//! reached over either a linked endpoint pair or a pair of in-process
//! callbacks:
//! - **Link**: the two transport shapes a child channel can take
//! - **Registry**: the channel manager that wraps child traffic upstream
//!   and routes host messages back down

pub mod link;
pub mod registry;

pub use link::{ChannelTransport, DirectLink, LinkEndpoint, MessageSink};
pub use registry::{CHILD_CONNECTION_READY, ChannelManager, UpstreamSink};
