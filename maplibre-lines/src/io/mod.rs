//! Handles IO related processing as well as the messaging between the background and the
//! foreground.

pub mod message;

pub use message::{channel, ChannelError, MessageChannel, ResourceRequest, ResourceResponse};
