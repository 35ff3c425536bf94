//! Thin Discord REST integration: message payload types and the client
//! that posts them. No gateway connection is ever opened.

mod client;
mod message;

pub use client::{DeliveryError, DiscordClient};
pub use message::{ChannelMessage, Embed, EmbedFooter, EmbedImage};
