//! Wire types for the Discord create-message endpoint.

use serde::Serialize;

/// Body for `POST /channels/{channel_id}/messages`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelMessage {
    pub embeds: Vec<Embed>,
}

/// A single rich embed.
///
/// Optional fields are omitted from the JSON entirely rather than sent as
/// null; Discord treats explicit nulls in some fields as validation errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub description: String,
    pub color: u32,
    /// ISO 8601 timestamp shown next to the footer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}
