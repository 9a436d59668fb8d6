// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Outgoing Messages
//!
//! [`PublishMessage`] describes one message on its way to the broker: the target
//! exchange, the routing key, the encoded body and the metadata that goes into the AMQP
//! properties. Both wire formats are built here, protobuf for [`Event`]s and JSON for the
//! typed bus.

use crate::{errors::AmqpError, event::Event, otel};
use lapin::{
    types::{FieldTable, ShortString},
    BasicProperties,
};
use opentelemetry::Context;
use prost::Message;
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

/// Content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type for protobuf-encoded events
pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// The default (nameless) exchange, routing straight to the queue named by the key.
pub const DEFAULT_EXCHANGE: &str = "";

#[derive(Debug, Clone)]
pub struct PublishMessage<'m> {
    pub(crate) to: &'m str,
    pub(crate) key: &'m str,
    pub(crate) msg_type: Option<&'m str>,
    pub(crate) content_type: &'static str,
    pub(crate) data: Vec<u8>,
}

impl<'m> PublishMessage<'m> {
    /// Creates a message with an opaque body.
    ///
    /// # Parameters
    /// * `to` - Exchange name, empty for the default exchange
    /// * `key` - Routing key
    /// * `data` - Encoded body
    pub fn new(to: &'m str, key: &'m str, data: Vec<u8>) -> Self {
        PublishMessage {
            to,
            key,
            msg_type: None,
            content_type: PROTOBUF_CONTENT_TYPE,
            data,
        }
    }

    /// Protobuf-encodes `event`. Its `type` becomes the AMQP message type.
    pub fn event(to: &'m str, key: &'m str, event: &'m Event) -> Self {
        PublishMessage::new(to, key, event.encode_to_vec()).msg_type(&event.r#type)
    }

    /// JSON-encodes `payload`.
    pub fn json<T: Serialize>(to: &'m str, key: &'m str, payload: &T) -> Result<Self, AmqpError> {
        let data = serde_json::to_vec(payload).map_err(|err| {
            error!(error = err.to_string(), "error serializing payload");
            AmqpError::SerializePayloadError(err.to_string())
        })?;

        Ok(PublishMessage::new(to, key, data).content_type(JSON_CONTENT_TYPE))
    }

    pub fn msg_type(mut self, msg_type: &'m str) -> Self {
        self.msg_type = Some(msg_type);
        self
    }

    pub fn content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = content_type;
        self
    }

    /// Builds the AMQP properties, carrying `ctx` in the headers for distributed tracing.
    pub(crate) fn properties(&self, ctx: &Context) -> BasicProperties {
        BasicProperties::default()
            .with_content_type(ShortString::from(self.content_type))
            .with_type(ShortString::from(self.msg_type.unwrap_or_default()))
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
            .with_headers(FieldTable::from(otel::inject(ctx)))
    }
}
