// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Event Bus
//!
//! This module provides the error types used across the bus. `AmqpError` covers every
//! broker-facing failure (connection, channel, topology, publishing, consuming), while
//! `HandlerError` is returned by enrichment handlers and `ConfigsError` by configuration
//! loading.

use thiserror::Error;

/// Failures talking to the broker.
///
/// Variants that wrap a `String` carry either the name of the broker object involved
/// or the broker's own error text, so the message surfaced to remote callers is
/// meaningful on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// The broker session could not be opened, or was lost
    #[error("failure to connect")]
    ConnectionError,

    /// A channel could not be opened or closed
    #[error("failure to create a channel")]
    ChannelError,

    /// The broker refused the prefetch settings
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Carries the exchange, then the queue
    #[error("failure to bind exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// The consumer for the named queue could not be registered
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// The broker refused to cancel the consumer with the given tag
    #[error("failure to cancel consumer `{0}`")]
    CancelConsumerError(String),

    #[error("failure to publish")]
    PublishingError,

    #[error("failure to serialize payload `{0}`")]
    SerializePayloadError(String),

    /// A delivery body is not a valid message
    #[error("failure to parse payload")]
    ParsePayloadError,

    /// The delivery stream reported an error
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// The routing key names a queue the bus does not own, such as the router's work queue
    #[error("routing key `{0}` is reserved")]
    ReservedKey(String),
}

/// Error returned by an enrichment handler. Aborts delivery of the event it was
/// handling.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("event has no data")]
    MissingData,

    #[error("document store failure: {0}")]
    Store(String),
}

#[derive(Error, Debug)]
pub enum ConfigsError {
    #[error("failure to load configs: {0}")]
    Load(#[from] config::ConfigError),
}
