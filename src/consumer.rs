// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Consumption
//!
//! This module holds the forwarding loop that bridges a broker delivery stream to an
//! in-process channel, and the handle used to cancel a consumer registration.
//!
//! Every delivery gets an OpenTelemetry consumer span parented on the context carried in
//! its headers. A body that cannot be decoded is dropped, but the failure is logged and
//! recorded on the span rather than swallowed.

use crate::{
    channel::{AmqpChannel, Delivery, DeliveryStream},
    errors::AmqpError,
    event::Event,
    otel::{self, CONSUMER_TRACER},
};
use futures_util::StreamExt;
use lapin::options::BasicCancelOptions;
use opentelemetry::{
    global,
    trace::{Span, Status},
};
use prost::Message;
use std::{borrow::Cow, sync::Arc};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver},
    task::JoinHandle,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Receiving side of a consumption stream.
pub type EventReceiver = UnboundedReceiver<Event>;

/// An active consumer registration.
///
/// Dropping the handle leaves the consumer running; call [`ConsumerHandle::cancel`] to
/// end it.
pub struct ConsumerHandle {
    id: Uuid,
    tag: String,
    channel: Arc<dyn AmqpChannel>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    pub(crate) fn new(tag: &str, channel: Arc<dyn AmqpChannel>, task: JoinHandle<()>) -> Self {
        ConsumerHandle {
            id: Uuid::new_v4(),
            tag: tag.to_owned(),
            channel,
            task,
        }
    }

    /// Identifies this registration among successive ones sharing a tag.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Whether the broker side can still be delivering to this registration.
    pub fn is_active(&self) -> bool {
        self.channel.is_open() && !self.task.is_finished()
    }

    /// Cancels the registration on the broker, then stops the forwarding task.
    ///
    /// If the channel the consumer was registered on is already closed, the broker has
    /// dropped the consumer with it and no cancel is sent. When the broker refuses the
    /// cancel the task keeps running and the error is returned.
    pub async fn cancel(&self) -> Result<(), AmqpError> {
        if self.channel.is_open() {
            self.channel
                .basic_cancel(&self.tag, BasicCancelOptions { nowait: false })
                .await?;
        } else {
            debug!(tag = self.tag.as_str(), "channel already closed, nothing to cancel");
        }

        self.task.abort();
        Ok(())
    }
}

pub(crate) fn decode_event(delivery: &Delivery) -> Result<Event, AmqpError> {
    Event::decode(delivery.data.as_slice()).map_err(|err| {
        debug!(error = err.to_string(), "invalid event body");
        AmqpError::ParsePayloadError
    })
}

/// Spawns the forwarding loop for `deliveries`.
///
/// The loop ends when the broker stream ends (consumer cancelled or channel lost) or
/// when the receiver is dropped.
///
/// # Parameters
/// * `name` - Queue name, used for span names and logs
/// * `deliveries` - Raw broker deliveries
/// * `decode` - Turns a delivery body into the forwarded message
pub(crate) fn forward<T, D>(
    name: String,
    mut deliveries: DeliveryStream,
    decode: D,
) -> (JoinHandle<()>, UnboundedReceiver<T>)
where
    T: Send + 'static,
    D: Fn(&Delivery) -> Result<T, AmqpError> + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        let tracer = global::tracer(CONSUMER_TRACER);

        loop {
            let next = tokio::select! {
                _ = tx.closed() => {
                    debug!(queue = name.as_str(), "receiver dropped, stopping consumer");
                    break;
                }
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(err)) => {
                    error!(error = err.to_string(), "errors consume msg");
                    continue;
                }
                None => {
                    debug!(queue = name.as_str(), "delivery stream closed");
                    break;
                }
            };

            let (_ctx, mut span) = otel::new_span(&delivery, &tracer, &name);

            match decode(&delivery) {
                Ok(msg) => {
                    span.set_status(Status::Ok);
                    if tx.send(msg).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(
                        queue = name.as_str(),
                        routing_key = delivery.routing_key.as_str(),
                        "dropping message that failed to decode"
                    );
                    span.record_error(&err);
                    span.set_status(Status::Error {
                        description: Cow::from("failure to decode msg"),
                    });
                }
            }
        }
    });

    (task, rx)
}
