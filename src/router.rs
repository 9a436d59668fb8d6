// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Event Router
//!
//! The router drains a shared work queue of raw events, runs each through the handler
//! registered for its type and publishes the result on the bus. Producers that want an
//! event enriched send it to the work queue instead of publishing it directly.

use crate::{
    bus::EventBus,
    consumer::{self, ConsumerHandle, EventReceiver},
    errors::AmqpError,
    event::Event,
    handlers::HandlerRegistry,
    queue::{Queue, QueueDefinition},
};
use opentelemetry::Context;
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

/// Name of the shared work queue when none is configured
pub const DEFAULT_ROUTER_QUEUE: &str = "events";

/// Pause before listening again after the work queue stream ends or cannot be opened
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct EventRouter<D> {
    bus: Arc<EventBus>,
    registry: Arc<HandlerRegistry<D>>,
    store: Arc<D>,
    queue: String,
    retry_delay: Duration,
}

impl<D> EventRouter<D>
where
    D: Send + Sync + 'static,
{
    /// Creates a router.
    ///
    /// # Parameters
    /// * `bus` - Bus the enriched events are published on
    /// * `registry` - Handlers by event type
    /// * `store` - Document store handed to every handler
    /// * `queue` - Name of the work queue to drain
    pub fn new(
        bus: Arc<EventBus>,
        registry: Arc<HandlerRegistry<D>>,
        store: Arc<D>,
        queue: &str,
    ) -> Self {
        EventRouter {
            bus,
            registry,
            store,
            queue: queue.to_owned(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// The durable, shared work queue definition.
    pub fn queue_definition(&self) -> QueueDefinition {
        QueueDefinition::new(&self.queue).durable()
    }

    /// Consumes the work queue until `shutdown` resolves.
    ///
    /// When the delivery stream ends, or the queue cannot be declared or consumed, the
    /// router waits for the retry delay and listens again on a fresh channel. Per-event
    /// failures are logged and the event dropped.
    pub async fn run<S>(&self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            match self.listen().await {
                Ok((handle, mut events)) => loop {
                    tokio::select! {
                        _ = &mut shutdown => {
                            info!("shutdown requested, stopping router");
                            if let Err(err) = handle.cancel().await {
                                error!(error = err.to_string(), "failure to cancel router consumer");
                            }
                            return;
                        }
                        event = events.recv() => match event {
                            Some(event) => self.route(event).await,
                            None => {
                                warn!(queue = self.queue.as_str(), "router delivery stream closed");
                                break;
                            }
                        },
                    }
                },
                Err(err) => {
                    error!(error = err.to_string(), queue = self.queue.as_str(), "failure to listen on the work queue");
                }
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping router");
                    return;
                }
                _ = tokio::time::sleep(self.retry_delay) => {
                    debug!(queue = self.queue.as_str(), "listening on the work queue again");
                }
            }
        }
    }

    async fn listen(&self) -> Result<(ConsumerHandle, EventReceiver), AmqpError> {
        let queue = Queue::declare(self.bus.connection(), &self.queue_definition()).await?;
        let (channel, deliveries) = queue.open_stream(&self.queue).await?;
        let (task, events) =
            consumer::forward(self.queue.clone(), deliveries, consumer::decode_event);

        info!(queue = self.queue.as_str(), "router listening");

        Ok((ConsumerHandle::new(&self.queue, channel, task), events))
    }

    async fn route(&self, event: Event) {
        debug!(key = event.key.as_str(), kind = event.r#type.as_str(), "received an event");

        let handler = match self.registry.get(&event.r#type) {
            Some(handler) => handler,
            None => {
                warn!(kind = event.r#type.as_str(), "handler not found, dropping event");
                return;
            }
        };

        let ctx = Context::current();
        let kind = event.r#type.clone();

        let enriched = match handler.handle(&ctx, event, &self.store).await {
            Ok(enriched) => enriched,
            Err(err) => {
                error!(error = err.to_string(), kind = kind.as_str(), "failure to call handler");
                return;
            }
        };

        if let Err(err) = self.bus.publish(&ctx, &enriched).await {
            error!(error = err.to_string(), "failure to publish enriched event");
        }
    }
}
