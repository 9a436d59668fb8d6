// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # gRPC Facade
//!
//! [`EventBusServer`] exposes the bus as `events.EventsService`: a unary `Publish` and a
//! server-streaming `Consume`. Each `Consume` call owns the subscription for its key
//! until the caller goes away or another caller subscribes to the same key.

use crate::{
    bus::{EventBus, Subscription},
    errors::AmqpError,
    event::{ConsumeRequest, Event, Response as PublishResponse},
    proto::events_service_server::EventsService,
};
use opentelemetry::Context;
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Events buffered per `Consume` stream before the bridge waits on the caller
const CONSUME_BUFFER: usize = 64;

pub struct EventBusServer {
    bus: Arc<EventBus>,
}

impl EventBusServer {
    pub fn new(bus: Arc<EventBus>) -> Self {
        EventBusServer { bus }
    }
}

#[tonic::async_trait]
impl EventsService for EventBusServer {
    type ConsumeStream = ReceiverStream<Result<Event, Status>>;

    async fn publish(&self, request: Request<Event>) -> Result<Response<PublishResponse>, Status> {
        let mut event = request.into_inner();
        debug!(key = event.key.as_str(), kind = event.r#type.as_str(), "publish request received");

        if event.id.is_empty() {
            event.id = Uuid::new_v4().to_string();
        }
        if event.ts == 0 {
            event.ts = unix_seconds();
        }

        self.bus
            .publish(&Context::current(), &event)
            .await
            .map_err(|err| {
                error!(error = err.to_string(), key = event.key.as_str(), "publish failed");
                bus_status(&err)
            })?;

        Ok(Response::new(PublishResponse {}))
    }

    async fn consume(
        &self,
        request: Request<ConsumeRequest>,
    ) -> Result<Response<Self::ConsumeStream>, Status> {
        let req = request.into_inner();
        info!(key = req.key.as_str(), "consume request received");

        if req.key.is_empty() {
            return Err(Status::invalid_argument("key must not be empty"));
        }

        let sub = self.bus.subscribe(&req.key).await.map_err(|err| {
            error!(error = err.to_string(), key = req.key.as_str(), "subscribe failed");
            bus_status(&err)
        })?;

        let (tx, rx) = mpsc::channel(CONSUME_BUFFER);
        tokio::spawn(bridge(self.bus.clone(), sub, tx));

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Forwards a subscription onto an outbound stream, then releases the subscription.
///
/// Stops when the subscription ends, when a send fails, or when the caller drops the
/// stream, whichever comes first.
async fn bridge(bus: Arc<EventBus>, mut sub: Subscription, tx: mpsc::Sender<Result<Event, Status>>) {
    loop {
        let event = tokio::select! {
            _ = tx.closed() => {
                info!(key = sub.key.as_str(), "caller went away");
                break;
            }
            event = sub.events.recv() => match event {
                Some(event) => event,
                None => {
                    info!(key = sub.key.as_str(), "subscription closed");
                    break;
                }
            },
        };

        if tx.send(Ok(event)).await.is_err() {
            debug!(key = sub.key.as_str(), "outbound send failed");
            break;
        }
    }

    if let Err(err) = bus.release(&sub.key, sub.registration).await {
        error!(error = err.to_string(), key = sub.key.as_str(), "failure to release subscription");
    }
}

/// Reserved keys are the caller's mistake; anything else is a broker failure.
fn bus_status(err: &AmqpError) -> Status {
    match err {
        AmqpError::ReservedKey(_) => Status::invalid_argument(err.to_string()),
        _ => Status::internal(err.to_string()),
    }
}

fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}
