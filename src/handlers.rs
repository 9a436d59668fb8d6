// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Enrichment Handlers
//!
//! Handlers turn a raw event into the event subscribers actually receive, usually by
//! looking up extra context in a document store. They are registered by event type in a
//! [`HandlerRegistry`] and invoked by the [`crate::router::EventRouter`].

use crate::{errors::HandlerError, event::Event};
use async_trait::async_trait;
use opentelemetry::Context;
use std::{collections::HashMap, sync::Arc};

/// Enriches one event using the document store `D`.
///
/// A handler may rewrite any field of the event, including its key, so the result can
/// be routed somewhere else entirely. Returning an error drops the event.
#[async_trait]
pub trait EventHandler<D>: Send + Sync {
    async fn handle(&self, ctx: &Context, event: Event, store: &D) -> Result<Event, HandlerError>;
}

/// Maps event types to their handler.
pub struct HandlerRegistry<D> {
    handlers: HashMap<String, Arc<dyn EventHandler<D>>>,
}

impl<D> Default for HandlerRegistry<D> {
    fn default() -> Self {
        HandlerRegistry {
            handlers: HashMap::new(),
        }
    }
}

impl<D> HandlerRegistry<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events of type `kind`, replacing any previous one.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn register(mut self, kind: &str, handler: Arc<dyn EventHandler<D>>) -> Self {
        self.handlers.insert(kind.to_owned(), handler);
        self
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn EventHandler<D>>> {
        self.handlers.get(kind).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered event types, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) type Store = HashMap<String, String>;

    /// Looks the event's subject up in an in-memory store and readdresses the event to
    /// the owning account.
    pub(crate) struct OwnerLookup;

    #[async_trait]
    impl EventHandler<Store> for OwnerLookup {
        async fn handle(
            &self,
            _ctx: &Context,
            mut event: Event,
            store: &Store,
        ) -> Result<Event, HandlerError> {
            if event.data.is_empty() {
                return Err(HandlerError::MissingData);
            }

            let owner = store
                .get(&event.uuid)
                .ok_or_else(|| HandlerError::Store(format!("no owner for {}", event.uuid)))?;

            let subject = event.uuid.clone();
            event = event.with_data("instance_uuid", json!(subject));
            event.uuid = owner.clone();
            event.key = format!("accounts.{}", owner);
            event.r#type = "email".to_owned();

            Ok(event)
        }
    }

    pub(crate) fn store() -> Store {
        HashMap::from([("inst-1".to_owned(), "acc-1".to_owned())])
    }

    #[test]
    fn registry_looks_handlers_up_by_type() {
        assert!(HandlerRegistry::<Store>::new().is_empty());

        let registry = HandlerRegistry::<Store>::new()
            .register("instance_created", Arc::new(OwnerLookup))
            .register("instance_deleted", Arc::new(OwnerLookup));

        assert!(registry.get("instance_created").is_some());
        assert!(registry.get("unknown").is_none());
        assert!(!registry.is_empty());
        assert_eq!(registry.kinds(), vec!["instance_created", "instance_deleted"]);
    }

    #[tokio::test]
    async fn handler_readdresses_the_event() {
        let event = Event::new("instances", "instance_created", "inst-1").with_data("n", json!(1));

        let enriched = OwnerLookup
            .handle(&Context::new(), event, &store())
            .await
            .unwrap();

        assert_eq!(enriched.key, "accounts.acc-1");
        assert_eq!(enriched.uuid, "acc-1");
        assert_eq!(enriched.r#type, "email");
        assert_eq!(enriched.data_json("instance_uuid"), Some(json!("inst-1")));
    }

    #[tokio::test]
    async fn handler_rejects_events_without_data() {
        let event = Event::new("instances", "instance_created", "inst-1");

        let result = OwnerLookup.handle(&Context::new(), event, &store()).await;

        assert!(matches!(result, Err(HandlerError::MissingData)));
    }
}
