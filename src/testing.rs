// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker implementing [`AmqpConnection`] and [`AmqpChannel`] for tests.
//!
//! It models the parts of RabbitMQ the bus relies on: topic routing with `*` and `#`,
//! the default exchange, buffering while a queue has no consumer, round-robin delivery
//! between consumers of a shared queue, consumer cancellation and auto-delete queues.
//! Redeclaring a queue with different flags fails and closes the channel.

use crate::{
    channel::{AmqpChannel, AmqpConnection, Delivery, DeliveryStream, QueueInfo},
    errors::AmqpError,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, ExchangeKind,
};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Debug, Clone)]
pub(crate) struct DeclaredExchange {
    pub kind: ExchangeKind,
    pub options: ExchangeDeclareOptions,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone)]
pub(crate) struct DeclaredQueue {
    pub options: QueueDeclareOptions,
    pub arguments: FieldTable,
    /// `(exchange, routing pattern)` pairs, without duplicates
    pub bindings: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConsumerInfo {
    pub tag: String,
    pub no_ack: bool,
    pub channel: u64,
}

struct Consumer {
    info: ConsumerInfo,
    tx: UnboundedSender<Result<Delivery, AmqpError>>,
}

struct QueueState {
    declared: DeclaredQueue,
    buffer: VecDeque<Delivery>,
    consumers: Vec<Consumer>,
    next: usize,
}

impl QueueState {
    fn push(&mut self, delivery: Delivery) {
        if self.consumers.is_empty() {
            self.buffer.push_back(delivery);
            return;
        }

        let idx = self.next % self.consumers.len();
        self.next = self.next.wrapping_add(1);
        let _ = self.consumers[idx].tx.send(Ok(delivery));
    }
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, DeclaredExchange>,
    queues: HashMap<String, QueueState>,
    published: Vec<Delivery>,
    generated: u64,
    fail_binds: bool,
}

impl State {
    fn generate(&mut self, prefix: &str) -> String {
        self.generated += 1;
        format!("{}-{}", prefix, self.generated)
    }

    fn route(&mut self, delivery: Delivery) -> Result<(), AmqpError> {
        self.published.push(delivery.clone());

        if delivery.exchange.is_empty() {
            if let Some(queue) = self.queues.get_mut(&delivery.routing_key) {
                queue.push(delivery);
            }
            return Ok(());
        }

        if !self.exchanges.contains_key(&delivery.exchange) {
            return Err(AmqpError::PublishingError);
        }

        for queue in self.queues.values_mut() {
            let bound = queue.declared.bindings.iter().any(|(exchange, pattern)| {
                *exchange == delivery.exchange && topic_matches(pattern, &delivery.routing_key)
            });
            if bound {
                queue.push(delivery.clone());
            }
        }

        Ok(())
    }

    /// Drops matching consumers, deleting auto-delete queues left without any.
    fn remove_consumers(&mut self, remove: impl Fn(&ConsumerInfo) -> bool) {
        let mut emptied = Vec::new();

        for (name, queue) in self.queues.iter_mut() {
            let before = queue.consumers.len();
            queue.consumers.retain(|c| !remove(&c.info));
            if before > 0 && queue.consumers.is_empty() && queue.declared.options.auto_delete {
                emptied.push(name.clone());
            }
        }

        for name in emptied {
            self.queues.remove(&name);
        }
    }
}

/// AMQP topic matching: `*` matches exactly one word, `#` zero or more.
pub(crate) fn topic_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    words_match(&pattern, &key)
}

fn words_match(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| words_match(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&head, tail)) => (word == "*" || word == head) && words_match(rest, tail),
            None => false,
        },
    }
}

#[derive(Clone, Default)]
pub(crate) struct MemoryBroker {
    state: Arc<Mutex<State>>,
    channels: Arc<Mutex<Vec<Arc<MemoryChannel>>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryBroker {
    pub fn new() -> MemoryBroker {
        MemoryBroker::default()
    }

    /// A session on this broker. Every session shares the same broker state.
    pub fn connection(&self) -> Arc<dyn AmqpConnection> {
        Arc::new(MemoryConnection {
            broker: self.clone(),
        })
    }

    pub fn last_channel(&self) -> Option<Arc<MemoryChannel>> {
        self.channels.lock().unwrap().last().cloned()
    }

    pub fn channels_opened(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    pub fn exchange(&self, name: &str) -> Option<DeclaredExchange> {
        self.state.lock().unwrap().exchanges.get(name).cloned()
    }

    pub fn queue(&self, name: &str) -> Option<DeclaredQueue> {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(name)
            .map(|q| q.declared.clone())
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().unwrap().queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn bindings(&self, queue: &str) -> Vec<(String, String)> {
        self.queue(queue).map(|q| q.bindings).unwrap_or_default()
    }

    pub fn consumers(&self, queue: &str) -> Vec<ConsumerInfo> {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|q| q.consumers.iter().map(|c| c.info.clone()).collect())
            .unwrap_or_default()
    }

    /// Messages waiting in `queue` for a consumer.
    pub fn buffered(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|q| q.buffer.len())
            .unwrap_or_default()
    }

    /// Every message accepted by the broker, in publish order.
    pub fn published(&self) -> Vec<Delivery> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn fail_binds(&self, fail: bool) {
        self.state.lock().unwrap().fail_binds = fail;
    }

    /// Puts a raw body straight into `queue`, bypassing exchanges.
    pub fn deliver_raw(&self, queue: &str, data: Vec<u8>) {
        if let Some(q) = self.state.lock().unwrap().queues.get_mut(queue) {
            q.push(Delivery {
                routing_key: queue.to_owned(),
                data,
                ..Default::default()
            });
        }
    }

    /// Drops the session, closing every channel on it.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for channel in self.channels.lock().unwrap().iter() {
            channel.force_close();
        }
    }
}

struct MemoryConnection {
    broker: MemoryBroker,
}

#[async_trait]
impl AmqpConnection for MemoryConnection {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        if !self.is_open() {
            return Err(AmqpError::ChannelError);
        }

        let mut channels = self.broker.channels.lock().unwrap();
        let channel = Arc::new(MemoryChannel {
            id: channels.len() as u64 + 1,
            state: self.broker.state.clone(),
            open: AtomicBool::new(true),
            qos: Mutex::new(None),
        });
        channels.push(channel.clone());

        Ok(channel)
    }

    fn is_open(&self) -> bool {
        !self.broker.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.broker.shutdown();
        Ok(())
    }
}

pub(crate) struct MemoryChannel {
    id: u64,
    state: Arc<Mutex<State>>,
    open: AtomicBool,
    qos: Mutex<Option<(u16, bool)>>,
}

impl MemoryChannel {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The `(prefetch_count, global)` pair last applied.
    pub fn qos(&self) -> Option<(u16, bool)> {
        *self.qos.lock().unwrap()
    }

    /// Closes the channel as the broker would after a channel-level error. Consumers on it
    /// are dropped and their streams end.
    pub fn force_close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let id = self.id;
        self.state
            .lock()
            .unwrap()
            .remove_consumers(|c| c.channel == id);
    }

    fn ensure_open(&self) -> Result<(), AmqpError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AmqpError::ChannelError)
        }
    }
}

#[async_trait]
impl AmqpChannel for MemoryChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn basic_qos(
        &self,
        prefetch_count: u16,
        options: BasicQosOptions,
    ) -> Result<(), AmqpError> {
        self.ensure_open()?;
        *self.qos.lock().unwrap() = Some((prefetch_count, options.global));
        Ok(())
    }

    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), AmqpError> {
        self.ensure_open()?;
        self.state.lock().unwrap().exchanges.insert(
            name.to_owned(),
            DeclaredExchange {
                kind,
                options,
                arguments,
            },
        );
        Ok(())
    }

    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<QueueInfo, AmqpError> {
        self.ensure_open()?;
        let mut state = self.state.lock().unwrap();

        let name = if name.is_empty() {
            state.generate("amq.gen")
        } else {
            name.to_owned()
        };

        let mismatched = state.queues.get(&name).is_some_and(|q| {
            let declared = q.declared.options;
            declared.durable != options.durable
                || declared.exclusive != options.exclusive
                || declared.auto_delete != options.auto_delete
        });
        if mismatched {
            drop(state);
            // PRECONDITION_FAILED closes the channel
            self.force_close();
            return Err(AmqpError::DeclareQueueError(name));
        }

        let queue = state.queues.entry(name.clone()).or_insert_with(|| QueueState {
            declared: DeclaredQueue {
                options,
                arguments,
                bindings: Vec::new(),
            },
            buffer: VecDeque::new(),
            consumers: Vec::new(),
            next: 0,
        });

        Ok(QueueInfo {
            name,
            message_count: queue.buffer.len() as u32,
            consumer_count: queue.consumers.len() as u32,
        })
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        _options: QueueBindOptions,
        _arguments: FieldTable,
    ) -> Result<(), AmqpError> {
        self.ensure_open()?;
        let mut state = self.state.lock().unwrap();

        let failed = state.fail_binds || !state.exchanges.contains_key(exchange);
        match state.queues.get_mut(queue) {
            Some(q) if !failed => {
                let binding = (exchange.to_owned(), routing_key.to_owned());
                if !q.declared.bindings.contains(&binding) {
                    q.declared.bindings.push(binding);
                }
                Ok(())
            }
            _ => Err(AmqpError::BindingExchangeToQueueError(
                exchange.to_owned(),
                queue.to_owned(),
            )),
        }
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        _options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        self.ensure_open()?;
        self.state.lock().unwrap().route(Delivery {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            properties,
            data: payload.to_vec(),
        })
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
        _arguments: FieldTable,
    ) -> Result<DeliveryStream, AmqpError> {
        self.ensure_open()?;
        let mut state = self.state.lock().unwrap();

        let id = self.id;
        let duplicate = state.queues.values().any(|q| {
            q.consumers
                .iter()
                .any(|c| c.info.channel == id && c.info.tag == consumer_tag)
        });
        if duplicate || !state.queues.contains_key(queue) {
            return Err(AmqpError::BindingConsumerError(queue.to_owned()));
        }

        let tag = if consumer_tag.is_empty() {
            state.generate("amq.ctag")
        } else {
            consumer_tag.to_owned()
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(q) = state.queues.get_mut(queue) {
            while let Some(delivery) = q.buffer.pop_front() {
                let _ = tx.send(Ok(delivery));
            }
            q.consumers.push(Consumer {
                info: ConsumerInfo {
                    tag,
                    no_ack: options.no_ack,
                    channel: id,
                },
                tx,
            });
        }

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn basic_cancel(
        &self,
        consumer_tag: &str,
        _options: BasicCancelOptions,
    ) -> Result<(), AmqpError> {
        self.ensure_open()?;
        let id = self.id;
        self.state
            .lock()
            .unwrap()
            .remove_consumers(|c| c.channel == id && c.tag == consumer_tag);
        Ok(())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.force_close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_patterns() {
        assert!(topic_matches("orders.created", "orders.created"));
        assert!(topic_matches("orders.*", "orders.created"));
        assert!(!topic_matches("orders.*", "orders.created.eu"));
        assert!(topic_matches("orders.#", "orders"));
        assert!(topic_matches("orders.#", "orders.created.eu"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(!topic_matches("orders.created", "orders.deleted"));
    }

    #[tokio::test]
    async fn redeclaring_with_other_flags_closes_the_channel() {
        let broker = MemoryBroker::new();
        let channel = broker.connection().create_channel().await.unwrap();
        let durable = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };
        channel
            .queue_declare("events", durable, FieldTable::default())
            .await
            .unwrap();

        let same = channel
            .queue_declare("events", durable, FieldTable::default())
            .await;
        assert!(same.is_ok());
        assert!(channel.is_open());

        let other = QueueDeclareOptions {
            durable: true,
            exclusive: true,
            auto_delete: true,
            ..Default::default()
        };
        let result = channel
            .queue_declare("events", other, FieldTable::default())
            .await;

        assert_eq!(result, Err(AmqpError::DeclareQueueError("events".to_owned())));
        assert!(!channel.is_open());
        assert!(!broker.queue("events").unwrap().options.exclusive);
    }
}
