// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod consumer;
mod otel;
#[cfg(test)]
mod testing;

pub mod bus;
pub mod channel;
pub mod configs;
pub mod connection;
pub mod errors;
pub mod event;
pub mod exchange;
pub mod handlers;
pub mod proto;
pub mod publisher;
pub mod queue;
pub mod router;
pub mod service;
pub mod typed;

pub use consumer::{ConsumerHandle, EventReceiver};
