// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Trace context crosses the broker inside AMQP message headers: publishers inject the
//! caller's context, and the consumption loop extracts it to parent a consumer span for
//! every delivery it decodes.

use crate::channel::Delivery;
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::{borrow::Cow, collections::BTreeMap};
use tracing::warn;

/// Tracer name used for consumer spans.
pub(crate) const CONSUMER_TRACER: &str = "amqp consumer";

/// Adapter between OpenTelemetry propagators and an AMQP header table.
pub(crate) struct HeaderCarrier<'a> {
    headers: &'a mut BTreeMap<ShortString, AMQPValue>,
}

impl<'a> HeaderCarrier<'a> {
    pub(crate) fn new(headers: &'a mut BTreeMap<ShortString, AMQPValue>) -> Self {
        Self { headers }
    }
}

impl Injector for HeaderCarrier<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers
            .insert(ShortString::from(key.to_lowercase()), AMQPValue::LongString(LongString::from(value)));
    }
}

impl Extractor for HeaderCarrier<'_> {
    /// Only long-string headers can hold propagated values; anything else reads as absent.
    fn get(&self, key: &str) -> Option<&str> {
        match self.headers.get(key) {
            Some(AMQPValue::LongString(value)) => std::str::from_utf8(value.as_bytes())
                .map_err(|err| warn!(header = key, error = err.to_string(), "header is not utf-8"))
                .ok(),
            _ => None,
        }
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(ShortString::as_str).collect()
    }
}

/// Returns a header table carrying `ctx` through the global text-map propagator.
pub(crate) fn inject(ctx: &Context) -> BTreeMap<ShortString, AMQPValue> {
    let mut headers = BTreeMap::<ShortString, AMQPValue>::default();

    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut HeaderCarrier::new(&mut headers))
    });

    headers
}

/// Starts a consumer span for `delivery`, parented on the context found in its headers.
///
/// # Parameters
/// * `delivery` - The delivery being processed
/// * `tracer` - OpenTelemetry tracer
/// * `name` - Span name, typically the queue or routing key
///
/// # Returns
/// A tuple containing the extracted context and the new span
pub(crate) fn new_span(delivery: &Delivery, tracer: &BoxedTracer, name: &str) -> (Context, BoxedSpan) {
    let mut headers = delivery
        .properties
        .headers()
        .clone()
        .unwrap_or_else(FieldTable::default)
        .inner()
        .clone();

    let ctx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderCarrier::new(&mut headers))
    });

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}
