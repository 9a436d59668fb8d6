// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Server and client for the `events.EventsService` gRPC service, generated at build
//! time over the message types in [`crate::event`].

include!(concat!(env!("OUT_DIR"), "/events.EventsService.rs"));
