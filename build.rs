// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use tonic_build::manual::{Builder, Method, Service};

const PROST_CODEC: &str = "tonic::codec::ProstCodec";

fn main() {
    let events = Service::builder()
        .name("EventsService")
        .package("events")
        .method(
            Method::builder()
                .name("publish")
                .route_name("Publish")
                .input_type("crate::event::Event")
                .output_type("crate::event::Response")
                .codec_path(PROST_CODEC)
                .build(),
        )
        .method(
            Method::builder()
                .name("consume")
                .route_name("Consume")
                .input_type("crate::event::ConsumeRequest")
                .output_type("crate::event::Event")
                .codec_path(PROST_CODEC)
                .server_streaming()
                .build(),
        )
        .build();

    Builder::new().compile(&[events]);
}
