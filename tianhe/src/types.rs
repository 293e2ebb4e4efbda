// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use bytes::Bytes;
use std::time::Duration;

use codec::v5::Properties;
use codec::{PublishOptions, TopicName};

/// Identity of one accepted transport connection.
///
/// Assigned by the transport layer; opaque to the broker. Never reused for
/// the lifetime of the process.
pub type EndpointId = u64;

/// Client identifier from the CONNECT packet, the key of session state.
pub type ClientId = String;

/// Session expiry sentinel: `0xFFFF_FFFF` seconds means the session never
/// expires while offline.
pub const SESSION_NEVER_EXPIRE: Duration = Duration::from_secs(u32::MAX as u64);

/// An application message as routed by the broker.
///
/// Topic and payload are cheaply cloneable; one publish fans out to many
/// subscribers without copying the payload bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct PublishMessage {
    pub topic: TopicName,
    pub payload: Bytes,
    pub options: PublishOptions,
    pub properties: Properties,
}

impl PublishMessage {
    #[must_use]
    pub fn new(
        topic: TopicName,
        payload: Bytes,
        options: PublishOptions,
        properties: Properties,
    ) -> Self {
        Self {
            topic,
            payload,
            options,
            properties,
        }
    }
}
