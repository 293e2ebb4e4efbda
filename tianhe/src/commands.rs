// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use tokio::sync::mpsc::UnboundedSender;

use codec::Packet;

use crate::types::EndpointId;

/// Commands sent from the transport layer into the broker loop.
///
/// The transport owns packet framing; the broker only ever sees decoded
/// packet values. Packets sent on one endpoint are delivered in receive
/// order.
#[derive(Debug)]
pub enum EndpointToBrokerCmd {
    /// A transport connection completed its underlying handshake.
    ///
    /// The sender is the endpoint's outbound pipe; the broker pushes every
    /// packet addressed to this client into it.
    Accept(EndpointId, UnboundedSender<Packet>),

    /// A decoded control packet arrived on an endpoint.
    Packet(EndpointId, Packet),

    /// The transport connection closed or failed.
    Close(EndpointId),

    /// Toggle automatic QoS 2 responses on an endpoint, for tests.
    SetAutoResponse(EndpointId, bool),
}
