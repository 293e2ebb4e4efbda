// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Sender and receiver side QoS 1/2 acknowledgement state machines.
//!
//! Sender side, per outbound exchange:
//! `SENT_PUBLISH -(PUBACK)-> DONE` for QoS 1,
//! `SENT_PUBLISH -(PUBREC)-> SENT_PUBREL -(PUBCOMP)-> DONE` for QoS 2.
//! Receiver side: a QoS 2 publish stays in the session's received set from
//! PUBREC until its PUBREL is answered with PUBCOMP.

use codec::{v3, v5, Packet, PacketId, ProtocolLevel};

use super::Broker;
use crate::error::Error;
use crate::types::EndpointId;

impl Broker {
    /// PUBACK finishes a QoS 1 exchange: drop the stored publish and free
    /// the packet id.
    pub(super) fn puback_handler(
        &mut self,
        endpoint_id: EndpointId,
        packet_id: PacketId,
    ) -> Result<(), Error> {
        let endpoint = self
            .endpoints
            .get_mut(&endpoint_id)
            .ok_or_else(|| Error::endpoint_error(endpoint_id))?;
        if !endpoint.ack_publish(packet_id) {
            log::warn!("broker: PUBACK for unknown pid: {packet_id} on {endpoint_id}");
        }
        Ok(())
    }

    /// PUBREC moves a QoS 2 exchange to its second half: the stored publish
    /// becomes a stored PUBREL, which is sent unless auto response is off.
    pub(super) fn pubrec_handler(
        &mut self,
        endpoint_id: EndpointId,
        packet_id: PacketId,
    ) -> Result<(), Error> {
        let endpoint = self
            .endpoints
            .get_mut(&endpoint_id)
            .ok_or_else(|| Error::endpoint_error(endpoint_id))?;
        if !endpoint.publish_released(packet_id) {
            log::warn!("broker: PUBREC for unknown pid: {packet_id} on {endpoint_id}");
            return Ok(());
        }
        if endpoint.auto_response() {
            endpoint.send_release(packet_id, self.pubrel_props.clone())?;
        }
        Ok(())
    }

    /// PUBREL completes the receiver side exchange: forget the packet id
    /// and answer PUBCOMP unless auto response is off.
    pub(super) fn pubrel_handler(
        &mut self,
        endpoint_id: EndpointId,
        packet_id: PacketId,
    ) -> Result<(), Error> {
        let client_id = self.sessions.client_id_by_endpoint(endpoint_id).cloned();
        if let Some(client_id) = client_id {
            if let Some(session) = self.sessions.find_by_client_id_mut(&client_id) {
                if !session.remove_qos2_received(packet_id) {
                    log::warn!("broker: PUBREL for unknown pid: {packet_id} on {endpoint_id}");
                }
            }
        }

        let endpoint = self
            .endpoints
            .get(&endpoint_id)
            .ok_or_else(|| Error::endpoint_error(endpoint_id))?;
        if !endpoint.auto_response() {
            return Ok(());
        }
        let packet = match endpoint.protocol() {
            Some(ProtocolLevel::V5) => Packet::V5(v5::Packet::PublishComplete(
                v5::PublishCompletePacket::with_reason(
                    packet_id,
                    v5::ReasonCode::Success,
                    self.pubcomp_props.clone(),
                ),
            )),
            _ => Packet::V3(v3::Packet::PublishComplete(v3::PublishCompletePacket::new(
                packet_id,
            ))),
        };
        endpoint.send(packet)
    }

    /// PUBCOMP finishes a QoS 2 exchange on the sender side: drop the
    /// stored PUBREL and free the packet id.
    pub(super) fn pubcomp_handler(
        &mut self,
        endpoint_id: EndpointId,
        packet_id: PacketId,
    ) -> Result<(), Error> {
        let endpoint = self
            .endpoints
            .get_mut(&endpoint_id)
            .ok_or_else(|| Error::endpoint_error(endpoint_id))?;
        if !endpoint.ack_release(packet_id) {
            log::warn!("broker: PUBCOMP for unknown pid: {packet_id} on {endpoint_id}");
        }
        Ok(())
    }
}
