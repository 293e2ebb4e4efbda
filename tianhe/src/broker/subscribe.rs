// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! SUBSCRIBE and UNSUBSCRIBE handling.

use tokio::time::Instant;

use codec::v5::{Property, RetainHandling, SubscribeOptions};
use codec::{v3, v5, Packet, PacketId, ProtocolLevel, PublishOptions, QoS, TopicFilter};

use super::Broker;
use crate::error::{Error, ErrorKind};
use crate::trie::{RetainedEntry, Subscription};
use crate::types::{EndpointId, PublishMessage};

/// One retained message queued for delivery after the SUBACK.
struct RetainDelivery {
    entry: RetainedEntry,
    granted_qos: QoS,
    sid: Option<u32>,
}

impl Broker {
    /// Process a SUBSCRIBE packet.
    ///
    /// Each filter is inserted into the subscription map or updated in
    /// place; the granted QoS is the requested QoS. Matching retained
    /// messages are delivered after the SUBACK according to the
    /// retain-handling option: always on a new subscription, only for
    /// `Send` on an update, never for `NotSend`.
    pub(super) fn subscribe_handler(
        &mut self,
        endpoint_id: EndpointId,
        packet_id: PacketId,
        entries: Vec<(TopicFilter, SubscribeOptions)>,
        sid: Option<u32>,
    ) -> Result<(), Error> {
        let Some(client_id) = self.sessions.client_id_by_endpoint(endpoint_id).cloned() else {
            return Err(Error::from_string(
                ErrorKind::ProtocolError,
                format!("broker: SUBSCRIBE on {endpoint_id} without session"),
            ));
        };

        let mut retain_deliver: Vec<RetainDelivery> = Vec::new();

        for (filter, options) in &entries {
            let subscription = Subscription::new(&client_id, *options, sid);
            let (handle, inserted) =
                self.subs_map
                    .insert_or_assign(filter, &client_id, subscription);
            if let Some(session) = self.sessions.find_by_client_id_mut(&client_id) {
                session.insert_handle(handle);
            }
            log::trace!(
                "broker: {} subscription filter: {filter} qos: {:?} for {client_id}",
                if inserted { "insert" } else { "update" },
                options.qos()
            );

            let queue_retained = match options.retain_handling() {
                RetainHandling::Send => true,
                RetainHandling::SendOnlyNew => inserted,
                RetainHandling::NotSend => false,
            };
            if queue_retained {
                self.retains.for_each_match(filter, |entry| {
                    retain_deliver.push(RetainDelivery {
                        entry: entry.clone(),
                        granted_qos: options.qos(),
                        sid,
                    });
                });
            }
        }

        self.send_suback(endpoint_id, packet_id, &entries)?;

        // Retained messages go out only after the SUBACK.
        self.deliver_retained(endpoint_id, retain_deliver);
        Ok(())
    }

    fn send_suback(
        &mut self,
        endpoint_id: EndpointId,
        packet_id: PacketId,
        entries: &[(TopicFilter, SubscribeOptions)],
    ) -> Result<(), Error> {
        let endpoint = self
            .endpoints
            .get(&endpoint_id)
            .ok_or_else(|| Error::endpoint_error(endpoint_id))?;
        let packet = match endpoint.protocol() {
            Some(ProtocolLevel::V5) => {
                let reasons = entries
                    .iter()
                    .map(|(_, options)| v5::qos_to_reason_code(options.qos()))
                    .collect();
                let mut suback = v5::SubscribeAckPacket::new(packet_id, reasons);
                suback.set_properties(self.suback_props.clone());
                Packet::V5(v5::Packet::SubscribeAck(suback))
            }
            _ => {
                let acks = entries
                    .iter()
                    .map(|(_, options)| v3::SubscribeAck::QoS(options.qos()))
                    .collect();
                Packet::V3(v3::Packet::SubscribeAck(v3::SubscribeAckPacket::new(
                    packet_id, acks,
                )))
            }
        };
        endpoint.send(packet)
    }

    /// Send queued retained messages through the endpoint with the
    /// per-subscription QoS downgrade, the retain flag set, the remaining
    /// message expiry, and the subscription identifier when present.
    fn deliver_retained(&mut self, endpoint_id: EndpointId, deliveries: Vec<RetainDelivery>) {
        if deliveries.is_empty() {
            return;
        }
        let now = Instant::now();
        let Some(endpoint) = self.endpoints.get_mut(&endpoint_id) else {
            return;
        };
        for delivery in deliveries {
            let mut properties = delivery.entry.properties.clone();
            if let Some(sid) = delivery.sid {
                properties.push(Property::SubscriptionIdentifier(sid));
            }
            if let Some(expiry_at) = delivery.entry.expiry_at {
                let remaining = expiry_at.saturating_duration_since(now).as_secs();
                properties
                    .update_message_expiry_interval(u32::try_from(remaining).unwrap_or(u32::MAX));
            }
            let mut options =
                PublishOptions::new(delivery.entry.qos.min(delivery.granted_qos), true);
            options.set_dup(false);
            let message = PublishMessage::new(
                delivery.entry.topic.clone(),
                delivery.entry.payload.clone(),
                options,
                properties,
            );
            if let Err(err) = endpoint.publish_message(&message) {
                match err.kind() {
                    ErrorKind::PacketIdExhausted => log::warn!("broker: {err}"),
                    _ => {
                        log::error!("broker: Failed to deliver retained message: {err}");
                        return;
                    }
                }
            }
        }
    }

    /// Process an UNSUBSCRIBE packet.
    ///
    /// Filters are matched exactly against the handles the session holds.
    /// The 5.0 UNSUBACK reports success for every filter, present or not.
    pub(super) fn unsubscribe_handler(
        &mut self,
        endpoint_id: EndpointId,
        packet_id: PacketId,
        filters: Vec<TopicFilter>,
    ) -> Result<(), Error> {
        let Some(client_id) = self.sessions.client_id_by_endpoint(endpoint_id).cloned() else {
            return Err(Error::from_string(
                ErrorKind::ProtocolError,
                format!("broker: UNSUBSCRIBE on {endpoint_id} without session"),
            ));
        };

        for filter in &filters {
            if let Some(handle) = self.subs_map.lookup(filter) {
                let held = self
                    .sessions
                    .find_by_client_id_mut(&client_id)
                    .is_some_and(|session| session.remove_handle(handle));
                if held {
                    self.subs_map.erase(handle, &client_id);
                }
            }
        }

        let endpoint = self
            .endpoints
            .get(&endpoint_id)
            .ok_or_else(|| Error::endpoint_error(endpoint_id))?;
        let packet = match endpoint.protocol() {
            Some(ProtocolLevel::V5) => {
                let reasons = vec![v5::ReasonCode::Success; filters.len()];
                let mut unsuback = v5::UnsubscribeAckPacket::new(packet_id, reasons);
                unsuback.set_properties(self.unsuback_props.clone());
                Packet::V5(v5::Packet::UnsubscribeAck(unsuback))
            }
            _ => Packet::V3(v3::Packet::UnsubscribeAck(v3::UnsubscribeAckPacket::new(
                packet_id,
            ))),
        };
        endpoint.send(packet)
    }
}
