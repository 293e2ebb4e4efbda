// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! PUBLISH handling and the delivery engine.

use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;

use codec::v5::{Properties, Property};
use codec::{v3, v5, Packet, PacketId, ProtocolLevel, PublishOptions, QoS, TopicName};

use super::Broker;
use crate::error::{Error, ErrorKind};
use crate::session::OfflineMessage;
use crate::timer::TimerTarget;
use crate::trie::RetainedEntry;
use crate::types::{EndpointId, PublishMessage};

impl Broker {
    /// Process an incoming PUBLISH packet.
    ///
    /// A QoS 2 publish whose packet id is already being processed is
    /// answered with PUBREC again and not re-dispatched, making replayed
    /// publishes deliver exactly once.
    pub(super) fn publish_handler(
        &mut self,
        endpoint_id: EndpointId,
        packet_id: Option<PacketId>,
        options: PublishOptions,
        topic: Option<TopicName>,
        payload: Bytes,
        properties: Properties,
    ) -> Result<(), Error> {
        let Some(client_id) = self.sessions.client_id_by_endpoint(endpoint_id).cloned() else {
            return Err(Error::from_string(
                ErrorKind::ProtocolError,
                format!("broker: PUBLISH on {endpoint_id} without session"),
            ));
        };

        if options.qos() != QoS::AtMostOnce && packet_id.is_none() {
            return Err(Error::from_string(
                ErrorKind::ProtocolError,
                format!("broker: QoS > 0 PUBLISH without packet id on {endpoint_id}"),
            ));
        }

        let topic = self.resolve_topic_alias(endpoint_id, topic, &properties)?;

        if options.qos() == QoS::ExactOnce {
            let packet_id = packet_id.unwrap_or_default();
            let duplicate = self
                .sessions
                .find_by_client_id(&client_id)
                .is_some_and(|session| session.has_qos2_received(packet_id));
            if duplicate {
                log::info!(
                    "broker: Receive already processed publish pid: {packet_id} on {endpoint_id}"
                );
                self.send_pubrec(endpoint_id, packet_id)?;
                return Ok(());
            }
        }

        // Topic alias is never forwarded, and a subscription identifier can
        // only originate from a subscription, not from a publishing client.
        let mut forward_props = Properties::new();
        for property in properties {
            match property {
                Property::TopicAlias(_) => (),
                Property::SubscriptionIdentifier(sid) => {
                    log::warn!(
                        "broker: Subscription identifier from client not forwarded sid: {sid}"
                    );
                }
                property => forward_props.push(property),
            }
        }

        // The dup flag is not propagated to subscribers.
        let mut forward_options = options;
        forward_options.set_dup(false);
        self.do_publish(
            Some(endpoint_id),
            topic,
            payload,
            forward_options,
            forward_props,
        );

        match options.qos() {
            QoS::AtMostOnce => Ok(()),
            QoS::AtLeastOnce => self.send_puback(endpoint_id, packet_id.unwrap_or_default()),
            QoS::ExactOnce => {
                let packet_id = packet_id.unwrap_or_default();
                if let Some(session) = self.sessions.find_by_client_id_mut(&client_id) {
                    session.insert_qos2_received(packet_id);
                }
                self.send_pubrec(endpoint_id, packet_id)
            }
        }
    }

    /// Resolve the topic of a 5.0 publish through the endpoint's alias
    /// table: a known alias replaces an absent topic, a topic together with
    /// an alias registers the mapping.
    fn resolve_topic_alias(
        &mut self,
        endpoint_id: EndpointId,
        topic: Option<TopicName>,
        properties: &Properties,
    ) -> Result<TopicName, Error> {
        let alias = properties.topic_alias();
        if alias == Some(0) {
            return Err(Error::from_string(
                ErrorKind::ProtocolError,
                format!("broker: Topic alias 0 on {endpoint_id}"),
            ));
        }
        let endpoint = self
            .endpoints
            .get_mut(&endpoint_id)
            .ok_or_else(|| Error::endpoint_error(endpoint_id))?;
        match (topic, alias) {
            (Some(topic), Some(alias)) => {
                endpoint.topic_alias_recv().insert(alias, topic.clone());
                Ok(topic)
            }
            (Some(topic), None) => Ok(topic),
            (None, Some(alias)) => endpoint
                .topic_alias_recv()
                .resolve(alias)
                .cloned()
                .ok_or_else(|| {
                    Error::from_string(
                        ErrorKind::ProtocolError,
                        format!("broker: Unknown topic alias {alias} on {endpoint_id}"),
                    )
                }),
            (None, None) => Err(Error::from_string(
                ErrorKind::ProtocolError,
                format!("broker: PUBLISH without topic or alias on {endpoint_id}"),
            )),
        }
    }

    /// Publish a message to every matching subscription and process the
    /// retain flag.
    ///
    /// Each delivery gets the effective QoS `min(publish, subscription)`;
    /// the retain flag survives only for retain-as-published subscriptions;
    /// subscription identifiers are attached per delivery without touching
    /// the caller's property list.
    pub(super) fn do_publish(
        &mut self,
        origin: Option<EndpointId>,
        topic: TopicName,
        payload: Bytes,
        options: PublishOptions,
        properties: Properties,
    ) {
        let mut matches: Vec<(String, codec::v5::SubscribeOptions, Option<u32>)> = Vec::new();
        self.subs_map.for_each_match(&topic, |_filter, subscription| {
            matches.push((
                subscription.client_id().to_string(),
                subscription.options(),
                subscription.sid(),
            ));
        });

        for (subscriber, subopts, sid) in matches {
            // No-local: skip the connection the message came in on.
            if subopts.no_local() {
                let subscriber_endpoint = self
                    .sessions
                    .find_by_client_id(&subscriber)
                    .and_then(|session| session.endpoint_id());
                if origin.is_some() && origin == subscriber_endpoint {
                    continue;
                }
            }

            let mut delivery_options = options.min_qos(subopts.qos());
            delivery_options.set_retain(subopts.retain_as_published() && options.retain());

            let mut delivery_props = properties.clone();
            if let Some(sid) = sid {
                delivery_props.push(Property::SubscriptionIdentifier(sid));
            }

            self.deliver(
                &subscriber,
                PublishMessage::new(
                    topic.clone(),
                    payload.clone(),
                    delivery_options,
                    delivery_props,
                ),
            );
        }

        if options.retain() {
            if payload.is_empty() {
                // A zero-length retained payload erases the entry and is
                // not stored itself.
                self.retains.erase(&topic);
            } else {
                let expiry_at = properties
                    .message_expiry_interval()
                    .map(|secs| Instant::now() + Duration::from_secs(secs.into()));
                let generation = self.retains.insert_or_assign(RetainedEntry {
                    topic: topic.clone(),
                    payload,
                    properties,
                    qos: options.qos(),
                    expiry_at,
                    generation: 0,
                });
                if let Some(expiry_at) = expiry_at {
                    self.timers
                        .schedule(expiry_at, TimerTarget::RetainExpiry { topic, generation });
                }
            }
        }
    }

    /// Hand one message to a subscriber session: straight to the endpoint
    /// when online, into the offline queue otherwise.
    fn deliver(&mut self, client_id: &str, message: PublishMessage) {
        let Some(session) = self.sessions.find_by_client_id_mut(client_id) else {
            // The subscription outlived its session; invariant violation
            // worth shouting about, but one subscriber never aborts the
            // fan-out.
            log::error!("broker: Subscription without session for {client_id}");
            return;
        };

        if let Some(endpoint_id) = session.endpoint_id() {
            if let Some(endpoint) = self.endpoints.get_mut(&endpoint_id) {
                if let Err(err) = endpoint.publish_message(&message) {
                    match err.kind() {
                        ErrorKind::PacketIdExhausted => log::warn!("broker: {err}"),
                        _ => log::error!("broker: Failed to deliver to {client_id}: {err}"),
                    }
                }
            }
        } else {
            let expiry_at = message
                .properties
                .message_expiry_interval()
                .map(|secs| Instant::now() + Duration::from_secs(secs.into()));
            let seq = session.next_message_seq();
            session.push_offline_message(OfflineMessage {
                seq,
                message,
                expiry_at,
            });
            if let Some(expiry_at) = expiry_at {
                self.timers.schedule(
                    expiry_at,
                    TimerTarget::OfflineExpiry {
                        client_id: client_id.to_string(),
                        seq,
                    },
                );
            }
        }
    }

    pub(super) fn send_puback(
        &mut self,
        endpoint_id: EndpointId,
        packet_id: PacketId,
    ) -> Result<(), Error> {
        let endpoint = self
            .endpoints
            .get(&endpoint_id)
            .ok_or_else(|| Error::endpoint_error(endpoint_id))?;
        let packet = match endpoint.protocol() {
            Some(ProtocolLevel::V5) => {
                Packet::V5(v5::Packet::PublishAck(v5::PublishAckPacket::with_reason(
                    packet_id,
                    v5::ReasonCode::Success,
                    self.puback_props.clone(),
                )))
            }
            _ => Packet::V3(v3::Packet::PublishAck(v3::PublishAckPacket::new(packet_id))),
        };
        endpoint.send(packet)
    }

    pub(super) fn send_pubrec(
        &mut self,
        endpoint_id: EndpointId,
        packet_id: PacketId,
    ) -> Result<(), Error> {
        let endpoint = self
            .endpoints
            .get(&endpoint_id)
            .ok_or_else(|| Error::endpoint_error(endpoint_id))?;
        let packet = match endpoint.protocol() {
            Some(ProtocolLevel::V5) => Packet::V5(v5::Packet::PublishReceived(
                v5::PublishReceivedPacket::with_reason(
                    packet_id,
                    v5::ReasonCode::Success,
                    self.pubrec_props.clone(),
                ),
            )),
            _ => Packet::V3(v3::Packet::PublishReceived(v3::PublishReceivedPacket::new(
                packet_id,
            ))),
        };
        endpoint.send(packet)
    }
}
