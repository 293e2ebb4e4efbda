// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! In-memory broker harness for integration tests.
//!
//! Tests drive the broker the same way a transport would: decoded packets
//! in through the command channel, outbound packets out of per-endpoint
//! pipes.

#![allow(dead_code)]

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, Sender, UnboundedReceiver};

use codec::v5::Properties;
use codec::{v3, v5, Packet, PacketId, QoS};
use tianhe::broker::Broker;
use tianhe::commands::EndpointToBrokerCmd;
use tianhe::config::BrokerConfig;
use tianhe::types::EndpointId;

static NEXT_ENDPOINT_ID: AtomicU64 = AtomicU64::new(1);

pub struct TestBroker {
    sender: Sender<EndpointToBrokerCmd>,
}

impl TestBroker {
    /// Spawn a broker task with default config.
    pub fn start() -> Self {
        Self::start_with(|_broker| {})
    }

    /// Spawn a broker task, letting the test configure it first.
    pub fn start_with<F>(configure: F) -> Self
    where
        F: FnOnce(&mut Broker),
    {
        let _ = env_logger::builder().is_test(true).try_init();
        let (sender, receiver) = mpsc::channel(64);
        let mut broker = Broker::new(BrokerConfig::default(), receiver);
        configure(&mut broker);
        tokio::spawn(async move {
            broker.run_loop().await;
        });
        Self { sender }
    }

    /// Register a new endpoint with the broker, as an accepted transport
    /// connection.
    pub async fn accept(&self) -> TestClient {
        let id = NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed);
        let (out_sender, out_receiver) = mpsc::unbounded_channel();
        self.sender
            .send(EndpointToBrokerCmd::Accept(id, out_sender))
            .await
            .expect("broker gone");
        TestClient {
            id,
            sender: self.sender.clone(),
            receiver: out_receiver,
        }
    }
}

pub struct TestClient {
    pub id: EndpointId,
    sender: Sender<EndpointToBrokerCmd>,
    receiver: UnboundedReceiver<Packet>,
}

impl TestClient {
    pub async fn send(&self, packet: impl Into<Packet>) {
        self.sender
            .send(EndpointToBrokerCmd::Packet(self.id, packet.into()))
            .await
            .expect("broker gone");
    }

    /// Close the transport abruptly, as a network failure would.
    pub async fn close(&self) {
        self.sender
            .send(EndpointToBrokerCmd::Close(self.id))
            .await
            .expect("broker gone");
    }

    pub async fn set_auto_response(&self, auto_response: bool) {
        self.sender
            .send(EndpointToBrokerCmd::SetAutoResponse(self.id, auto_response))
            .await
            .expect("broker gone");
    }

    /// Next outbound packet from the broker.
    pub async fn recv(&mut self) -> Packet {
        self.receiver.recv().await.expect("endpoint pipe closed")
    }

    /// Assert the broker sends nothing more to this endpoint for a while.
    pub async fn expect_silence(&mut self) {
        let got = tokio::time::timeout(Duration::from_millis(200), self.receiver.recv()).await;
        assert!(got.is_err(), "unexpected packet: {got:?}");
    }

    /// Assert the broker dropped this endpoint.
    pub async fn expect_closed(&mut self) {
        loop {
            match tokio::time::timeout(Duration::from_secs(2), self.receiver.recv()).await {
                Ok(Some(_)) => (),
                Ok(None) => return,
                Err(_) => panic!("endpoint pipe still open"),
            }
        }
    }

    pub async fn expect_v3_connack(&mut self) -> v3::ConnectAckPacket {
        match self.recv().await {
            Packet::V3(v3::Packet::ConnectAck(packet)) => packet,
            other => panic!("expected v3 connack, got {other:?}"),
        }
    }

    pub async fn expect_v5_connack(&mut self) -> v5::ConnectAckPacket {
        match self.recv().await {
            Packet::V5(v5::Packet::ConnectAck(packet)) => packet,
            other => panic!("expected v5 connack, got {other:?}"),
        }
    }

    pub async fn expect_v3_suback(&mut self) -> v3::SubscribeAckPacket {
        match self.recv().await {
            Packet::V3(v3::Packet::SubscribeAck(packet)) => packet,
            other => panic!("expected v3 suback, got {other:?}"),
        }
    }

    pub async fn expect_v5_suback(&mut self) -> v5::SubscribeAckPacket {
        match self.recv().await {
            Packet::V5(v5::Packet::SubscribeAck(packet)) => packet,
            other => panic!("expected v5 suback, got {other:?}"),
        }
    }

    pub async fn expect_v3_publish(&mut self) -> v3::PublishPacket {
        match self.recv().await {
            Packet::V3(v3::Packet::Publish(packet)) => packet,
            other => panic!("expected v3 publish, got {other:?}"),
        }
    }

    pub async fn expect_v5_publish(&mut self) -> v5::PublishPacket {
        match self.recv().await {
            Packet::V5(v5::Packet::Publish(packet)) => packet,
            other => panic!("expected v5 publish, got {other:?}"),
        }
    }

    /// Connect with 3.1.1 and assert the CONNACK, returning session-present.
    pub async fn connect_v3(&mut self, client_id: &str, clean_session: bool) -> bool {
        self.send(v3_connect(client_id, clean_session)).await;
        let connack = self.expect_v3_connack().await;
        assert_eq!(connack.return_code(), v3::ConnectReturnCode::Accepted);
        connack.session_present()
    }

    /// Connect with 5.0 and assert the CONNACK, returning session-present.
    pub async fn connect_v5(&mut self, client_id: &str, clean_start: bool) -> bool {
        self.send(v5_connect(client_id, clean_start, Properties::new()))
            .await;
        let connack = self.expect_v5_connack().await;
        assert_eq!(connack.reason_code(), v5::ReasonCode::Success);
        connack.session_present()
    }
}

pub fn v3_connect(client_id: &str, clean_session: bool) -> Packet {
    let mut packet = v3::ConnectPacket::new(client_id).unwrap();
    packet.set_clean_session(clean_session);
    Packet::V3(v3::Packet::Connect(packet))
}

pub fn v5_connect(client_id: &str, clean_start: bool, properties: Properties) -> Packet {
    let mut packet = v5::ConnectPacket::new(client_id).unwrap();
    packet.set_clean_start(clean_start);
    *packet.properties_mut() = properties;
    Packet::V5(v5::Packet::Connect(packet))
}

pub fn v3_publish(topic: &str, qos: QoS, payload: &'static [u8]) -> v3::PublishPacket {
    v3::PublishPacket::new(topic, qos, Bytes::from_static(payload)).unwrap()
}

pub fn v5_publish(topic: &str, qos: QoS, payload: &'static [u8]) -> v5::PublishPacket {
    v5::PublishPacket::new(topic, qos, Bytes::from_static(payload)).unwrap()
}

pub fn v3_subscribe(packet_id: PacketId, filter: &str, qos: QoS) -> Packet {
    let topics = vec![v3::SubscribeTopic::new(filter, qos).unwrap()];
    Packet::V3(v3::Packet::Subscribe(v3::SubscribePacket::new(
        packet_id, topics,
    )))
}

pub fn v5_subscribe(packet_id: PacketId, topics: Vec<v5::SubscribeTopic>) -> Packet {
    Packet::V5(v5::Packet::Subscribe(v5::SubscribePacket::new(
        packet_id, topics,
    )))
}
