// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Last will dispatch: abrupt close, graceful disconnect, delay, expiry.

use bytes::Bytes;
use std::time::Duration;

use codec::v5::{Properties, Property};
use codec::{v3, v5, Packet, QoS, TopicName, Will};

mod common;
use common::{v3_subscribe, TestBroker};

fn will(payload: &'static [u8], qos: QoS) -> Will {
    Will::new(
        TopicName::new("topic1").unwrap(),
        Bytes::from_static(payload),
        qos,
        false,
    )
}

fn v3_connect_with_will(client_id: &str, will: Will) -> Packet {
    let mut connect = v3::ConnectPacket::new(client_id).unwrap();
    connect.set_clean_session(true);
    connect.set_will(Some(will));
    Packet::V3(v3::Packet::Connect(connect))
}

fn v5_connect_with_will(client_id: &str, will: Will, properties: Properties) -> Packet {
    let mut connect = v5::ConnectPacket::new(client_id).unwrap();
    connect.set_clean_start(true);
    connect.set_will(Some(will));
    *connect.properties_mut() = properties;
    Packet::V5(v5::Packet::Connect(connect))
}

#[tokio::test(start_paused = true)]
async fn test_will_on_abrupt_close() {
    let broker = TestBroker::start();

    let mut client = broker.accept().await;
    client
        .send(v3_connect_with_will(
            "client-a",
            will(b"will_contents", QoS::AtLeastOnce),
        ))
        .await;
    client.expect_v3_connack().await;

    let mut subscriber = broker.accept().await;
    subscriber.connect_v3("client-b", true).await;
    subscriber
        .send(v3_subscribe(1, "topic1", QoS::AtLeastOnce))
        .await;
    subscriber.expect_v3_suback().await;

    client.close().await;

    let delivered = subscriber.expect_v3_publish().await;
    assert_eq!(delivered.payload().as_ref(), b"will_contents");
    assert_eq!(delivered.qos(), QoS::AtLeastOnce);
    assert!(!delivered.retain());
    assert_ne!(delivered.packet_id().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_will_on_graceful_disconnect() {
    let broker = TestBroker::start();

    let mut client = broker.accept().await;
    client
        .send(v3_connect_with_will("client-a", will(b"w", QoS::AtMostOnce)))
        .await;
    client.expect_v3_connack().await;

    let mut subscriber = broker.accept().await;
    subscriber.connect_v3("client-b", true).await;
    subscriber
        .send(v3_subscribe(1, "topic1", QoS::AtMostOnce))
        .await;
    subscriber.expect_v3_suback().await;

    client
        .send(Packet::V3(v3::Packet::Disconnect(
            v3::DisconnectPacket::new(),
        )))
        .await;
    subscriber.expect_silence().await;
}

#[tokio::test(start_paused = true)]
async fn test_will_delay_fires_while_offline() {
    let broker = TestBroker::start();

    let mut client = broker.accept().await;
    let mut delayed_will = will(b"late", QoS::AtMostOnce);
    delayed_will
        .properties_mut()
        .push(Property::WillDelayInterval(5));
    let props = Properties::from(vec![Property::SessionExpiryInterval(100)]);
    client
        .send(v5_connect_with_will("client-a", delayed_will, props))
        .await;
    client.expect_v5_connack().await;

    let mut subscriber = broker.accept().await;
    subscriber.connect_v3("client-b", true).await;
    subscriber
        .send(v3_subscribe(1, "topic1", QoS::AtMostOnce))
        .await;
    subscriber.expect_v3_suback().await;

    client.close().await;
    // Nothing until the delay elapses.
    subscriber.expect_silence().await;

    tokio::time::sleep(Duration::from_secs(6)).await;
    let delivered = subscriber.expect_v3_publish().await;
    assert_eq!(delivered.payload().as_ref(), b"late");
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_cancels_delayed_will() {
    let broker = TestBroker::start();

    let mut client = broker.accept().await;
    let mut delayed_will = will(b"late", QoS::AtMostOnce);
    delayed_will
        .properties_mut()
        .push(Property::WillDelayInterval(5));
    let props = Properties::from(vec![Property::SessionExpiryInterval(100)]);
    client
        .send(v5_connect_with_will("client-a", delayed_will, props))
        .await;
    client.expect_v5_connack().await;

    let mut subscriber = broker.accept().await;
    subscriber.connect_v3("client-b", true).await;
    subscriber
        .send(v3_subscribe(1, "topic1", QoS::AtMostOnce))
        .await;
    subscriber.expect_v3_suback().await;

    client.close().await;

    // Reconnect before the delay elapses: no will.
    let mut again = broker.accept().await;
    assert!(again.connect_v5("client-a", false).await);
    tokio::time::sleep(Duration::from_secs(10)).await;
    subscriber.expect_silence().await;
}

#[tokio::test(start_paused = true)]
async fn test_session_expiry_publishes_pending_will() {
    let broker = TestBroker::start();

    let mut client = broker.accept().await;
    let mut delayed_will = will(b"at-end", QoS::AtMostOnce);
    delayed_will
        .properties_mut()
        .push(Property::WillDelayInterval(60));
    let props = Properties::from(vec![Property::SessionExpiryInterval(5)]);
    client
        .send(v5_connect_with_will("client-a", delayed_will, props))
        .await;
    client.expect_v5_connack().await;

    let mut subscriber = broker.accept().await;
    subscriber.connect_v3("client-b", true).await;
    subscriber
        .send(v3_subscribe(1, "topic1", QoS::AtMostOnce))
        .await;
    subscriber.expect_v3_suback().await;

    client.close().await;

    // The session expires before the will delay; the will goes out at
    // session end.
    tokio::time::sleep(Duration::from_secs(6)).await;
    let delivered = subscriber.expect_v3_publish().await;
    assert_eq!(delivered.payload().as_ref(), b"at-end");
}

#[tokio::test(start_paused = true)]
async fn test_will_message_expiry_drops_unsent_will() {
    let broker = TestBroker::start();

    let mut client = broker.accept().await;
    let mut expiring_will = will(b"gone", QoS::AtMostOnce);
    expiring_will
        .properties_mut()
        .push(Property::MessageExpiryInterval(2));
    expiring_will
        .properties_mut()
        .push(Property::WillDelayInterval(30));
    let props = Properties::from(vec![Property::SessionExpiryInterval(100)]);
    client
        .send(v5_connect_with_will("client-a", expiring_will, props))
        .await;
    client.expect_v5_connack().await;

    let mut subscriber = broker.accept().await;
    subscriber.connect_v3("client-b", true).await;
    subscriber
        .send(v3_subscribe(1, "topic1", QoS::AtMostOnce))
        .await;
    subscriber.expect_v3_suback().await;

    client.close().await;
    // The will's own message expiry passes before the delay; nothing is
    // ever published.
    tokio::time::sleep(Duration::from_secs(40)).await;
    subscriber.expect_silence().await;
}

#[tokio::test(start_paused = true)]
async fn test_takeover_publishes_prior_will() {
    let broker = TestBroker::start();

    let mut first = broker.accept().await;
    first
        .send(v3_connect_with_will(
            "client-a",
            will(b"taken-over", QoS::AtMostOnce),
        ))
        .await;
    first.expect_v3_connack().await;

    let mut subscriber = broker.accept().await;
    subscriber.connect_v3("client-b", true).await;
    subscriber
        .send(v3_subscribe(1, "topic1", QoS::AtMostOnce))
        .await;
    subscriber.expect_v3_suback().await;

    // A second CONNECT with the same client id closes the prior
    // connection with its will.
    let mut second = broker.accept().await;
    second.connect_v3("client-a", true).await;
    first.expect_closed().await;

    let delivered = subscriber.expect_v3_publish().await;
    assert_eq!(delivered.payload().as_ref(), b"taken-over");
}
