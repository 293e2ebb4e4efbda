// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Offline message queue and inflight resumption.

use std::time::Duration;

use codec::v5::{Properties, Property};
use codec::{v3, v5, Packet, QoS};

mod common;
use common::{v3_publish, v5_connect, v5_publish, v5_subscribe, TestBroker};

async fn connect_persistent(client: &mut common::TestClient, client_id: &str) -> bool {
    let props = Properties::from(vec![Property::SessionExpiryInterval(u32::MAX)]);
    client.send(v5_connect(client_id, false, props)).await;
    let connack = client.expect_v5_connack().await;
    connack.session_present()
}

#[tokio::test(start_paused = true)]
async fn test_offline_queue_preserves_order() {
    let broker = TestBroker::start();

    let mut client = broker.accept().await;
    assert!(!connect_persistent(&mut client, "client-a").await);
    client
        .send(v5_subscribe(
            1,
            vec![v5::SubscribeTopic::new("topic1", QoS::AtLeastOnce).unwrap()],
        ))
        .await;
    client.expect_v5_suback().await;
    client
        .send(Packet::V5(v5::Packet::Disconnect(
            v5::DisconnectPacket::new(),
        )))
        .await;

    let mut publisher = broker.accept().await;
    publisher.connect_v3("pub", true).await;
    for (pid, payload) in [(1, b"m1" as &'static [u8]), (2, b"m2")] {
        let mut publish = v3::PublishPacket::new(
            "topic1",
            QoS::AtLeastOnce,
            bytes::Bytes::from_static(payload),
        )
        .unwrap();
        publish.set_packet_id(pid).unwrap();
        publisher
            .send(Packet::V3(v3::Packet::Publish(publish)))
            .await;
        match publisher.recv().await {
            Packet::V3(v3::Packet::PublishAck(ack)) => assert_eq!(ack.packet_id(), pid),
            other => panic!("expected puback, got {other:?}"),
        }
    }

    // Reconnect: the queue drains in publish order before anything else.
    let mut again = broker.accept().await;
    assert!(connect_persistent(&mut again, "client-a").await);
    let first = again.expect_v5_publish().await;
    assert_eq!(first.payload().as_ref(), b"m1");
    assert_eq!(first.qos(), QoS::AtLeastOnce);
    let second = again.expect_v5_publish().await;
    assert_eq!(second.payload().as_ref(), b"m2");
}

#[tokio::test(start_paused = true)]
async fn test_offline_message_expiry() {
    let broker = TestBroker::start();

    let mut client = broker.accept().await;
    assert!(!connect_persistent(&mut client, "client-a").await);
    client
        .send(v5_subscribe(
            1,
            vec![v5::SubscribeTopic::new("topic1", QoS::AtLeastOnce).unwrap()],
        ))
        .await;
    client.expect_v5_suback().await;
    client
        .send(Packet::V5(v5::Packet::Disconnect(
            v5::DisconnectPacket::new(),
        )))
        .await;

    let mut publisher = broker.accept().await;
    publisher.connect_v5("pub", true).await;
    let mut expiring = v5_publish("topic1", QoS::AtLeastOnce, b"short-lived");
    expiring.set_packet_id(1).unwrap();
    expiring
        .properties_mut()
        .push(Property::MessageExpiryInterval(3));
    publisher
        .send(Packet::V5(v5::Packet::Publish(expiring)))
        .await;
    publisher.recv().await;

    let mut keeper = v5_publish("topic1", QoS::AtLeastOnce, b"durable");
    keeper.set_packet_id(2).unwrap();
    publisher.send(Packet::V5(v5::Packet::Publish(keeper))).await;
    publisher.recv().await;

    // The expiring message is dropped from the queue before resumption.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let mut again = broker.accept().await;
    assert!(connect_persistent(&mut again, "client-a").await);
    let delivered = again.expect_v5_publish().await;
    assert_eq!(delivered.payload().as_ref(), b"durable");
    again.expect_silence().await;
}

#[tokio::test(start_paused = true)]
async fn test_inflight_resent_with_dup_on_resume() {
    let broker = TestBroker::start();

    let mut client = broker.accept().await;
    assert!(!connect_persistent(&mut client, "client-a").await);
    client
        .send(v5_subscribe(
            1,
            vec![v5::SubscribeTopic::new("topic1", QoS::AtLeastOnce).unwrap()],
        ))
        .await;
    client.expect_v5_suback().await;

    // Deliver while online but never ack, then drop the transport.
    let mut publisher = broker.accept().await;
    publisher.connect_v3("pub", true).await;
    let mut publish = v3_publish("topic1", QoS::AtLeastOnce, b"unacked");
    publish.set_packet_id(9).unwrap();
    publisher
        .send(Packet::V3(v3::Packet::Publish(publish)))
        .await;
    let delivered = client.expect_v5_publish().await;
    let pid = delivered.packet_id().unwrap();
    assert!(!delivered.dup());
    client.close().await;

    // The unacknowledged message comes back first, as a duplicate with
    // the same packet id.
    let mut again = broker.accept().await;
    assert!(connect_persistent(&mut again, "client-a").await);
    let resent = again.expect_v5_publish().await;
    assert_eq!(resent.payload().as_ref(), b"unacked");
    assert_eq!(resent.packet_id(), Some(pid));
    assert!(resent.dup());

    // Acking now completes the exchange.
    again
        .send(Packet::V5(v5::Packet::PublishAck(v5::PublishAckPacket::new(
            pid,
        ))))
        .await;
    again.expect_silence().await;
}

#[tokio::test(start_paused = true)]
async fn test_queued_messages_dropped_with_clean_start() {
    let broker = TestBroker::start();

    let mut client = broker.accept().await;
    assert!(!connect_persistent(&mut client, "client-a").await);
    client
        .send(v5_subscribe(
            1,
            vec![v5::SubscribeTopic::new("topic1", QoS::AtLeastOnce).unwrap()],
        ))
        .await;
    client.expect_v5_suback().await;
    client
        .send(Packet::V5(v5::Packet::Disconnect(
            v5::DisconnectPacket::new(),
        )))
        .await;

    let mut publisher = broker.accept().await;
    publisher.connect_v3("pub", true).await;
    let mut publish = v3_publish("topic1", QoS::AtLeastOnce, b"m");
    publish.set_packet_id(1).unwrap();
    publisher
        .send(Packet::V3(v3::Packet::Publish(publish)))
        .await;
    publisher.recv().await;

    // Clean start discards the queue.
    let mut again = broker.accept().await;
    let props = Properties::from(vec![Property::SessionExpiryInterval(u32::MAX)]);
    again.send(v5_connect("client-a", true, props)).await;
    let connack = again.expect_v5_connack().await;
    assert!(!connack.session_present());
    again.expect_silence().await;
}

#[tokio::test(start_paused = true)]
async fn test_v5_disconnect_can_zero_session_expiry() {
    let broker = TestBroker::start();

    let mut client = broker.accept().await;
    assert!(!connect_persistent(&mut client, "client-a").await);

    // DISCONNECT with session expiry 0 ends the session on close.
    let props = Properties::from(vec![Property::SessionExpiryInterval(0)]);
    client
        .send(Packet::V5(v5::Packet::Disconnect(
            v5::DisconnectPacket::with_reason(codec::v5::ReasonCode::Success, props),
        )))
        .await;

    let mut again = broker.accept().await;
    assert!(!connect_persistent(&mut again, "client-a").await);
}
