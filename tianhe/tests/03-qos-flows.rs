// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! QoS 1 and QoS 2 acknowledgement flows.

use codec::{v3, Packet, QoS};

mod common;
use common::{v3_publish, v3_subscribe, TestBroker};

#[tokio::test(start_paused = true)]
async fn test_qos1_publish_acked() {
    let broker = TestBroker::start();

    let mut client = broker.accept().await;
    client.connect_v3("client-a", true).await;

    let mut publish = v3_publish("topic1", QoS::AtLeastOnce, b"m");
    publish.set_packet_id(11).unwrap();
    client.send(Packet::V3(v3::Packet::Publish(publish))).await;

    match client.recv().await {
        Packet::V3(v3::Packet::PublishAck(ack)) => assert_eq!(ack.packet_id(), 11),
        other => panic!("expected puback, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_qos2_exchange() {
    let broker = TestBroker::start();

    let mut client = broker.accept().await;
    client.connect_v3("client-a", true).await;
    client.send(v3_subscribe(1, "topic1", QoS::ExactOnce)).await;
    let suback = client.expect_v3_suback().await;
    assert_eq!(suback.acks(), &[v3::SubscribeAck::QoS(QoS::ExactOnce)]);

    let mut publish = v3_publish("topic1", QoS::ExactOnce, b"topic1_contents");
    publish.set_packet_id(5).unwrap();
    client.send(Packet::V3(v3::Packet::Publish(publish))).await;

    // The subscriber copy goes out during dispatch, then the receiver side
    // ack.
    let delivered = client.expect_v3_publish().await;
    assert_eq!(delivered.payload().as_ref(), b"topic1_contents");
    assert_eq!(delivered.qos(), QoS::ExactOnce);
    assert!(!delivered.dup());
    assert!(!delivered.retain());
    let delivered_pid = delivered.packet_id().unwrap();
    assert_ne!(delivered_pid, 0);

    match client.recv().await {
        Packet::V3(v3::Packet::PublishReceived(ack)) => assert_eq!(ack.packet_id(), 5),
        other => panic!("expected pubrec, got {other:?}"),
    }

    // Sender side: release the inbound exchange.
    client
        .send(Packet::V3(v3::Packet::PublishRelease(
            v3::PublishReleasePacket::new(5),
        )))
        .await;
    match client.recv().await {
        Packet::V3(v3::Packet::PublishComplete(ack)) => assert_eq!(ack.packet_id(), 5),
        other => panic!("expected pubcomp, got {other:?}"),
    }

    // Receiver side: ack the subscriber copy.
    client
        .send(Packet::V3(v3::Packet::PublishReceived(
            v3::PublishReceivedPacket::new(delivered_pid),
        )))
        .await;
    match client.recv().await {
        Packet::V3(v3::Packet::PublishRelease(release)) => {
            assert_eq!(release.packet_id(), delivered_pid);
        }
        other => panic!("expected pubrel, got {other:?}"),
    }
    client
        .send(Packet::V3(v3::Packet::PublishComplete(
            v3::PublishCompletePacket::new(delivered_pid),
        )))
        .await;
    client.expect_silence().await;
}

#[tokio::test(start_paused = true)]
async fn test_qos2_replay_delivers_once() {
    let broker = TestBroker::start();

    let mut subscriber = broker.accept().await;
    subscriber.connect_v3("sub", true).await;
    subscriber
        .send(v3_subscribe(1, "topic1", QoS::ExactOnce))
        .await;
    subscriber.expect_v3_suback().await;

    let mut publisher = broker.accept().await;
    publisher.connect_v3("pub", true).await;
    let mut publish = v3_publish("topic1", QoS::ExactOnce, b"once");
    publish.set_packet_id(7).unwrap();
    publisher
        .send(Packet::V3(v3::Packet::Publish(publish.clone())))
        .await;
    match publisher.recv().await {
        Packet::V3(v3::Packet::PublishReceived(ack)) => assert_eq!(ack.packet_id(), 7),
        other => panic!("expected pubrec, got {other:?}"),
    }

    // Replay before PUBREL: answered again, not re-dispatched.
    publish.set_dup(true);
    publisher
        .send(Packet::V3(v3::Packet::Publish(publish)))
        .await;
    match publisher.recv().await {
        Packet::V3(v3::Packet::PublishReceived(ack)) => assert_eq!(ack.packet_id(), 7),
        other => panic!("expected pubrec, got {other:?}"),
    }

    let delivered = subscriber.expect_v3_publish().await;
    assert_eq!(delivered.payload().as_ref(), b"once");
    subscriber.expect_silence().await;

    // Completing the exchange frees the id for reuse.
    publisher
        .send(Packet::V3(v3::Packet::PublishRelease(
            v3::PublishReleasePacket::new(7),
        )))
        .await;
    match publisher.recv().await {
        Packet::V3(v3::Packet::PublishComplete(ack)) => assert_eq!(ack.packet_id(), 7),
        other => panic!("expected pubcomp, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_qos_downgrade_to_subscription() {
    let broker = TestBroker::start();

    let mut subscriber = broker.accept().await;
    subscriber.connect_v3("sub", true).await;
    subscriber
        .send(v3_subscribe(1, "topic1", QoS::AtMostOnce))
        .await;
    subscriber.expect_v3_suback().await;

    let mut publisher = broker.accept().await;
    publisher.connect_v3("pub", true).await;
    let mut publish = v3_publish("topic1", QoS::ExactOnce, b"m");
    publish.set_packet_id(3).unwrap();
    publisher
        .send(Packet::V3(v3::Packet::Publish(publish)))
        .await;

    let delivered = subscriber.expect_v3_publish().await;
    assert_eq!(delivered.qos(), QoS::AtMostOnce);
    assert_eq!(delivered.packet_id(), None);
}

#[tokio::test(start_paused = true)]
async fn test_auto_response_disabled() {
    let broker = TestBroker::start();

    let mut subscriber = broker.accept().await;
    subscriber.connect_v3("sub", true).await;
    subscriber.set_auto_response(false).await;
    subscriber
        .send(v3_subscribe(1, "topic1", QoS::ExactOnce))
        .await;
    subscriber.expect_v3_suback().await;

    let mut publisher = broker.accept().await;
    publisher.connect_v3("pub", true).await;
    let mut publish = v3_publish("topic1", QoS::ExactOnce, b"m");
    publish.set_packet_id(2).unwrap();
    publisher
        .send(Packet::V3(v3::Packet::Publish(publish)))
        .await;

    let delivered = subscriber.expect_v3_publish().await;
    let pid = delivered.packet_id().unwrap();
    // With auto response off the broker does not answer PUBREC with
    // PUBREL.
    subscriber
        .send(Packet::V3(v3::Packet::PublishReceived(
            v3::PublishReceivedPacket::new(pid),
        )))
        .await;
    subscriber.expect_silence().await;
}
