// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! CONNECT handshake, rejection and session resumption.

use std::time::Duration;

use codec::v5::{Properties, Property};
use codec::{v3, v5, Packet, QoS};

mod common;
use common::{v3_connect, v5_connect, v3_subscribe, TestBroker};

#[tokio::test(start_paused = true)]
async fn test_connect_clean_session() {
    let broker = TestBroker::start();
    let mut client = broker.accept().await;
    let session_present = client.connect_v3("client-1", true).await;
    assert!(!session_present);
}

#[tokio::test(start_paused = true)]
async fn test_reject_empty_client_id_with_session() {
    let broker = TestBroker::start();

    let mut client = broker.accept().await;
    client.send(v3_connect("", false)).await;
    let connack = client.expect_v3_connack().await;
    assert_eq!(
        connack.return_code(),
        v3::ConnectReturnCode::IdentifierRejected
    );
    client.expect_closed().await;

    let mut client = broker.accept().await;
    client.send(v5_connect("", false, Properties::new())).await;
    let connack = client.expect_v5_connack().await;
    assert_eq!(
        connack.reason_code(),
        v5::ReasonCode::ClientIdentifierNotValid
    );
    client.expect_closed().await;
}

#[tokio::test(start_paused = true)]
async fn test_resume_v3_session() {
    let broker = TestBroker::start();

    let mut first = broker.accept().await;
    assert!(!first.connect_v3("client-1", false).await);
    first.send(v3_subscribe(1, "topic1", QoS::AtLeastOnce)).await;
    first.expect_v3_suback().await;
    first.close().await;

    // The session survived the close and the subscription with it.
    let mut second = broker.accept().await;
    assert!(second.connect_v3("client-1", false).await);

    let mut publisher = broker.accept().await;
    publisher.connect_v3("pub", true).await;
    let publish = common::v3_publish("topic1", QoS::AtMostOnce, b"hello");
    publisher
        .send(Packet::V3(v3::Packet::Publish(publish.clone())))
        .await;
    let delivered = second.expect_v3_publish().await;
    assert_eq!(delivered.topic().as_ref(), "topic1");

    // Clean start discards the session and its subscriptions.
    second.close().await;
    let mut third = broker.accept().await;
    assert!(!third.connect_v3("client-1", true).await);
    publisher
        .send(Packet::V3(v3::Packet::Publish(publish)))
        .await;
    third.expect_silence().await;
}

#[tokio::test(start_paused = true)]
async fn test_online_takeover_closes_prior_connection() {
    let broker = TestBroker::start();

    let mut first = broker.accept().await;
    assert!(!first.connect_v3("client-1", true).await);

    let mut second = broker.accept().await;
    // clean-session=true on the prior connection leaves nothing to
    // inherit.
    assert!(!second.connect_v3("client-1", true).await);
    first.expect_closed().await;
}

#[tokio::test(start_paused = true)]
async fn test_online_takeover_inherits_offline_session() {
    let broker = TestBroker::start();

    let mut first = broker.accept().await;
    assert!(!first.connect_v3("client-1", false).await);
    first.send(v3_subscribe(1, "topic1", QoS::AtMostOnce)).await;
    first.expect_v3_suback().await;

    let mut second = broker.accept().await;
    assert!(second.connect_v3("client-1", false).await);
    first.expect_closed().await;

    let mut publisher = broker.accept().await;
    publisher.connect_v3("pub", true).await;
    let publish = common::v3_publish("topic1", QoS::AtMostOnce, b"m");
    publisher
        .send(Packet::V3(v3::Packet::Publish(publish)))
        .await;
    let delivered = second.expect_v3_publish().await;
    assert_eq!(delivered.payload().as_ref(), b"m");
}

#[tokio::test(start_paused = true)]
async fn test_v5_session_expiry() {
    let broker = TestBroker::start();

    let mut client = broker.accept().await;
    let props = Properties::from(vec![Property::SessionExpiryInterval(5)]);
    client.send(v5_connect("client-1", true, props)).await;
    let connack = client.expect_v5_connack().await;
    assert!(!connack.session_present());
    client.close().await;

    // The session is erased once the expiry interval passes offline.
    tokio::time::sleep(Duration::from_secs(6)).await;
    let mut again = broker.accept().await;
    assert!(!again.connect_v5("client-1", false).await);
}

#[tokio::test(start_paused = true)]
async fn test_v5_session_never_expires() {
    let broker = TestBroker::start();

    let mut client = broker.accept().await;
    let props = Properties::from(vec![Property::SessionExpiryInterval(u32::MAX)]);
    client.send(v5_connect("client-1", true, props)).await;
    client.expect_v5_connack().await;
    client.close().await;

    tokio::time::sleep(Duration::from_secs(3_000_000)).await;
    let mut again = broker.accept().await;
    assert!(again.connect_v5("client-1", false).await);
}

#[tokio::test(start_paused = true)]
async fn test_v5_zero_expiry_session_ends_on_close() {
    let broker = TestBroker::start();

    let mut client = broker.accept().await;
    client
        .send(v5_connect("client-1", true, Properties::new()))
        .await;
    client.expect_v5_connack().await;
    client.close().await;

    let mut again = broker.accept().await;
    assert!(!again.connect_v5("client-1", false).await);
}

#[tokio::test(start_paused = true)]
async fn test_packet_before_connect_closes_endpoint() {
    let broker = TestBroker::start();
    let mut client = broker.accept().await;
    client
        .send(Packet::V3(v3::Packet::PingRequest(
            v3::PingRequestPacket::new(),
        )))
        .await;
    client.expect_closed().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_drops_silent_endpoint() {
    let broker = TestBroker::start();
    let mut client = broker.accept().await;
    tokio::time::sleep(Duration::from_secs(61)).await;
    client.expect_closed().await;
}
