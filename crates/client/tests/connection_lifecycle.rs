mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{URL, connection, connection_with, count_closes, three_endpoints, wait_until};
use opcua_client::protocol::{
    GetEndpointsRequest, GetEndpointsResponse, Request, Response, SecurityMode, SecurityPolicy,
};
use opcua_client::testing::{FakeReply, FakeSession};
use opcua_client::{
    ChannelCounters, ChannelEvent, ConnectionEvent, ConnectionSettings, ConnectionState, Error,
};

#[tokio::test]
async fn connect_opens_channel_and_discovers_endpoints() {
    let (connection, controller) = connection();
    controller.set_endpoints(three_endpoints());
    assert_eq!(connection.state(), ConnectionState::Disconnected);

    connection.connect(URL).await.unwrap();

    assert_eq!(connection.state(), ConnectionState::Connected);
    assert!(connection.is_connected());
    assert_eq!(connection.endpoint_url().as_deref(), Some(URL));
    assert_eq!(connection.endpoints().unwrap().len(), 3);

    let channel = controller.last_channel().unwrap();
    assert!(channel.is_open());
    assert_eq!(channel.endpoint_url().as_deref(), Some(URL));

    let requests = controller.requests();
    assert_eq!(requests.len(), 1);
    match &requests[0] {
        Request::GetEndpoints(request) => {
            assert_eq!(request.endpoint_url, URL);
            assert!(request.locale_ids.is_empty());
            assert!(request.profile_uris.is_empty());
        }
        other => panic!("Expected GetEndpoints, got {other:?}"),
    }
}

#[tokio::test]
async fn channel_is_built_with_connection_settings() {
    let settings = ConnectionSettings {
        default_secure_token_lifetime: Duration::from_secs(30),
        security_mode: SecurityMode::SignAndEncrypt,
        security_policy: SecurityPolicy::Basic256Sha256,
        server_certificate: Some(vec![0x30, 0x82]),
        ..ConnectionSettings::default()
    };
    let (connection, controller) = connection_with(settings);

    connection.connect(URL).await.unwrap();

    let channel = controller.last_channel().unwrap();
    let options = channel.options();
    assert_eq!(options.default_secure_token_lifetime, Duration::from_secs(30));
    assert_eq!(options.security_mode, SecurityMode::SignAndEncrypt);
    assert_eq!(options.security_policy, SecurityPolicy::Basic256Sha256);
    assert_eq!(options.server_certificate.as_deref(), Some(&[0x30, 0x82][..]));
}

#[tokio::test]
async fn second_connect_is_rejected_without_side_effects() {
    let (connection, controller) = connection();
    controller.set_endpoints(three_endpoints());
    connection.connect(URL).await.unwrap();
    let session = FakeSession::attach(&connection, "s1");

    let err = connection
        .connect("opc.tcp://other:4840")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::AlreadyConnected), "got {err:?}");
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert_eq!(connection.endpoint_url().as_deref(), Some(URL));
    assert_eq!(connection.session_count(), 1);
    assert_eq!(session.close_count(), 0);
    assert_eq!(connection.endpoints().unwrap().len(), 3);
    assert_eq!(controller.channel_count(), 1);
    assert_eq!(controller.requests().len(), 1);
    assert!(controller.last_channel().unwrap().is_open());
}

#[tokio::test]
async fn concurrent_connects_only_one_wins() {
    let (connection, controller) = connection();

    let (first, second) = tokio::join!(connection.connect(URL), connection.connect(URL));

    let rejected = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Err(Error::AlreadyConnected)))
        .count();
    assert_eq!(rejected, 1);
    assert!(first.is_ok() || second.is_ok());
    assert_eq!(controller.channel_count(), 1);
    assert!(connection.is_connected());
}

#[tokio::test]
async fn channel_creation_failure_skips_discovery() {
    let (connection, controller) = connection();
    let mut events = connection.events();
    controller.fail_next_create(Error::ChannelCreation("connection refused".to_string()));

    let err = connection.connect(URL).await.unwrap_err();

    assert!(matches!(err, Error::ChannelCreation(_)), "got {err:?}");
    assert!(controller.requests().is_empty());
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(!connection.has_secure_channel());
    assert!(connection.endpoints().is_none());
    assert_eq!(count_closes(&mut events), 1);
}

#[tokio::test]
async fn channel_creation_failure_with_close_notification_closes_once() {
    let (connection, controller) = connection();
    let mut events = connection.events();
    controller.close_on_create_failure(true);
    controller.fail_next_create(Error::ChannelCreation("handshake rejected".to_string()));

    assert!(connection.connect(URL).await.is_err());
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(count_closes(&mut events), 1);
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn discovery_failure_tears_down_before_returning() {
    let (connection, controller) = connection();
    controller.push_reply(FakeReply::Fail(Error::Transport("reset by peer".to_string())));

    let err = connection.connect(URL).await.unwrap_err();

    assert!(matches!(err, Error::Transport(_)), "got {err:?}");
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(!connection.has_secure_channel());
    assert!(connection.endpoints().is_none());
    assert!(!controller.last_channel().unwrap().is_open());
}

#[tokio::test]
async fn connect_can_be_retried_after_failure() {
    let (connection, controller) = connection();
    controller.fail_next_create(Error::ChannelCreation("refused".to_string()));
    assert!(connection.connect(URL).await.is_err());

    connection.connect(URL).await.unwrap();

    assert!(connection.is_connected());
    assert_eq!(controller.channel_count(), 2);
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let (connection, _controller) = connection();
    let mut events = connection.events();

    connection.disconnect().await.unwrap();
    connection.disconnect().await.unwrap();
    assert_eq!(count_closes(&mut events), 0);

    connection.connect(URL).await.unwrap();
    connection.disconnect().await.unwrap();
    connection.disconnect().await.unwrap();

    assert_eq!(count_closes(&mut events), 1);
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn disconnect_closes_channel_even_if_close_reports_error() {
    let (connection, controller) = connection();
    let mut events = connection.events();
    connection.connect(URL).await.unwrap();
    controller.fail_next_close(Error::Transport("broken pipe".to_string()));

    connection.disconnect().await.unwrap();

    assert!(!connection.has_secure_channel());
    assert!(!controller.last_channel().unwrap().is_open());
    assert_eq!(count_closes(&mut events), 1);
}

#[tokio::test]
async fn counters_are_zero_before_connect() {
    let (connection, _controller) = connection();

    assert_eq!(connection.counters(), ChannelCounters::default());
    assert_eq!(connection.bytes_read(), 0);
    assert_eq!(connection.bytes_written(), 0);
    assert_eq!(connection.transactions_performed(), 0);
    assert_eq!(connection.timed_out_request_count(), 0);
}

#[tokio::test]
async fn counters_are_frozen_after_disconnect() {
    let (connection, controller) = connection();
    controller.set_endpoints(three_endpoints());

    connection.connect(URL).await.unwrap();
    let endpoints = connection.get_endpoints(Default::default()).await.unwrap();
    assert!(!endpoints.is_empty());
    connection.disconnect().await.unwrap();

    let counters = connection.counters();
    assert!(counters.bytes_read > 0);
    assert!(counters.bytes_written > 0);
    assert_eq!(counters.transactions_performed, 2);

    controller
        .last_channel()
        .unwrap()
        .emit(ChannelEvent::SecurityTokenRenewed);
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(connection.counters(), counters);
}

#[tokio::test]
async fn channel_notifications_are_republished() {
    let (connection, controller) = connection();
    connection.connect(URL).await.unwrap();
    let mut events = connection.events();

    let request = Arc::new(Request::GetEndpoints(GetEndpointsRequest::default()));
    controller.emit(ChannelEvent::LifetimeExpiring);
    controller.emit(ChannelEvent::SecurityTokenRenewed);
    controller.emit(ChannelEvent::TimedOutRequest(Arc::clone(&request)));
    controller.emit(ChannelEvent::SendChunk(Arc::from(&b"MSGF"[..])));

    let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv())
        .map(|e| e.kind())
        .collect();
    assert_eq!(
        kinds,
        [
            "lifetime_75",
            "security_token_renewed",
            "timed_out_request",
            "send_chunk"
        ]
    );
}

#[tokio::test]
async fn traffic_events_accompany_transactions() {
    let (connection, _controller) = connection();
    let mut events = connection.events();

    connection.connect(URL).await.unwrap();

    let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv())
        .map(|e| e.kind())
        .collect();
    assert!(kinds.contains(&"send_chunk"));
    assert!(kinds.contains(&"receive_chunk"));
    assert!(kinds.contains(&"send_request"));
    assert!(kinds.contains(&"receive_response"));
}

#[tokio::test]
async fn listener_is_detached_after_disconnect() {
    let (connection, controller) = connection();
    connection.connect(URL).await.unwrap();
    let old_channel = controller.last_channel().unwrap();
    connection.disconnect().await.unwrap();
    let mut events = connection.events();

    old_channel.emit(ChannelEvent::LifetimeExpiring);
    old_channel.emit(ChannelEvent::Close(None));

    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn peer_close_releases_channel_and_drains_sessions() {
    let (connection, controller) = connection();
    connection.connect(URL).await.unwrap();
    let s1 = FakeSession::attach(&connection, "s1");
    let s2 = FakeSession::attach(&connection, "s2");
    let close = connection.wait_for_close(Duration::from_secs(1));

    controller.drop_channel(Some(Error::ChannelClosed));

    let event = close.wait().await.unwrap();
    assert!(event.close_error().is_some_and(|err| err.is_channel_closed()));
    wait_until(|| !connection.has_secure_channel() && connection.session_count() == 0).await;

    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(s1.close_count(), 1);
    assert_eq!(s2.close_count(), 1);
}

#[tokio::test]
async fn disconnect_right_after_peer_close_closes_each_session_once() {
    let (connection, controller) = connection();
    connection.connect(URL).await.unwrap();
    let s1 = FakeSession::attach(&connection, "s1");
    let s2 = FakeSession::attach(&connection, "s2");
    let mut events = connection.events();

    controller.drop_channel(None);
    connection.disconnect().await.unwrap();
    wait_until(|| connection.session_count() == 0).await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(s1.close_count(), 1);
    assert_eq!(s2.close_count(), 1);
    assert!(!connection.has_secure_channel());
    assert_eq!(count_closes(&mut events), 1);
}

#[tokio::test]
async fn channel_lost_during_discovery_tears_down_before_returning() {
    let settings = ConnectionSettings {
        drain_sessions_on_channel_close: false,
        ..ConnectionSettings::default()
    };
    let (connection, controller) = connection_with(settings);
    let session = FakeSession::attach(&connection, "early");
    let mut events = connection.events();
    controller.push_reply(FakeReply::CloseAfter(Response::GetEndpoints(
        GetEndpointsResponse::default(),
    )));

    let err = connection.connect(URL).await.unwrap_err();

    assert!(err.is_channel_closed(), "got {err:?}");
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(!connection.has_secure_channel());
    assert_eq!(connection.session_count(), 0);
    assert_eq!(session.close_count(), 1);
    assert_eq!(count_closes(&mut events), 1);
}

#[tokio::test]
async fn peer_close_can_leave_sessions_registered() {
    let settings = ConnectionSettings {
        drain_sessions_on_channel_close: false,
        ..ConnectionSettings::default()
    };
    let (connection, controller) = connection_with(settings);
    connection.connect(URL).await.unwrap();
    let session = FakeSession::attach(&connection, "orphan");
    let mut events = connection.events();

    controller.drop_channel(None);
    wait_until(|| !connection.has_secure_channel()).await;

    assert_eq!(connection.session_count(), 1);
    assert_eq!(session.close_count(), 0);

    connection.disconnect().await.unwrap();
    assert_eq!(connection.session_count(), 0);
    assert_eq!(session.close_count(), 1);
    assert_eq!(count_closes(&mut events), 1);
}

#[tokio::test]
async fn reconnect_after_peer_close() {
    let (connection, controller) = connection();
    connection.connect(URL).await.unwrap();

    controller.drop_channel(None);
    wait_until(|| !connection.has_secure_channel()).await;
    connection.connect(URL).await.unwrap();

    assert!(connection.is_connected());
    assert_eq!(controller.channel_count(), 2);
}

#[tokio::test]
async fn transaction_timeout_is_counted_and_reported() {
    let (connection, controller) = connection();
    connection.connect(URL).await.unwrap();
    let timed_out = connection.wait_for_event(
        |e| matches!(e, ConnectionEvent::TimedOutRequest(_)),
        Duration::from_secs(1),
    );
    controller.push_reply(FakeReply::Timeout);

    let err = connection
        .perform_message_transaction(Request::GetEndpoints(GetEndpointsRequest::default()))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(timed_out.wait().await.is_ok());
    assert_eq!(connection.timed_out_request_count(), 1);
}

#[tokio::test]
async fn transaction_without_channel_is_rejected() {
    let (connection, controller) = connection();

    let err = connection
        .perform_message_transaction(Request::GetEndpoints(GetEndpointsRequest::default()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidSecureChannel));
    assert!(controller.requests().is_empty());
}
