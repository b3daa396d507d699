#![allow(dead_code)]

use std::time::Duration;

use opcua_client::protocol::{EndpointDescription, SecurityMode, SecurityPolicy};
use opcua_client::testing::{FakeChannelController, FakeChannelFactory};
use opcua_client::{ClientConnection, ConnectionEvent, ConnectionSettings, EventStream};
use tracing_subscriber::EnvFilter;

pub const URL: &str = "opc.tcp://host:4840";

pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub fn endpoint(url: &str, mode: SecurityMode, policy: SecurityPolicy) -> EndpointDescription {
    EndpointDescription {
        endpoint_url: url.to_string(),
        security_mode: mode,
        security_policy_uri: policy.uri(),
        ..Default::default()
    }
}

pub fn three_endpoints() -> Vec<EndpointDescription> {
    vec![
        endpoint(URL, SecurityMode::None, SecurityPolicy::None),
        endpoint(URL, SecurityMode::Sign, SecurityPolicy::Basic256Sha256),
        endpoint(
            URL,
            SecurityMode::SignAndEncrypt,
            SecurityPolicy::Aes256Sha256RsaPss,
        ),
    ]
}

pub fn connection_with(settings: ConnectionSettings) -> (ClientConnection, FakeChannelController) {
    init_test_logging();
    let (factory, controller) = FakeChannelFactory::build();
    (ClientConnection::new(settings, factory), controller)
}

pub fn connection() -> (ClientConnection, FakeChannelController) {
    connection_with(ConnectionSettings::default())
}

/// Polls `condition` until it holds, yielding to spawned follow-ups.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Counts close notifications received so far.
pub fn count_closes(stream: &mut EventStream<ConnectionEvent>) -> usize {
    let mut closes = 0;
    while let Some(event) = stream.try_recv() {
        if event.is_close() {
            closes += 1;
        }
    }
    closes
}
