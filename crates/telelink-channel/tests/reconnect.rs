use std::sync::Arc;
use std::time::Duration;

use telelink_channel::{
    ChannelError, ChannelRole, ConnectionState, EventReceiver, Transport, TransportConfig,
    TransportEvent,
};
use telelink_transport::{MemoryConnector, COMMAND_PATH, STATE_PATH};

fn transport(memory: &MemoryConnector) -> (Transport, EventReceiver) {
    Transport::new(
        TransportConfig::for_domain("robot.local:8443"),
        Arc::new(memory.clone()),
    )
    .unwrap()
}

fn drain(rx: &mut EventReceiver) -> Vec<TransportEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn retries_on_fixed_interval_until_connected() {
    let memory = MemoryConnector::new();
    memory.fail_next(COMMAND_PATH, 3);
    let (transport, mut rx) = transport(&memory);

    transport.start().unwrap();
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert!(transport.command().is_connected());

    let command: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|event| event.channel() == ChannelRole::Command)
        .collect();
    assert_eq!(command.len(), 4, "{command:?}");
    for event in &command[..3] {
        assert!(matches!(
            event,
            TransportEvent::Error {
                error: ChannelError::ConnectFailed(_),
                ..
            }
        ));
    }
    assert!(matches!(command[3], TransportEvent::Connected { .. }));

    let attempts = memory.attempts(COMMAND_PATH);
    assert_eq!(attempts.len(), 4);
    for pair in attempts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(300));
    }
    assert_eq!(memory.max_concurrent_opens(), 1);
    assert_eq!(memory.opened(COMMAND_PATH), 1);

    transport.stop().await;
}

#[tokio::test(start_paused = true)]
async fn slow_handshakes_never_overlap() {
    let memory = MemoryConnector::new();
    memory.set_open_delay(Duration::from_millis(700));
    memory.set_refusing(STATE_PATH, true);
    let (transport, _rx) = transport(&memory);

    transport.start().unwrap();
    tokio::time::sleep(Duration::from_millis(3_000)).await;

    let attempts = memory.attempts(STATE_PATH);
    assert!(attempts.len() >= 2);
    for pair in attempts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(700));
    }
    assert!(memory.opened(STATE_PATH) == 0);
    assert!(memory.is_connected(COMMAND_PATH));

    transport.stop().await;
    assert!(!transport.timers_active());
}

#[tokio::test(start_paused = true)]
async fn commands_queued_while_offline_arrive_in_order() {
    let memory = MemoryConnector::new();
    memory.set_refusing(COMMAND_PATH, true);
    let (transport, _rx) = transport(&memory);
    transport.start().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    for n in 0..5u8 {
        assert!(transport.send_command(vec![n]));
    }
    assert_eq!(transport.command_queue_len(), 5);
    assert!(memory.sent(COMMAND_PATH).is_empty());

    memory.set_refusing(COMMAND_PATH, false);
    tokio::time::sleep(Duration::from_millis(400)).await;

    let sent: Vec<u8> = memory.sent(COMMAND_PATH).iter().map(|p| p[0]).collect();
    assert_eq!(sent, vec![0, 1, 2, 3, 4]);
    assert_eq!(transport.command_queue_len(), 0);

    transport.stop().await;
}

#[tokio::test(start_paused = true)]
async fn remote_close_reports_once_and_reconnects() {
    let memory = MemoryConnector::new();
    let (transport, mut rx) = transport(&memory);
    transport.start().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(transport.is_connected());
    drain(&mut rx);

    assert!(memory.close_remote(STATE_PATH, Some(1001), "going away"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!transport.is_connected());

    let events = drain(&mut rx);
    let disconnects: Vec<_> = events
        .iter()
        .filter(|event| matches!(event, TransportEvent::Disconnected { .. }))
        .collect();
    assert_eq!(disconnects.len(), 1);
    match disconnects[0] {
        TransportEvent::Disconnected {
            channel,
            code,
            reason,
            remote,
        } => {
            assert_eq!(*channel, ChannelRole::State);
            assert_eq!(*code, Some(1001));
            assert_eq!(reason, "going away");
            assert!(*remote);
        }
        other => panic!("unexpected {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(transport.is_connected());
    assert_eq!(memory.opened(STATE_PATH), 2);

    transport.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_reports_local_disconnects_and_halts_retries() {
    let memory = MemoryConnector::new();
    let (transport, mut rx) = transport(&memory);
    transport.start().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    drain(&mut rx);

    transport.stop().await;
    let events = drain(&mut rx);
    let local_closes = events
        .iter()
        .filter(|event| matches!(event, TransportEvent::Disconnected { remote: false, .. }))
        .count();
    assert_eq!(local_closes, 2);
    assert!(!memory.is_connected(COMMAND_PATH));
    assert!(!memory.is_connected(STATE_PATH));

    let before = memory.attempts(COMMAND_PATH).len();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(memory.attempts(COMMAND_PATH).len(), before);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_while_connecting_abandons_the_attempt() {
    let memory = MemoryConnector::new();
    memory.set_open_delay(Duration::from_millis(700));
    let (transport, mut rx) = transport(&memory);

    transport.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.command().state(), ConnectionState::Connecting);
    assert_eq!(transport.state().state(), ConnectionState::Connecting);

    transport.stop().await;
    assert_eq!(transport.command().state(), ConnectionState::Disconnected);
    assert_eq!(transport.state().state(), ConnectionState::Disconnected);
    assert!(!transport.timers_active());
    assert!(!memory.is_connected(COMMAND_PATH));
    assert!(!memory.is_connected(STATE_PATH));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(memory.attempts(COMMAND_PATH).len(), 1);
    assert_eq!(memory.attempts(STATE_PATH).len(), 1);
    assert!(!transport.is_connected());
    assert!(drain(&mut rx)
        .iter()
        .all(|event| !matches!(event, TransportEvent::Connected { .. })));
}
