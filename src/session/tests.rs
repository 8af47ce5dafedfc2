//! Scenario tests for the session manager, driven through the simulated
//! peripheral

use super::*;
use crate::channel::Channel;
use crate::error::{ErrorKind, SessionError};
use crate::transport::sim::{SimConfig, SimControl, SimTransport};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_PERIOD: Duration = Duration::from_millis(100);

struct Harness {
    session: SessionManager,
    sim: SimControl,
    events: UnboundedReceiver<SessionEvent>,
}

fn start(options: SessionOptions) -> Harness {
    start_with(SimConfig::default(), options)
}

fn start_with(config: SimConfig, options: SessionOptions) -> Harness {
    let transport = SimTransport::new(config);
    let sim = transport.control();
    let session = SessionManager::spawn(Arc::new(transport), options);
    let (_id, events) = session.events();
    Harness {
        session,
        sim,
        events,
    }
}

fn no_retry() -> SessionOptions {
    SessionOptions {
        auto_reconnect: false,
        ..SessionOptions::default()
    }
}

async fn next_event(rx: &mut UnboundedReceiver<SessionEvent>) -> SessionEvent {
    timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event stream closed")
}

async fn next_status(rx: &mut UnboundedReceiver<SessionEvent>) -> ConnectionStatus {
    match next_event(rx).await {
        SessionEvent::ConnectionStatusChanged(status) => status,
        other => panic!("expected a status change, got {:?}", other),
    }
}

async fn assert_quiet(rx: &mut UnboundedReceiver<SessionEvent>) {
    if let Ok(Some(event)) = timeout(QUIET_PERIOD, rx.recv()).await {
        panic!("unexpected event: {:?}", event);
    }
}

/// Drive a fresh connect through to Ready
async fn connect_ready(h: &mut Harness) -> BTreeMap<Channel, u8> {
    h.session.connect().await.unwrap();
    assert_eq!(
        next_status(&mut h.events).await,
        ConnectionStatus::Connecting { attempt: 0 }
    );
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Discovering);
    match next_status(&mut h.events).await {
        ConnectionStatus::Connected { channels, .. } => channels,
        other => panic!("expected Connected, got {:?}", other),
    }
}

async fn wait_for_held_write(sim: &SimControl, channel: Channel) {
    timeout(EVENT_TIMEOUT, async {
        while sim.held_writes(channel) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("write never reached the peripheral");
}

fn default_values() -> BTreeMap<Channel, u8> {
    SimConfig::default().initial_values
}

// =============================================================================
// Connect and discovery
// =============================================================================

#[tokio::test]
async fn test_full_connect() {
    let mut h = start(SessionOptions::default());

    h.session.connect().await.unwrap();
    assert_eq!(
        next_status(&mut h.events).await,
        ConnectionStatus::Connecting { attempt: 0 }
    );
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Discovering);
    assert_eq!(
        next_status(&mut h.events).await,
        ConnectionStatus::Connected {
            device: "Aurora Portal".to_string(),
            channels: default_values(),
        }
    );

    let snapshot = h.session.current_state();
    assert_eq!(snapshot.state, SessionState::Ready);
    assert!(snapshot.all_synced());
    assert_eq!(snapshot.value(Channel::Brightness), Some(155));
    assert_eq!(h.sim.read_count(), 6);
    assert_eq!(h.sim.write_count(), 0);
}

#[tokio::test]
async fn test_brightness_discovery_failure() {
    let mut h = start(SessionOptions::default());
    h.sim.fail_characteristic(Channel::Brightness, true);

    h.session.connect().await.unwrap();
    assert_eq!(
        next_status(&mut h.events).await,
        ConnectionStatus::Connecting { attempt: 0 }
    );
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Discovering);
    match next_status(&mut h.events).await {
        ConnectionStatus::ConnectionFailed { error, .. } => {
            assert_eq!(error, ErrorKind::CharacteristicNotFound)
        }
        other => panic!("expected ConnectionFailed, got {:?}", other),
    }

    // Never reached Ready, so no retry
    assert_quiet(&mut h.events).await;
    assert_eq!(h.sim.scan_count(), 1);

    let snapshot = h.session.current_state();
    assert_eq!(snapshot, SessionSnapshot::disconnected());
    assert!(!h.sim.is_connected());
}

#[tokio::test]
async fn test_service_missing() {
    let mut h = start(SessionOptions::default());
    h.sim.fail_service(true);

    h.session.connect().await.unwrap();
    next_status(&mut h.events).await;
    next_status(&mut h.events).await;
    assert!(matches!(
        next_status(&mut h.events).await,
        ConnectionStatus::ConnectionFailed {
            error: ErrorKind::ServiceNotFound,
            ..
        }
    ));
    assert_quiet(&mut h.events).await;
}

#[tokio::test]
async fn test_device_absent() {
    let mut h = start(SessionOptions::default());
    h.sim.set_present(false);

    h.session.connect().await.unwrap();
    next_status(&mut h.events).await;
    assert!(matches!(
        next_status(&mut h.events).await,
        ConnectionStatus::ConnectionFailed {
            error: ErrorKind::NoDeviceFound,
            ..
        }
    ));
    assert_eq!(h.sim.connect_count(), 0);
    assert_quiet(&mut h.events).await;
}

#[tokio::test]
async fn test_not_supported_surfaces_once() {
    let mut h = start(SessionOptions::default());
    h.sim.set_supported(false);

    h.session.connect().await.unwrap();
    next_status(&mut h.events).await;
    assert!(matches!(
        next_status(&mut h.events).await,
        ConnectionStatus::ConnectionFailed {
            error: ErrorKind::NotSupported,
            ..
        }
    ));
    assert_quiet(&mut h.events).await;
    assert_eq!(h.sim.scan_count(), 1);
}

#[tokio::test]
async fn test_unreadable_initial_value_fails_connect() {
    // Controller publishes raw bytes, session expects text
    let mut h = start(SessionOptions {
        payload_encoding: PayloadEncoding::Text,
        ..SessionOptions::default()
    });

    h.session.connect().await.unwrap();
    next_status(&mut h.events).await;
    next_status(&mut h.events).await;
    assert!(matches!(
        next_status(&mut h.events).await,
        ConnectionStatus::ConnectionFailed {
            error: ErrorKind::TransportError,
            ..
        }
    ));
    assert_eq!(h.session.current_state().state, SessionState::Disconnected);
}

#[tokio::test]
async fn test_text_encoding_end_to_end() {
    let config = SimConfig {
        encoding: PayloadEncoding::Text,
        ..SimConfig::default()
    };
    let mut h = start_with(
        config,
        SessionOptions {
            payload_encoding: PayloadEncoding::Text,
            ..SessionOptions::default()
        },
    );

    assert_eq!(connect_ready(&mut h).await, default_values());

    assert!(h.sim.notify(Channel::Program, 7));
    assert_eq!(
        next_event(&mut h.events).await,
        SessionEvent::ChannelChanged {
            channel: Channel::Program,
            value: 7
        }
    );
}

#[tokio::test]
async fn test_gatt_connect_refused() {
    let mut h = start(SessionOptions::default());
    h.sim.fail_connect(true);

    h.session.connect().await.unwrap();
    assert_eq!(
        next_status(&mut h.events).await,
        ConnectionStatus::Connecting { attempt: 0 }
    );
    assert!(matches!(
        next_status(&mut h.events).await,
        ConnectionStatus::ConnectionFailed {
            error: ErrorKind::ConnectionFailed,
            ..
        }
    ));
    assert_quiet(&mut h.events).await;

    assert_eq!(h.sim.connect_count(), 1);
    assert_eq!(h.sim.read_count(), 0);
    assert_eq!(h.session.current_state(), SessionSnapshot::disconnected());
}

#[tokio::test]
async fn test_subscribe_failure_fails_discovery() {
    let mut h = start(SessionOptions::default());
    h.sim.fail_subscribe(Channel::Mode, true);

    h.session.connect().await.unwrap();
    next_status(&mut h.events).await;
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Discovering);
    assert!(matches!(
        next_status(&mut h.events).await,
        ConnectionStatus::ConnectionFailed {
            error: ErrorKind::TransportError,
            ..
        }
    ));
    assert_quiet(&mut h.events).await;

    assert_eq!(h.sim.scan_count(), 1);
    assert_eq!(h.session.current_state(), SessionSnapshot::disconnected());
}

#[tokio::test]
async fn test_read_failure_fails_discovery() {
    let mut h = start(SessionOptions::default());
    h.sim.fail_read(Channel::Palette, true);

    h.session.connect().await.unwrap();
    next_status(&mut h.events).await;
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Discovering);
    match next_status(&mut h.events).await {
        ConnectionStatus::ConnectionFailed { error, message } => {
            assert_eq!(error, ErrorKind::TransportError);
            assert!(message.contains("read of palette failed"), "{}", message);
        }
        other => panic!("expected ConnectionFailed, got {:?}", other),
    }
    assert_quiet(&mut h.events).await;

    assert!(!h.sim.is_connected());
    assert_eq!(h.session.current_state(), SessionSnapshot::disconnected());
}

#[tokio::test]
async fn test_notification_racing_initial_read() {
    let mut h = start(SessionOptions::default());
    // Palette changes after its read is answered but before discovery finishes
    h.sim.change_after_read(Channel::Palette, 7);

    let channels = connect_ready(&mut h).await;
    assert_eq!(channels[&Channel::Palette], 7);
    assert_eq!(channels[&Channel::Mode], 1);

    let snapshot = h.session.current_state();
    assert_eq!(snapshot.value(Channel::Palette), Some(7));
    assert!(snapshot.all_synced());
    assert_eq!(h.sim.value(Channel::Palette), Some(7));
    assert_quiet(&mut h.events).await;
}

// =============================================================================
// Caller usage errors
// =============================================================================

#[tokio::test]
async fn test_send_before_connect_is_not_ready() {
    let h = start(SessionOptions::default());

    assert_eq!(
        h.session.send_command(Channel::Mode, 2).await,
        Err(SessionError::NotReady)
    );
    assert_eq!(h.sim.write_count(), 0);
    assert_eq!(h.session.current_state(), SessionSnapshot::disconnected());
}

#[tokio::test]
async fn test_send_while_connecting_is_not_ready() {
    let mut h = start(SessionOptions::default());
    h.sim.hold_connect(true);

    h.session.connect().await.unwrap();
    assert_eq!(
        next_status(&mut h.events).await,
        ConnectionStatus::Connecting { attempt: 0 }
    );
    assert_eq!(
        h.session.send_command(Channel::Program, 3).await,
        Err(SessionError::NotReady)
    );

    h.sim.hold_connect(false);
    h.sim.release_connect();
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Discovering);
    assert!(matches!(
        next_status(&mut h.events).await,
        ConnectionStatus::Connected { .. }
    ));
    assert_eq!(h.sim.write_count(), 0);
}

#[tokio::test]
async fn test_second_connect_is_rejected() {
    let mut h = start(SessionOptions::default());
    h.sim.hold_connect(true);

    h.session.connect().await.unwrap();
    assert_eq!(
        h.session.connect().await,
        Err(SessionError::AlreadyConnected)
    );

    h.sim.hold_connect(false);
    h.sim.release_connect();
    next_status(&mut h.events).await;
    next_status(&mut h.events).await;
    next_status(&mut h.events).await;

    assert_eq!(
        h.session.connect().await,
        Err(SessionError::AlreadyConnected)
    );
    assert_eq!(h.sim.scan_count(), 1);
    assert_quiet(&mut h.events).await;
}

// =============================================================================
// Writes
// =============================================================================

#[tokio::test]
async fn test_write_round_trip() {
    let mut h = start(SessionOptions::default());
    connect_ready(&mut h).await;

    h.session.send_command(Channel::Program, 4).await.unwrap();
    assert_eq!(
        next_event(&mut h.events).await,
        SessionEvent::ChannelChanged {
            channel: Channel::Program,
            value: 4
        }
    );
    match next_event(&mut h.events).await {
        SessionEvent::LastCommandSent { channel, value, .. } => {
            assert_eq!(channel, Channel::Program);
            assert_eq!(value, 4);
        }
        other => panic!("expected LastCommandSent, got {:?}", other),
    }

    let snapshot = h.session.current_state();
    assert_eq!(snapshot.channel(Channel::Program), ChannelState::synced(4));
    assert_eq!(h.sim.value(Channel::Program), Some(4));
}

#[tokio::test]
async fn test_overlapping_speed_writes_acked() {
    let mut h = start(SessionOptions::default());
    connect_ready(&mut h).await;
    h.sim.hold_writes(Channel::Speed, true);

    h.session.send_command(Channel::Speed, 1).await.unwrap();
    wait_for_held_write(&h.sim, Channel::Speed).await;

    assert_eq!(
        h.session.send_command(Channel::Speed, 2).await,
        Err(SessionError::WriteInProgress(Channel::Speed))
    );
    assert_eq!(h.sim.write_count(), 1);

    let pending = h.session.current_state().channel(Channel::Speed);
    assert_eq!(pending.freshness, Freshness::PendingWrite);
    assert_eq!(pending.value, Some(5));

    // Other channels are not blocked
    h.sim.hold_writes(Channel::Speed, false);
    h.session.send_command(Channel::Mode, 2).await.unwrap();
    assert_eq!(
        next_event(&mut h.events).await,
        SessionEvent::ChannelChanged {
            channel: Channel::Mode,
            value: 2
        }
    );
    next_event(&mut h.events).await;

    assert!(h.sim.release_write(Channel::Speed, true));
    assert_eq!(
        next_event(&mut h.events).await,
        SessionEvent::ChannelChanged {
            channel: Channel::Speed,
            value: 1
        }
    );
    assert!(matches!(
        next_event(&mut h.events).await,
        SessionEvent::LastCommandSent {
            channel: Channel::Speed,
            value: 1,
            ..
        }
    ));
    assert_eq!(
        h.session.current_state().channel(Channel::Speed),
        ChannelState::synced(1)
    );

    h.session.send_command(Channel::Speed, 2).await.unwrap();
    assert_eq!(
        next_event(&mut h.events).await,
        SessionEvent::ChannelChanged {
            channel: Channel::Speed,
            value: 2
        }
    );
}

#[tokio::test]
async fn test_overlapping_speed_writes_rejected() {
    let mut h = start(SessionOptions::default());
    connect_ready(&mut h).await;
    h.sim.hold_writes(Channel::Speed, true);

    h.session.send_command(Channel::Speed, 1).await.unwrap();
    wait_for_held_write(&h.sim, Channel::Speed).await;
    assert_eq!(
        h.session.send_command(Channel::Speed, 2).await,
        Err(SessionError::WriteInProgress(Channel::Speed))
    );

    assert!(h.sim.release_write(Channel::Speed, false));
    assert_eq!(
        next_event(&mut h.events).await,
        SessionEvent::CommandFailed {
            channel: Channel::Speed,
            value: 1,
            error: ErrorKind::TransportError,
        }
    );

    // Prior value kept, no retry
    assert_eq!(
        h.session.current_state().channel(Channel::Speed),
        ChannelState::synced(5)
    );
    assert_quiet(&mut h.events).await;
    assert_eq!(h.sim.write_count(), 1);
}

#[tokio::test]
async fn test_notification_during_pending_write() {
    let mut h = start(SessionOptions::default());
    connect_ready(&mut h).await;
    h.sim.hold_writes(Channel::Palette, true);

    h.session.send_command(Channel::Palette, 12).await.unwrap();
    wait_for_held_write(&h.sim, Channel::Palette).await;

    assert!(h.sim.notify(Channel::Palette, 40));
    assert_eq!(
        next_event(&mut h.events).await,
        SessionEvent::ChannelChanged {
            channel: Channel::Palette,
            value: 40
        }
    );
    let state = h.session.current_state().channel(Channel::Palette);
    assert_eq!(state.value, Some(40));
    assert_eq!(state.freshness, Freshness::PendingWrite);

    h.sim.release_write(Channel::Palette, true);
    assert_eq!(
        next_event(&mut h.events).await,
        SessionEvent::ChannelChanged {
            channel: Channel::Palette,
            value: 12
        }
    );
    next_event(&mut h.events).await;
    assert_eq!(
        h.session.current_state().channel(Channel::Palette),
        ChannelState::synced(12)
    );
}

// =============================================================================
// Notifications
// =============================================================================

#[tokio::test]
async fn test_notification_yields_one_event() {
    let mut h = start(SessionOptions::default());
    connect_ready(&mut h).await;

    assert!(h.sim.notify(Channel::Mode, 3));
    assert_eq!(
        next_event(&mut h.events).await,
        SessionEvent::ChannelChanged {
            channel: Channel::Mode,
            value: 3
        }
    );
    assert_quiet(&mut h.events).await;
    assert_eq!(
        h.session.current_state().channel(Channel::Mode),
        ChannelState::synced(3)
    );
}

#[tokio::test]
async fn test_notifications_keep_order() {
    let mut h = start(SessionOptions::default());
    connect_ready(&mut h).await;

    for value in [10, 20, 30] {
        h.sim.notify(Channel::Brightness, value);
    }
    for value in [10, 20, 30] {
        assert_eq!(
            next_event(&mut h.events).await,
            SessionEvent::ChannelChanged {
                channel: Channel::Brightness,
                value
            }
        );
    }
}

#[tokio::test]
async fn test_malformed_notification_dropped() {
    let mut h = start(SessionOptions::default());
    connect_ready(&mut h).await;

    assert!(h.sim.notify_raw(Channel::Speed, Vec::new()));
    assert!(h.sim.notify(Channel::Speed, 3));
    assert_eq!(
        next_event(&mut h.events).await,
        SessionEvent::ChannelChanged {
            channel: Channel::Speed,
            value: 3
        }
    );
    assert_eq!(h.session.current_state().state, SessionState::Ready);
}

// =============================================================================
// Link loss and reconnect
// =============================================================================

#[tokio::test]
async fn test_link_loss_reconnects() {
    let mut h = start(SessionOptions::default());
    connect_ready(&mut h).await;

    // Capture what current_state() reports at the moment Disconnected is published
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let reader = h.session.clone();
    let id = h.session.subscribe(Arc::new(move |event: &SessionEvent| {
        if event == &SessionEvent::ConnectionStatusChanged(ConnectionStatus::Disconnected) {
            *sink.lock() = Some(reader.current_state());
        }
    }));

    h.sim.set_value(Channel::Brightness, 200);
    assert!(h.sim.drop_link());

    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Disconnected);
    assert_eq!(
        next_status(&mut h.events).await,
        ConnectionStatus::Connecting { attempt: 1 }
    );
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Discovering);
    match next_status(&mut h.events).await {
        ConnectionStatus::Connected { channels, .. } => {
            assert_eq!(channels[&Channel::Brightness], 200)
        }
        other => panic!("expected Connected, got {:?}", other),
    }

    assert_eq!(*seen.lock(), Some(SessionSnapshot::disconnected()));
    assert!(h.session.unsubscribe(id));
    assert_eq!(h.sim.scan_count(), 2);
    assert!(h.session.current_state().all_synced());
}

#[tokio::test]
async fn test_link_loss_without_auto_reconnect() {
    let mut h = start(no_retry());
    connect_ready(&mut h).await;

    h.sim.drop_link();
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Disconnected);
    assert_quiet(&mut h.events).await;
    assert_eq!(h.sim.scan_count(), 1);
}

#[tokio::test]
async fn test_link_loss_fails_pending_write() {
    let mut h = start(no_retry());
    connect_ready(&mut h).await;
    h.sim.hold_writes(Channel::Control, true);

    h.session.send_command(Channel::Control, 1).await.unwrap();
    wait_for_held_write(&h.sim, Channel::Control).await;
    h.sim.drop_link();

    assert_eq!(
        next_event(&mut h.events).await,
        SessionEvent::CommandFailed {
            channel: Channel::Control,
            value: 1,
            error: ErrorKind::TransportError,
        }
    );
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Disconnected);
    assert_quiet(&mut h.events).await;
}

#[tokio::test]
async fn test_delayed_retries_until_device_returns() {
    let mut h = start(SessionOptions {
        reconnect_delay: Duration::from_millis(20),
        ..SessionOptions::default()
    });
    connect_ready(&mut h).await;

    h.sim.set_present(false);
    h.sim.drop_link();
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Disconnected);

    for attempt in 1..=2 {
        assert_eq!(
            next_status(&mut h.events).await,
            ConnectionStatus::Connecting { attempt }
        );
        assert!(matches!(
            next_status(&mut h.events).await,
            ConnectionStatus::ConnectionFailed {
                error: ErrorKind::NoDeviceFound,
                ..
            }
        ));
    }

    h.sim.set_present(true);
    loop {
        if let ConnectionStatus::Connected { .. } = next_status(&mut h.events).await {
            break;
        }
    }
    assert_eq!(h.session.current_state().state, SessionState::Ready);
}

#[tokio::test]
async fn test_disconnect_stops_retries() {
    let mut h = start(SessionOptions {
        reconnect_delay: Duration::from_millis(20),
        ..SessionOptions::default()
    });
    connect_ready(&mut h).await;

    h.sim.set_present(false);
    h.sim.drop_link();
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Disconnected);
    assert_eq!(
        next_status(&mut h.events).await,
        ConnectionStatus::Connecting { attempt: 1 }
    );

    h.session.disconnect().await.unwrap();
    while timeout(QUIET_PERIOD, h.events.recv()).await.is_ok() {}

    let scans = h.sim.scan_count();
    tokio::time::sleep(QUIET_PERIOD).await;
    assert_eq!(h.sim.scan_count(), scans);
    assert_eq!(h.session.current_state().state, SessionState::Disconnected);
}

#[tokio::test]
async fn test_discovery_failure_after_ready_retries() {
    let mut h = start(SessionOptions {
        reconnect_delay: Duration::from_millis(20),
        ..SessionOptions::default()
    });
    connect_ready(&mut h).await;

    h.sim.fail_read(Channel::Palette, true);
    assert!(h.sim.drop_link());
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Disconnected);
    assert_eq!(
        next_status(&mut h.events).await,
        ConnectionStatus::Connecting { attempt: 1 }
    );
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Discovering);
    match next_status(&mut h.events).await {
        ConnectionStatus::ConnectionFailed { error, message } => {
            assert_eq!(error, ErrorKind::TransportError);
            assert!(message.contains("read of palette failed"), "{}", message);
        }
        other => panic!("expected ConnectionFailed, got {:?}", other),
    }

    // Clear the fault before the delayed retry fires
    h.sim.fail_read(Channel::Palette, false);
    assert_eq!(
        next_status(&mut h.events).await,
        ConnectionStatus::Connecting { attempt: 2 }
    );
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Discovering);
    assert!(matches!(
        next_status(&mut h.events).await,
        ConnectionStatus::Connected { .. }
    ));
    assert_eq!(h.sim.scan_count(), 3);
    assert!(h.session.current_state().all_synced());
}

// =============================================================================
// Disconnect and shutdown
// =============================================================================

#[tokio::test]
async fn test_explicit_disconnect_does_not_reconnect() {
    let mut h = start(SessionOptions::default());
    connect_ready(&mut h).await;

    h.session.disconnect().await.unwrap();
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Disconnecting);
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Disconnected);
    assert_quiet(&mut h.events).await;

    assert!(!h.sim.is_connected());
    assert_eq!(h.sim.scan_count(), 1);
    assert_eq!(h.session.current_state(), SessionSnapshot::disconnected());

    // Idempotent once down
    h.session.disconnect().await.unwrap();
    assert_quiet(&mut h.events).await;
}

#[tokio::test]
async fn test_disconnect_aborts_connecting() {
    let mut h = start(SessionOptions::default());
    h.sim.hold_connect(true);

    h.session.connect().await.unwrap();
    assert_eq!(
        next_status(&mut h.events).await,
        ConnectionStatus::Connecting { attempt: 0 }
    );

    h.session.disconnect().await.unwrap();
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Disconnected);
    assert_eq!(h.session.current_state().state, SessionState::Disconnected);

    // The abandoned connect completes late and is closed again
    h.sim.hold_connect(false);
    h.sim.release_connect();
    tokio::time::sleep(QUIET_PERIOD).await;
    assert!(!h.sim.is_connected());
    assert_quiet(&mut h.events).await;

    // A fresh connect works normally
    connect_ready(&mut h).await;
}

#[tokio::test]
async fn test_disconnect_aborts_discovering() {
    let config = SimConfig {
        latency: Duration::from_millis(30),
        ..SimConfig::default()
    };
    let mut h = start_with(config, SessionOptions::default());

    h.session.connect().await.unwrap();
    assert_eq!(
        next_status(&mut h.events).await,
        ConnectionStatus::Connecting { attempt: 0 }
    );
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Discovering);

    h.session.disconnect().await.unwrap();
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Disconnected);
    assert_eq!(h.session.current_state(), SessionSnapshot::disconnected());

    // Late discovery results and the link closure are all discarded
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_quiet(&mut h.events).await;
    assert!(!h.sim.is_connected());
    assert_eq!(h.session.current_state(), SessionSnapshot::disconnected());
    assert_eq!(h.sim.scan_count(), 1);
}

#[tokio::test]
async fn test_shutdown_closes_session() {
    let mut h = start(SessionOptions::default());
    connect_ready(&mut h).await;

    h.session.shutdown().await;
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Disconnected);

    let clone = h.session.clone();
    assert_eq!(clone.connect().await, Err(SessionError::Closed));
    assert!(!clone.is_alive());
    assert_eq!(h.session.current_state().state, SessionState::Disconnected);
}
