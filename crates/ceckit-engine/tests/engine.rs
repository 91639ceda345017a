//! End-to-end engine tests against the in-memory mock driver.

use std::sync::Arc;
use std::time::Duration;

use ceckit_bus::mock::{MockDevice, MockDriver, MockHandle};
use ceckit_bus::{
    AlertKind, BusEvent, KeyCode, LogicalAddress, Opcode, PhysicalAddress, PowerStatus,
};
use ceckit_engine::{
    BusCommandHandler, CecCommand, CecEngine, Device, EngineConfig, HostKey, IdentityKeymap,
};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Fixture {
    engine: CecEngine,
    handle: MockHandle,
    keys: mpsc::UnboundedReceiver<HostKey>,
}

fn start(config: EngineConfig, stage: impl FnOnce(&MockHandle)) -> Fixture {
    init_tracing();
    let driver = MockDriver::new();
    let handle = driver.handle();
    stage(&handle);
    let (key_tx, keys) = mpsc::unbounded_channel();
    let engine = CecEngine::spawn(config, Arc::new(driver), Arc::new(IdentityKeymap), key_tx);
    Fixture {
        engine,
        handle,
        keys,
    }
}

/// Poll `cond` until it holds or `deadline` passes.
async fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

#[tokio::test]
async fn test_commands_run_in_queue_order() {
    let f = start(EngineConfig::default(), |_| {});

    assert!(f.engine.enqueue_and_wait(CecCommand::MakeActive, WAIT).await);
    assert!(
        f.engine
            .enqueue_and_wait(CecCommand::MakeInactive, WAIT)
            .await
    );

    let calls = f.handle.calls();
    let active = calls.iter().position(|c| c == "set_active_source");
    let inactive = calls.iter().position(|c| c == "set_inactive_view");
    assert!(active.is_some() && inactive.is_some());
    assert!(active < inactive);
}

#[tokio::test]
async fn test_power_on_resolves_device_and_converges() {
    let f = start(EngineConfig::default(), |h| {
        h.add_device(
            LogicalAddress::PlaybackDevice1,
            MockDevice::new(PhysicalAddress(0x1000)),
        );
    });

    let command = CecCommand::PowerOn {
        device: Device::by_physical(PhysicalAddress(0x1000)),
    };
    assert!(f.engine.enqueue_and_wait(command, WAIT).await);
    assert!(f.handle.calls().contains(&"power_on(4)".to_string()));
}

#[tokio::test]
async fn test_disconnected_commands_drop_but_release_waiters() {
    let f = start(EngineConfig::default(), |h| {
        h.fail_discovery(true);
    });

    // The command is dropped, but the waiter must not hang.
    let command = CecCommand::PowerOn {
        device: Device::by_logical(LogicalAddress::Tv),
    };
    assert!(f.engine.enqueue_and_wait(command, WAIT).await);
    assert!(!f.engine.is_connected());
    assert!(f.handle.calls().is_empty());
}

#[tokio::test]
async fn test_enqueue_all_refused_while_disconnected() {
    let f = start(EngineConfig::default(), |h| {
        h.fail_discovery(true);
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let list = vec![CecCommand::MakeActive, CecCommand::MakeInactive];
    assert!(f.engine.enqueue_all(&list).is_err());

    // Lists without adapter-bound commands are fine.
    assert!(f.engine.enqueue_all(&[CecCommand::Connect]).is_ok());
}

#[tokio::test]
async fn test_connection_commands_interleave_with_script() {
    let f = start(EngineConfig::default(), |_| {});
    assert!(wait_until(WAIT, || f.engine.is_connected()).await);

    f.engine.enqueue(CecCommand::ExecShell {
        command: "sleep 0.4".to_string(),
    });
    // Let the script start so the exec queue is live.
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Disconnect must run while the script is still going.
    assert!(
        f.engine
            .enqueue_and_wait(CecCommand::Disconnect, Duration::from_secs(1))
            .await
    );
    assert!(!f.handle.is_connected());

    assert!(f.engine.enqueue_and_wait(CecCommand::Connect, WAIT).await);
    assert_eq!(f.handle.open_count(), 2);
}

#[tokio::test]
async fn test_device_listing_completes_during_script() {
    let f = start(EngineConfig::default(), |h| {
        h.add_device(LogicalAddress::Tv, MockDevice::new(PhysicalAddress(0x0000)));
    });
    assert!(wait_until(WAIT, || f.engine.is_connected()).await);

    f.engine.enqueue(CecCommand::ExecShell {
        command: "sleep 0.3".to_string(),
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Served once the script is done; must not hang even though the request
    // raced the script.
    let snapshot = tokio::time::timeout(WAIT, f.engine.list_devices())
        .await
        .unwrap();
    assert!(snapshot.connected);
    assert!(snapshot
        .devices
        .iter()
        .any(|d| d.address == LogicalAddress::Tv));
}

#[tokio::test]
async fn test_stop_lets_script_finish_and_runs_stop_commands() {
    let mut config = EngineConfig::default();
    config.on_stop = vec![CecCommand::TextViewOn {
        device: Device::by_logical(LogicalAddress::Tv),
    }];
    let f = start(config, |h| {
        h.add_device(LogicalAddress::Tv, MockDevice::new(PhysicalAddress(0x0000)));
    });
    assert!(wait_until(WAIT, || f.engine.is_connected()).await);

    f.engine.enqueue(CecCommand::ExecShell {
        command: "sleep 0.3".to_string(),
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Exit must queue behind the script and the stop commands, not preempt
    // them through the exec queue.
    f.engine.stop().await;

    let calls = f.handle.calls();
    assert!(calls.contains(&"transmit(0x0d, 0)".to_string()));
    assert_eq!(calls.last(), Some(&"close".to_string()));
    assert!(!f.engine.is_connected());
}

#[tokio::test]
async fn test_concurrent_waiters_all_complete() {
    init_tracing();
    let driver = MockDriver::new();
    let (key_tx, _keys) = mpsc::unbounded_channel();
    let engine = Arc::new(CecEngine::spawn(
        EngineConfig::default(),
        Arc::new(driver),
        Arc::new(IdentityKeymap),
        key_tx,
    ));

    // Far more simultaneous waiters than any burst the queues see in
    // production; every one of them must observe its own completion.
    let mut waits = Vec::new();
    for _ in 0..300 {
        let engine = engine.clone();
        waits.push(tokio::spawn(async move {
            engine.enqueue_and_wait(CecCommand::Connect, WAIT).await
        }));
    }
    for wait in waits {
        assert!(wait.await.unwrap());
    }
}

#[tokio::test]
async fn test_deferred_startup_runs_after_first_connect() {
    let mut config = EngineConfig::default();
    config.on_start = vec![CecCommand::MakeActive];
    let f = start(config, |h| {
        h.fail_open(true);
    });

    // The initial connect fails; startup commands must wait.
    tokio::time::sleep(Duration::from_millis(100)).await;
    f.engine.startup();
    assert!(!f.handle.calls().contains(&"set_active_source".to_string()));

    f.handle.fail_open(false);
    assert!(f.engine.enqueue_and_wait(CecCommand::Connect, WAIT).await);

    let handle = f.handle.clone();
    assert!(
        wait_until(WAIT, move || {
            handle.calls().contains(&"set_active_source".to_string())
        })
        .await
    );
}

#[tokio::test]
async fn test_key_repeats_are_suppressed() {
    let mut f = start(EngineConfig::default(), |_| {});
    assert!(wait_until(WAIT, || f.engine.is_connected()).await);

    let code = KeyCode(0x44);
    assert!(f.handle.emit(BusEvent::KeyPress {
        code,
        duration_ms: 0
    }));
    // Auto-repeat of the held key, must be dropped.
    assert!(f.handle.emit(BusEvent::KeyPress {
        code,
        duration_ms: 500
    }));
    // A fresh press of the same key goes through.
    assert!(f.handle.emit(BusEvent::KeyPress {
        code,
        duration_ms: 0
    }));

    let first = tokio::time::timeout(WAIT, f.keys.recv()).await;
    assert_eq!(first.unwrap(), Some(HostKey(0x44)));
    let second = tokio::time::timeout(WAIT, f.keys.recv()).await;
    assert_eq!(second.unwrap(), Some(HostKey(0x44)));
    // No third delivery from the suppressed repeat.
    let third = tokio::time::timeout(Duration::from_millis(200), f.keys.recv()).await;
    assert!(third.is_err());
}

#[tokio::test]
async fn test_bus_handler_matches_opcode_and_initiator() {
    let mut config = EngineConfig::default();
    config.bus_handlers = vec![BusCommandHandler {
        opcode: Opcode::STANDBY,
        initiator: Some(LogicalAddress::Tv),
        commands: vec![CecCommand::Disconnect],
    }];
    let f = start(config, |_| {});
    assert!(wait_until(WAIT, || f.engine.is_connected()).await);

    // Wrong initiator, no reaction.
    assert!(f.handle.emit(BusEvent::CommandReceived {
        opcode: Opcode::STANDBY,
        initiator: LogicalAddress::AudioSystem,
    }));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(f.engine.is_connected());

    assert!(f.handle.emit(BusEvent::CommandReceived {
        opcode: Opcode::STANDBY,
        initiator: LogicalAddress::Tv,
    }));
    assert!(wait_until(WAIT, || !f.engine.is_connected()).await);
}

#[tokio::test]
async fn test_connection_lost_triggers_reconnect() {
    let f = start(EngineConfig::default(), |_| {});
    assert!(wait_until(WAIT, || f.engine.is_connected()).await);
    assert_eq!(f.handle.open_count(), 1);

    assert!(f.handle.emit(BusEvent::Alert(AlertKind::ConnectionLost)));

    // Reconnect includes a settle delay before the new open.
    let handle = f.handle.clone();
    assert!(wait_until(WAIT, move || handle.open_count() == 2).await);
    assert!(f.engine.is_connected());
}

#[tokio::test]
async fn test_exec_toggle_picks_list_by_power_state() {
    let f = start(EngineConfig::default(), |h| {
        let mut tv = MockDevice::new(PhysicalAddress(0x0000));
        tv.power = PowerStatus::On;
        h.add_device(LogicalAddress::Tv, tv);
    });

    let command = CecCommand::ExecToggle {
        device: Device::by_logical(LogicalAddress::Tv),
        on_power_on: vec![CecCommand::PowerOff {
            device: Device::by_logical(LogicalAddress::Tv),
        }],
        on_power_off: vec![CecCommand::PowerOn {
            device: Device::by_logical(LogicalAddress::Tv),
        }],
    };
    assert!(f.engine.enqueue_and_wait(command, WAIT).await);

    // The device was on, so the on-list ran and put it into standby.
    let handle = f.handle.clone();
    assert!(
        wait_until(WAIT, move || {
            handle.calls().contains(&"standby(0)".to_string())
        })
        .await
    );
    assert!(!f.handle.calls().contains(&"power_on(0)".to_string()));
}

#[tokio::test]
async fn test_status_and_device_listing() {
    let f = start(EngineConfig::default(), |h| {
        let mut tv = MockDevice::new(PhysicalAddress(0x0000));
        tv.osd_name = "TV".to_string();
        h.add_device(LogicalAddress::Tv, tv);
    });
    assert!(wait_until(WAIT, || f.engine.is_connected()).await);

    let status = f.engine.status();
    assert!(status.connected);

    let snapshot = f.engine.list_devices().await;
    assert!(snapshot.connected);
    assert_eq!(snapshot.adapters.len(), 1);

    let tv = snapshot
        .devices
        .iter()
        .find(|d| d.address == LogicalAddress::Tv)
        .unwrap();
    assert_eq!(tv.osd_name, "TV");
    assert!(!tv.is_own);
    assert!(tv.power.is_some());

    // The mock registers one own address; its power is never queried.
    let own = snapshot.devices.iter().find(|d| d.is_own).unwrap();
    assert_eq!(own.address, LogicalAddress::RecordingDevice1);
    assert!(own.power.is_none());
}

#[tokio::test]
async fn test_stop_runs_stop_commands_and_joins_worker() {
    let mut config = EngineConfig::default();
    config.on_stop = vec![CecCommand::TextViewOn {
        device: Device::by_logical(LogicalAddress::Tv),
    }];
    let f = start(config, |h| {
        h.add_device(LogicalAddress::Tv, MockDevice::new(PhysicalAddress(0x0000)));
    });
    assert!(wait_until(WAIT, || f.engine.is_connected()).await);

    f.engine.stop().await;

    let calls = f.handle.calls();
    assert!(calls.contains(&"transmit(0x0d, 0)".to_string()));
    assert_eq!(calls.last(), Some(&"close".to_string()));
    assert!(!f.engine.is_connected());
}

#[tokio::test]
async fn test_serial_reuse_after_wraparound() {
    let f = start(EngineConfig::default(), |_| {});
    assert!(wait_until(WAIT, || f.engine.is_connected()).await);

    // Burn through a full serial cycle; Connect on an open adapter is a
    // no-op, so every wait must still complete after the counter wraps.
    for _ in 0..(ceckit_engine::SERIAL_MAX as u32 + 5) {
        assert!(f.engine.enqueue_and_wait(CecCommand::Connect, WAIT).await);
    }
    assert_eq!(f.handle.open_count(), 1);
}

#[tokio::test]
async fn test_list_devices_while_disconnected() {
    let f = start(EngineConfig::default(), |h| {
        h.fail_discovery(true);
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snapshot = f.engine.list_devices().await;
    assert!(!snapshot.connected);
    assert!(snapshot.devices.is_empty());
    assert_eq!(snapshot.to_string(), "adapter disconnected");
}
