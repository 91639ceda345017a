//! Command dispatch engine.
//!
//! A single worker task owns the adapter connection and executes commands
//! in queue order. Producers (host frontends, driver events, configuration
//! handlers) only ever enqueue; synchronous callers correlate completion
//! through per-command serials the worker signals as it finishes each one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ceckit_bus::{AlertKind, BusEvent, CecDriver, DriverLogLevel, KeyCode, PowerStatus};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::command::{CecCommand, Device, Serial, SerialCounter};
use crate::config::EngineConfig;
use crate::exec::run_script;
use crate::keymap::{HostKey, KeyTranslator};
use crate::lifecycle::{BusSnapshot, ConnectionManager};
use crate::queue::{CommandQueue, QueuedCommand, WorkItem};
use crate::resolver;

/// How long `stop` waits for the worker to process the exit command.
const STOP_TIMEOUT: Duration = Duration::from_millis(5000);

/// Errors surfaced to producers at enqueue time.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("adapter not connected")]
    Disconnected,
}

/// State shared between the engine handle, the worker and the event pump.
pub(crate) struct Shared {
    pub main: CommandQueue,
    pub exec: CommandQueue,
    /// True while a script runs and the exec queue is live.
    pub in_exec: AtomicBool,
    /// Producer-visible adapter connectivity.
    pub connected: AtomicBool,
    /// Set when startup command lists must wait for the first connect.
    pub deferred_startup: AtomicBool,
    pub serials: SerialCounter,
    /// Pending synchronous waiters, keyed by serial. Per-waiter channels
    /// cannot drop a completion no matter how far a waiter falls behind.
    pub waiters: Mutex<HashMap<Serial, oneshot::Sender<()>>>,
    /// Last bus key seen, for repeat suppression.
    pub last_key: Mutex<Option<KeyCode>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            main: CommandQueue::new(),
            exec: CommandQueue::new(),
            in_exec: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            deferred_startup: AtomicBool::new(false),
            serials: SerialCounter::new(),
            waiters: Mutex::new(HashMap::new()),
            last_key: Mutex::new(None),
        }
    }

    /// The queue the worker is currently draining.
    pub fn live_queue(&self) -> &CommandQueue {
        if self.in_exec.load(Ordering::SeqCst) {
            &self.exec
        } else {
            &self.main
        }
    }

    /// Announce completion of a serialized command. Never blocks; a serial
    /// whose waiter already timed out and deregistered is fine.
    pub fn publish(&self, serial: Option<Serial>) {
        if let Some(serial) = serial {
            if let Some(waiter) = self.waiters.lock().unwrap().remove(&serial) {
                let _ = waiter.send(());
            }
        }
    }

    /// Append a command list to the main queue, unserialized.
    pub fn push_list(&self, commands: &[CecCommand]) {
        for command in commands {
            self.main.push_back(QueuedCommand::new(command.clone()));
        }
    }
}

/// Point-in-time engine health for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub connected: bool,
    pub main_queue: usize,
    pub exec_queue: usize,
    pub driver_log_mask: u8,
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "driver log mask {:#04x}, queued commands (main {}, exec {}), adapter {}",
            self.driver_log_mask,
            self.main_queue,
            self.exec_queue,
            if self.connected {
                "connected"
            } else {
                "disconnected"
            }
        )
    }
}

/// Handle to a running engine.
pub struct CecEngine {
    shared: Arc<Shared>,
    config: Arc<EngineConfig>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CecEngine {
    /// Start the worker task and return its handle.
    pub fn spawn(
        config: EngineConfig,
        driver: Arc<dyn CecDriver>,
        keymap: Arc<dyn KeyTranslator>,
        key_sink: mpsc::UnboundedSender<HostKey>,
    ) -> Self {
        let config = Arc::new(config);
        let shared = Arc::new(Shared::new());
        let worker = Worker {
            shared: shared.clone(),
            config: config.clone(),
            manager: ConnectionManager::new(driver, config.clone(), shared.clone()),
            keymap,
            key_sink,
        };
        let handle = tokio::spawn(worker.run());
        Self {
            shared,
            config,
            worker: Mutex::new(Some(handle)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Append a command to the main queue.
    pub fn enqueue(&self, command: CecCommand) {
        self.shared.main.push_back(QueuedCommand::new(command));
    }

    /// Append a command list to the main queue, refusing lists that need an
    /// adapter while disconnected so the caller can report the failure.
    pub fn enqueue_all(&self, commands: &[CecCommand]) -> Result<(), EngineError> {
        if !self.is_connected() && commands.iter().any(|c| c.needs_adapter()) {
            return Err(EngineError::Disconnected);
        }
        self.shared.push_list(commands);
        Ok(())
    }

    /// Prepend a command to the live queue, ahead of anything pending.
    pub fn enqueue_priority(&self, command: CecCommand) {
        self.shared.live_queue().push_front(QueuedCommand::new(command));
    }

    /// Enqueue `command` and wait until the worker has processed it, up to
    /// `timeout`. Returns false on timeout; the command itself stays queued
    /// and still runs.
    pub async fn enqueue_and_wait(&self, command: CecCommand, timeout: Duration) -> bool {
        let serial = self.shared.serials.next();
        // Register before pushing so the completion cannot be missed.
        let (done_tx, done_rx) = oneshot::channel();
        self.shared.waiters.lock().unwrap().insert(serial, done_tx);

        // Connection management may interleave with a running script; all
        // other kinds (exit included) wait for the script to finish on the
        // main queue.
        let to_exec = self.shared.in_exec.load(Ordering::SeqCst)
            && matches!(command, CecCommand::Connect | CecCommand::Disconnect);
        let kind = command.kind_name();
        let entry = QueuedCommand::with_serial(command, serial);
        if to_exec {
            self.shared.exec.push_back(entry);
        } else {
            self.shared.main.push_back(entry);
        }

        match tokio::time::timeout(timeout, done_rx).await {
            Ok(done) => done.is_ok(),
            Err(_) => {
                warn!("timed out waiting for command {kind} (serial {serial})");
                self.shared.waiters.lock().unwrap().remove(&serial);
                false
            }
        }
    }

    /// Queue the configured startup command lists, or defer them to the
    /// first successful connect when the adapter is not up yet.
    pub fn startup(&self) {
        if !self.is_connected() {
            debug!("adapter not connected yet, deferring startup commands");
            self.shared.deferred_startup.store(true, Ordering::SeqCst);
            return;
        }
        if self.config.started_manually {
            self.shared.push_list(&self.config.on_manual_start);
        }
        self.shared.push_list(&self.config.on_start);
    }

    /// Run the configured stop commands, shut the worker down and wait for
    /// it to finish.
    pub async fn stop(&self) {
        self.shared.push_list(&self.config.on_stop);
        if !self.enqueue_and_wait(CecCommand::Exit, STOP_TIMEOUT).await {
            warn!("worker did not confirm exit in time");
        }
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("worker task failed: {e}");
            }
        }
    }

    pub fn status(&self) -> EngineStatus {
        let (main_queue, exec_queue) = self.queue_depths();
        EngineStatus {
            connected: self.is_connected(),
            main_queue,
            exec_queue,
            driver_log_mask: self.config.driver_log_mask,
        }
    }

    pub fn queue_depths(&self) -> (usize, usize) {
        (self.shared.main.len(), self.shared.exec.len())
    }

    /// Snapshot the adapter and active bus devices. Served on the worker so
    /// adapter access stays single-owner.
    pub async fn list_devices(&self) -> BusSnapshot {
        if !self.is_connected() {
            return BusSnapshot::disconnected();
        }
        // Always through the main queue: a request racing a script's end
        // could strand on the exec queue, and waiting out the script is fine.
        let (tx, rx) = oneshot::channel();
        self.shared.main.push_back(QueuedCommand {
            item: WorkItem::Snapshot(tx),
            serial: None,
        });
        match rx.await {
            Ok(snapshot) => snapshot,
            Err(_) => BusSnapshot::disconnected(),
        }
    }

    /// Feed a driver event into the engine, as the event pump does.
    pub fn ingest(&self, event: BusEvent) {
        ingest_event(&self.shared, &self.config, event);
    }
}

/// Translate one driver event into queue traffic and logging.
pub(crate) fn ingest_event(shared: &Arc<Shared>, config: &EngineConfig, event: BusEvent) {
    match event {
        BusEvent::KeyPress { code, duration_ms } => {
            if !code.is_valid() {
                debug!("ignoring out-of-range key code {code}");
                return;
            }
            let mut last = shared.last_key.lock().unwrap();
            // Repeats carry a nonzero duration and the same code.
            if duration_ms == 0 || *last != Some(code) {
                *last = Some(code);
                shared
                    .main
                    .push_back(QueuedCommand::new(CecCommand::KeyPress { code }));
            }
        }
        BusEvent::CommandReceived { opcode, initiator } => {
            shared
                .main
                .push_back(QueuedCommand::new(CecCommand::BusCommand {
                    opcode,
                    initiator,
                }));
        }
        BusEvent::Alert(AlertKind::ConnectionLost) => {
            error!("connection to adapter lost, scheduling reconnect");
            shared
                .live_queue()
                .push_front(QueuedCommand::new(CecCommand::Reconnect));
        }
        BusEvent::Alert(kind) => {
            info!("driver alert: {}", kind.type_name());
        }
        BusEvent::Log { level, message } => {
            if config.logs_driver_level(level) {
                if level == DriverLogLevel::Error {
                    error!("driver: {message}");
                } else {
                    debug!("driver [{level}]: {message}");
                }
            }
        }
        BusEvent::SourceActivated { address, activated } => {
            debug!(
                "source {address} {}",
                if activated { "activated" } else { "deactivated" }
            );
        }
        BusEvent::ConfigurationChanged => {
            debug!("driver configuration changed");
        }
    }
}

/// The single task that owns the connection and executes commands.
struct Worker {
    shared: Arc<Shared>,
    config: Arc<EngineConfig>,
    manager: ConnectionManager,
    keymap: Arc<dyn KeyTranslator>,
    key_sink: mpsc::UnboundedSender<HostKey>,
}

impl Worker {
    async fn run(mut self) {
        let delay = self.config.startup_delay();
        if !delay.is_zero() {
            debug!("delaying first connect by {delay:?}");
            tokio::time::sleep(delay).await;
        }
        self.manager.connect().await;

        loop {
            let entry = self.shared.main.pop().await;
            match entry.item {
                WorkItem::Snapshot(reply) => {
                    let _ = reply.send(self.manager.snapshot());
                }
                WorkItem::Command(command) => {
                    debug!("executing command {}", command.kind_name());
                    let exit = self.dispatch(command).await;
                    self.shared.publish(entry.serial);
                    if exit {
                        break;
                    }
                }
            }
        }

        self.manager.disconnect();
        info!("worker stopped");
    }

    /// Execute one command. Returns true when the worker should exit.
    async fn dispatch(&mut self, command: CecCommand) -> bool {
        if command.needs_adapter() && !self.manager.is_connected() {
            // Dropped, not requeued: a stale action after a reconnect is
            // worse than a missed one. Waiters are still released.
            error!(
                "dropping command {} while adapter is disconnected",
                command.kind_name()
            );
            return false;
        }

        match command {
            CecCommand::Exit => return true,
            CecCommand::KeyPress { code } => {
                let keys = self.keymap.cec_to_host(code);
                if keys.is_empty() {
                    debug!("bus key {code} has no host mapping");
                }
                for key in keys {
                    if self.key_sink.send(key).is_err() {
                        error!("host key receiver went away");
                        break;
                    }
                }
            }
            CecCommand::MakeActive => {
                if let Some(conn) = self.manager.conn() {
                    if let Err(e) = conn.set_active_source() {
                        error!("set active source failed: {e}");
                    }
                }
            }
            CecCommand::MakeInactive => {
                if let Some(conn) = self.manager.conn() {
                    if let Err(e) = conn.set_inactive_view() {
                        error!("set inactive view failed: {e}");
                    }
                }
            }
            CecCommand::PowerOn { mut device } => {
                if let Some(address) = self.resolve(&mut device) {
                    let sent = match self.manager.conn() {
                        Some(conn) => match conn.power_on(address) {
                            Ok(()) => true,
                            Err(e) => {
                                error!("power on {address} failed: {e}");
                                false
                            }
                        },
                        None => false,
                    };
                    if sent {
                        self.manager.wait_for_power(address, PowerStatus::On).await;
                    }
                }
            }
            CecCommand::PowerOff { mut device } => {
                if let Some(address) = self.resolve(&mut device) {
                    let sent = match self.manager.conn() {
                        Some(conn) => match conn.standby(address) {
                            Ok(()) => true,
                            Err(e) => {
                                error!("standby {address} failed: {e}");
                                false
                            }
                        },
                        None => false,
                    };
                    if sent {
                        self.manager
                            .wait_for_power(address, PowerStatus::Standby)
                            .await;
                    }
                }
            }
            CecCommand::TextViewOn { mut device } => {
                if let Some(address) = self.resolve(&mut device) {
                    if let Some(conn) = self.manager.conn() {
                        if let Err(e) = conn.transmit(ceckit_bus::Opcode::TEXT_VIEW_ON, address) {
                            error!("text view on to {address} failed: {e}");
                        }
                    }
                }
            }
            CecCommand::HostKey { key, mut device } => {
                if let Some(address) = self.resolve(&mut device) {
                    let codes = self.keymap.host_to_cec(key);
                    if codes.is_empty() {
                        debug!("host key {key} has no bus mapping");
                    }
                    if let Some(conn) = self.manager.conn() {
                        for code in codes {
                            if let Err(e) = conn.send_key_press(address, code) {
                                error!("key press {code} to {address} failed: {e}");
                                continue;
                            }
                            if let Err(e) = conn.send_key_release(address) {
                                error!("key release to {address} failed: {e}");
                            }
                        }
                    }
                }
            }
            CecCommand::ExecShell { command } => {
                return run_script(&self.shared, &mut self.manager, &command).await;
            }
            CecCommand::ExecToggle {
                mut device,
                on_power_on,
                on_power_off,
            } => {
                if let Some(address) = self.resolve(&mut device) {
                    let status = match self.manager.conn() {
                        Some(conn) => conn.device_power_status(address),
                        None => return false,
                    };
                    debug!("toggle target {address} reports {status}");
                    if status.is_on() {
                        self.shared.push_list(&on_power_on);
                    } else {
                        self.shared.push_list(&on_power_off);
                    }
                }
            }
            CecCommand::BusCommand { opcode, initiator } => {
                let mut matched = false;
                for handler in &self.config.bus_handlers {
                    if handler.opcode != opcode {
                        continue;
                    }
                    if let Some(wanted) = handler.initiator {
                        if wanted != initiator {
                            continue;
                        }
                    }
                    matched = true;
                    self.shared.push_list(&handler.commands);
                }
                if !matched {
                    debug!("no handler for bus opcode {opcode} from {initiator}");
                }
            }
            CecCommand::Connect => self.manager.connect().await,
            CecCommand::Disconnect => self.manager.disconnect(),
            CecCommand::Reconnect => self.manager.reconnect().await,
        }
        false
    }

    fn resolve(&mut self, device: &mut Device) -> Option<ceckit_bus::LogicalAddress> {
        let conn = self.manager.conn()?;
        let address = resolver::resolve(conn, device);
        if address.is_unknown() {
            None
        } else {
            Some(address)
        }
    }
}
