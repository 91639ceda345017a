//! Command queues.
//!
//! Unbounded FIFO with a front-insertion escape hatch for the priority
//! reconnect path. Two instances exist per engine: the main queue and the
//! exec queue that is live only while a script runs.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tokio::sync::Notify;

use crate::command::{CecCommand, Serial};
use crate::lifecycle::BusSnapshot;

/// Work carried by a queue entry.
#[derive(Debug)]
pub(crate) enum WorkItem {
    /// A regular command.
    Command(CecCommand),
    /// Control-plane device snapshot request, answered on the worker so the
    /// adapter is only ever touched by one task.
    Snapshot(oneshot::Sender<BusSnapshot>),
}

/// A queue entry: the work plus an optional completion serial.
#[derive(Debug)]
pub(crate) struct QueuedCommand {
    pub item: WorkItem,
    pub serial: Option<Serial>,
}

impl QueuedCommand {
    pub fn new(command: CecCommand) -> Self {
        Self {
            item: WorkItem::Command(command),
            serial: None,
        }
    }

    pub fn with_serial(command: CecCommand, serial: Serial) -> Self {
        Self {
            item: WorkItem::Command(command),
            serial: Some(serial),
        }
    }
}

/// An ordered, unbounded command queue with a single consumer.
#[derive(Debug, Default)]
pub(crate) struct CommandQueue {
    inner: Mutex<VecDeque<QueuedCommand>>,
    notify: Notify,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command and wake the consumer.
    pub fn push_back(&self, command: QueuedCommand) {
        self.inner.lock().unwrap().push_back(command);
        self.notify.notify_one();
    }

    /// Prepend a command (priority pre-emption) and wake the consumer.
    pub fn push_front(&self, command: QueuedCommand) {
        self.inner.lock().unwrap().push_front(command);
        self.notify.notify_one();
    }

    /// Take the next command without waiting.
    pub fn try_pop(&self) -> Option<QueuedCommand> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Take the next command, parking until one arrives.
    pub async fn pop(&self) -> QueuedCommand {
        loop {
            let notified = self.notify.notified();
            if let Some(command) = self.try_pop() {
                return command;
            }
            notified.await;
        }
    }

    /// Current queue depth.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn cmd(command: CecCommand) -> QueuedCommand {
        QueuedCommand::new(command)
    }

    fn kind(entry: &QueuedCommand) -> &'static str {
        match &entry.item {
            WorkItem::Command(c) => c.kind_name(),
            WorkItem::Snapshot(_) => "snapshot",
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = CommandQueue::new();
        queue.push_back(cmd(CecCommand::MakeActive));
        queue.push_back(cmd(CecCommand::MakeInactive));
        queue.push_back(cmd(CecCommand::Connect));

        assert_eq!(queue.len(), 3);
        assert_eq!(kind(&queue.pop().await), "make_active");
        assert_eq!(kind(&queue.pop().await), "make_inactive");
        assert_eq!(kind(&queue.pop().await), "connect");
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_push_front_preempts() {
        let queue = CommandQueue::new();
        queue.push_back(cmd(CecCommand::MakeActive));
        queue.push_back(cmd(CecCommand::MakeInactive));
        queue.push_front(cmd(CecCommand::Reconnect));

        assert_eq!(kind(&queue.pop().await), "reconnect");
        assert_eq!(kind(&queue.pop().await), "make_active");
        assert_eq!(kind(&queue.pop().await), "make_inactive");
    }

    #[tokio::test]
    async fn test_pop_parks_until_push() {
        let queue = Arc::new(CommandQueue::new());

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.push_back(cmd(CecCommand::Exit));
        let entry = consumer.await.unwrap();
        assert_eq!(kind(&entry), "exit");
    }

    #[test]
    fn test_try_pop_empty() {
        let queue = CommandQueue::new();
        assert!(queue.try_pop().is_none());
    }
}
