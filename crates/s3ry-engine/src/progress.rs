use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

/// A raw per-job progress increment. Ephemeral; folded into the owning
/// transfer's slot as soon as the bus sees it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProgressDelta {
    pub(crate) transfer_id: u64,
    pub(crate) bytes: u64,
    pub(crate) items: u64,
}

#[derive(Debug)]
pub(crate) enum BusMsg {
    Started {
        transfer_id: u64,
        label: String,
        bytes_total: u64,
        items_total: u64,
    },
    Delta(ProgressDelta),
    /// Roll back bytes a failed attempt had already streamed, so a retry
    /// does not double-count them.
    Discard {
        transfer_id: u64,
        bytes: u64,
    },
    Finished {
        transfer_id: u64,
    },
}

/// A coalesced progress update. Subscribers observe at most one update per
/// transfer per coalescing window, plus one final update when the transfer
/// leaves the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    /// Engine-assigned transfer id.
    pub transfer_id: u64,
    /// Human-oriented label (object key or operation tag).
    pub label: String,
    /// Bytes accumulated so far. Grows monotonically except when a failed
    /// attempt's streamed bytes are rolled back before its retry.
    pub bytes_done: u64,
    /// Total expected bytes (0 when unknown, e.g. listings).
    pub bytes_total: u64,
    /// Discrete items completed (parts, pages, deletions).
    pub items_done: u64,
    /// Total expected items (0 when unknown).
    pub items_total: u64,
    /// True exactly once, on the final update for the transfer.
    pub finished: bool,
}

/// Everything currently on the board, for polling renderers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineSnapshot {
    /// In-flight transfers, ordered by transfer id.
    pub active: Vec<ProgressUpdate>,
}

#[derive(Debug)]
struct Slot {
    label: String,
    bytes_done: u64,
    bytes_total: u64,
    items_done: u64,
    items_total: u64,
    dirty: bool,
}

impl Slot {
    fn to_update(&self, transfer_id: u64, finished: bool) -> ProgressUpdate {
        ProgressUpdate {
            transfer_id,
            label: self.label.clone(),
            bytes_done: self.bytes_done,
            bytes_total: self.bytes_total,
            items_done: self.items_done,
            items_total: self.items_total,
            finished,
        }
    }
}

/// Cheap cloneable producer handle. Sends never block; workers stay off
/// the UI's critical path entirely.
#[derive(Debug, Clone)]
pub(crate) struct ProgressSink {
    tx: mpsc::UnboundedSender<BusMsg>,
}

impl ProgressSink {
    pub(crate) fn transfer_started(
        &self,
        transfer_id: u64,
        label: impl Into<String>,
        bytes_total: u64,
        items_total: u64,
    ) {
        let _ = self.tx.send(BusMsg::Started {
            transfer_id,
            label: label.into(),
            bytes_total,
            items_total,
        });
    }

    pub(crate) fn add(&self, transfer_id: u64, bytes: u64, items: u64) {
        let _ = self.tx.send(BusMsg::Delta(ProgressDelta {
            transfer_id,
            bytes,
            items,
        }));
    }

    pub(crate) fn discard(&self, transfer_id: u64, bytes: u64) {
        if bytes > 0 {
            let _ = self.tx.send(BusMsg::Discard { transfer_id, bytes });
        }
    }

    pub(crate) fn transfer_finished(&self, transfer_id: u64) {
        let _ = self.tx.send(BusMsg::Finished { transfer_id });
    }
}

/// Fan-in of per-job deltas, coalesced per transfer inside a fixed time
/// window and fanned out to any number of subscribers. Outlives individual
/// transfers; closed as part of engine shutdown.
pub(crate) struct ProgressBus {
    sink: ProgressSink,
    update_tx: broadcast::Sender<ProgressUpdate>,
    snapshot_rx: watch::Receiver<EngineSnapshot>,
    task: JoinHandle<()>,
}

impl ProgressBus {
    /// Default coalescing window: roughly one update per UI frame.
    pub(crate) const DEFAULT_WINDOW: Duration = Duration::from_millis(16);

    pub(crate) fn new(window: Duration) -> Self {
        let window = if window.is_zero() {
            Self::DEFAULT_WINDOW
        } else {
            window
        };

        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (update_tx, _) = broadcast::channel(1024);
        let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::default());

        let task = tokio::spawn(run_bus(window, msg_rx, update_tx.clone(), snapshot_tx));

        Self {
            sink: ProgressSink { tx: msg_tx },
            update_tx,
            snapshot_rx,
            task,
        }
    }

    pub(crate) fn sink(&self) -> ProgressSink {
        self.sink.clone()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.update_tx.subscribe()
    }

    pub(crate) fn snapshot(&self) -> EngineSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Close the bus and wait for the coalescer to drain.
    pub(crate) async fn shutdown(self) {
        let ProgressBus { sink, task, .. } = self;
        drop(sink);
        let _ = task.await;
    }
}

async fn run_bus(
    window: Duration,
    mut msg_rx: mpsc::UnboundedReceiver<BusMsg>,
    update_tx: broadcast::Sender<ProgressUpdate>,
    snapshot_tx: watch::Sender<EngineSnapshot>,
) {
    let mut slots: HashMap<u64, Slot> = HashMap::new();
    let mut tick = tokio::time::interval(window);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            msg = msg_rx.recv() => {
                let Some(msg) = msg else { break };
                match msg {
                    BusMsg::Started { transfer_id, label, bytes_total, items_total } => {
                        slots.insert(transfer_id, Slot {
                            label,
                            bytes_done: 0,
                            bytes_total,
                            items_done: 0,
                            items_total,
                            dirty: true,
                        });
                    }
                    BusMsg::Delta(delta) => {
                        if let Some(slot) = slots.get_mut(&delta.transfer_id) {
                            slot.bytes_done += delta.bytes;
                            slot.items_done += delta.items;
                            slot.dirty = true;
                        }
                    }
                    BusMsg::Discard { transfer_id, bytes } => {
                        if let Some(slot) = slots.get_mut(&transfer_id) {
                            slot.bytes_done = slot.bytes_done.saturating_sub(bytes);
                            slot.dirty = true;
                        }
                    }
                    BusMsg::Finished { transfer_id } => {
                        if let Some(slot) = slots.remove(&transfer_id) {
                            let _ = update_tx.send(slot.to_update(transfer_id, true));
                            publish_snapshot(&snapshot_tx, &slots);
                        }
                    }
                }
            }
            _ = tick.tick() => {
                let mut flushed = false;
                for (id, slot) in slots.iter_mut() {
                    if slot.dirty {
                        slot.dirty = false;
                        let _ = update_tx.send(slot.to_update(*id, false));
                        flushed = true;
                    }
                }
                if flushed {
                    publish_snapshot(&snapshot_tx, &slots);
                }
            }
        }
    }

    // Channel closed: flush whatever is still on the board.
    for (id, slot) in slots.iter() {
        let _ = update_tx.send(slot.to_update(*id, true));
    }
    let _ = snapshot_tx.send(EngineSnapshot::default());
}

fn publish_snapshot(snapshot_tx: &watch::Sender<EngineSnapshot>, slots: &HashMap<u64, Slot>) {
    let mut active: Vec<ProgressUpdate> = slots
        .iter()
        .map(|(id, slot)| slot.to_update(*id, false))
        .collect();
    active.sort_by_key(|u| u.transfer_id);
    let _ = snapshot_tx.send(EngineSnapshot { active });
}
