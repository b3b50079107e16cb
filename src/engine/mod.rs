mod error;
mod ledger;
mod registry;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use ledger::{BookingLedger, SharedRoomBook};
pub use registry::RoomRegistry;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::model::Event;
use crate::notify::NotifyHub;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Send one event through the group-commit writer. Failure means the event
/// was not durably stored; callers must not apply it to in-memory state.
pub(super) async fn append_event(
    tx: &mpsc::Sender<WalCommand>,
    event: &Event,
) -> Result<(), EngineError> {
    let (resp_tx, resp_rx) = oneshot::channel();
    tx.send(WalCommand::Append {
        event: event.clone(),
        response: resp_tx,
    })
    .await
    .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
    resp_rx
        .await
        .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::Storage(e.to_string()))
}

/// One tenant's booking core: the room registry and the booking ledger,
/// sharing a single write-ahead log.
///
/// The two components never call each other. The orchestrating layer (wire
/// handler, tests) invokes the ledger's reconciliation hooks after a
/// registry mutation succeeded.
pub struct Engine {
    pub registry: RoomRegistry,
    pub ledger: BookingLedger,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    /// Replay the WAL, seed default rooms on a first run (empty log), and
    /// spawn the group-commit writer.
    pub fn open(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        seed_defaults: bool,
    ) -> io::Result<Self> {
        let mut events = Wal::replay(&wal_path)?;
        let mut wal = Wal::open(&wal_path)?;

        if events.is_empty() && seed_defaults {
            let seeds = registry::seed_events();
            for event in &seeds {
                wal.append_buffered(event)?;
            }
            wal.flush_sync()?;
            events = seeds;
        }

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            registry: RoomRegistry::new(wal_tx.clone(), notify.clone()),
            ledger: BookingLedger::new(wal_tx.clone(), notify.clone()),
            wal_tx,
            notify,
        };

        // Replay — we're the sole owner here, so the uncontended try-locks
        // inside apply_replay always succeed instantly. Never block on locks
        // here because this may run inside an async context (lazy tenant
        // creation).
        for event in &events {
            engine.registry.apply_replay(event);
            engine.ledger.apply_replay(event);
        }

        Ok(engine)
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state: one create per room, one add per booking.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = self.registry.snapshot_events();
        events.extend(self.ledger.snapshot_events());

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
