use std::io;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::limits::JOURNAL_CHANNEL_CAPACITY;
use crate::model::Event;
use crate::observability::{JOURNAL_FLUSH_BATCH_SIZE, JOURNAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

use super::error::StoreError;

enum JournalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        snapshot: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = Vec<(Event, oneshot::Sender<io::Result<()>>)>;

/// Handle to the journal writer task. Cheap to share; all writes funnel
/// through one task, which owns the `Wal`.
pub(super) struct Journal {
    tx: mpsc::Sender<JournalCommand>,
}

impl Journal {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub(super) fn spawn(wal: Wal) -> Self {
        let (tx, rx) = mpsc::channel(JOURNAL_CHANNEL_CAPACITY);
        tokio::spawn(writer_loop(wal, rx));
        Self { tx }
    }

    /// Durably append one record. Returns once it has been fsynced.
    pub(super) async fn append(&self, event: &Event) -> Result<(), StoreError> {
        let (response, rx) = oneshot::channel();
        self.send(JournalCommand::Append {
            event: event.clone(),
            response,
        })
        .await?;
        rx.await
            .map_err(|_| StoreError::Journal("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Journal(e.to_string()))
    }

    /// Replace the journal with `snapshot`. Appends queued before this call
    /// land in the old file first.
    pub(super) async fn compact(&self, snapshot: Vec<Event>) -> Result<(), StoreError> {
        let (response, rx) = oneshot::channel();
        self.send(JournalCommand::Compact { snapshot, response }).await?;
        rx.await
            .map_err(|_| StoreError::Journal("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Journal(e.to_string()))
    }

    pub(super) async fn appends_since_compact(&self) -> u64 {
        let (response, rx) = oneshot::channel();
        if self
            .send(JournalCommand::AppendsSinceCompact { response })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    async fn send(&self, cmd: JournalCommand) -> Result<(), StoreError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| StoreError::Journal("journal writer shut down".into()))
    }
}

/// Group commit: wait for one append, sweep up every append already queued,
/// then write and fsync the whole batch once.
async fn writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut batch: Pending = match cmd {
            JournalCommand::Append { event, response } => vec![(event, response)],
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };

        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                JournalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Control commands see every append queued before them.
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
    tracing::debug!("journal writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: Pending) {
    metrics::histogram!(JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes do not leak
    // into the next batch; the whole batch is reported failed either way.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(JOURNAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("journal flush failed for {} records: {e}", batch.len());
    }

    for (_, response) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = response.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { snapshot, response } => {
            let result =
                Wal::write_snapshot(wal.path(), &snapshot).and_then(|()| wal.swap_snapshot());
            match &result {
                Ok(()) => tracing::info!("journal compacted to {} records", snapshot.len()),
                Err(e) => tracing::error!("journal compaction failed: {e}"),
            }
            let _ = response.send(result);
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        JournalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}
