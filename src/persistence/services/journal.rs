//! Write-behind journal.
//!
//! Callers mark entities dirty without awaiting storage. A single worker
//! drains the queue in order and, for each entry, asks the
//! [`SnapshotSource`] for the entity's state at write time. The last write
//! for a key therefore always reflects the latest mutation, however the
//! marking callers interleaved.

use crate::error::{Classify, ErrorClass};
use crate::persistence::{
    domain::{Document, EntityRef},
    ports::{DocumentStore, DocumentStoreError, SnapshotSource},
};
use mockable::Clock;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Counts of journal work completed since the previous flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalReport {
    /// Documents written.
    pub written: u64,
    /// Documents deleted.
    pub deleted: u64,
}

/// Errors surfaced by [`Journal::flush`].
#[derive(Debug, Clone, Error)]
pub enum JournalError {
    /// The worker is no longer running.
    #[error("journal worker stopped")]
    Closed,

    /// Some writes since the previous flush failed.
    #[error("{failed} journal writes failed, last: {source}")]
    WritesFailed {
        /// Failed writes.
        failed: u64,
        /// Latest failure.
        source: DocumentStoreError,
        /// Work that did succeed.
        report: JournalReport,
    },
}

impl Classify for JournalError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Closed => ErrorClass::Internal,
            Self::WritesFailed { source, .. } => source.class(),
        }
    }

    fn entity_id(&self) -> Option<String> {
        match self {
            Self::Closed => None,
            Self::WritesFailed { source, .. } => source.entity_id(),
        }
    }
}

#[derive(Debug)]
enum Command {
    Sync(EntityRef),
    Delete(EntityRef),
    Flush(oneshot::Sender<Result<JournalReport, JournalError>>),
}

#[derive(Debug, Default)]
struct Tally {
    report: JournalReport,
    failed: u64,
    last_error: Option<DocumentStoreError>,
}

impl Tally {
    fn fail(&mut self, entity: EntityRef, err: DocumentStoreError) {
        tracing::warn!(entity = %entity, error = %err, "journal write failed");
        self.failed = self.failed.saturating_add(1);
        self.last_error = Some(err);
    }

    fn settle(&mut self) -> Result<JournalReport, JournalError> {
        let Self {
            report,
            failed,
            last_error,
        } = std::mem::take(self);
        last_error.map_or(Ok(report), |source| {
            Err(JournalError::WritesFailed {
                failed,
                source,
                report,
            })
        })
    }
}

/// Handle to the background journal worker.
///
/// Clones feed the same worker. The worker stops once every handle is
/// dropped and the queue is drained.
#[derive(Debug, Clone)]
pub struct Journal {
    commands: mpsc::UnboundedSender<Command>,
}

impl Journal {
    /// Starts the worker on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn spawn<C>(
        store: Arc<dyn DocumentStore>,
        source: Arc<dyn SnapshotSource>,
        clock: Arc<C>,
    ) -> Self
    where
        C: Clock + Send + Sync + 'static,
    {
        let (commands, queue) = mpsc::unbounded_channel();
        tokio::spawn(run(queue, store, source, clock));
        Self { commands }
    }

    /// Marks an entity dirty. Its current state is written later.
    pub fn record(&self, entity: EntityRef) {
        self.enqueue(Command::Sync(entity));
    }

    /// Schedules deletion of an entity's document.
    pub fn forget(&self, entity: EntityRef) {
        self.enqueue(Command::Delete(entity));
    }

    fn enqueue(&self, command: Command) {
        if let Err(err) = self.commands.send(command) {
            tracing::error!(command = ?err.0, "journal worker stopped, write dropped");
        }
    }

    /// Waits until everything queued before this call has been written.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::WritesFailed`] when any write since the
    /// previous flush failed, and [`JournalError::Closed`] when the worker
    /// is gone.
    pub async fn flush(&self) -> Result<JournalReport, JournalError> {
        let (reply, settled) = oneshot::channel();
        self.commands
            .send(Command::Flush(reply))
            .map_err(|_| JournalError::Closed)?;
        settled.await.map_err(|_| JournalError::Closed)?
    }
}

async fn run<C>(
    mut queue: mpsc::UnboundedReceiver<Command>,
    store: Arc<dyn DocumentStore>,
    source: Arc<dyn SnapshotSource>,
    clock: Arc<C>,
) where
    C: Clock + Send + Sync,
{
    let mut tally = Tally::default();
    while let Some(command) = queue.recv().await {
        match command {
            Command::Sync(entity) => match sync(&*store, &*source, &*clock, entity).await {
                Ok(Applied::Written) => {
                    tally.report.written = tally.report.written.saturating_add(1);
                }
                Ok(Applied::Deleted) => {
                    tally.report.deleted = tally.report.deleted.saturating_add(1);
                }
                Err(err) => tally.fail(entity, err),
            },
            Command::Delete(entity) => match store.delete(&entity.key()).await {
                Ok(_) => tally.report.deleted = tally.report.deleted.saturating_add(1),
                Err(err) => tally.fail(entity, err),
            },
            Command::Flush(reply) => {
                if reply.send(tally.settle()).is_err() {
                    tracing::debug!("journal flush requester went away");
                }
            }
        }
    }
    tracing::debug!("journal worker stopped");
}

enum Applied {
    Written,
    Deleted,
}

async fn sync<C>(
    store: &dyn DocumentStore,
    source: &dyn SnapshotSource,
    clock: &C,
    entity: EntityRef,
) -> Result<Applied, DocumentStoreError>
where
    C: Clock + Send + Sync,
{
    let key = entity.key();
    let Some(body) = source.snapshot(entity)? else {
        store.delete(&key).await?;
        return Ok(Applied::Deleted);
    };
    store.put(Document::new(key, body, clock.utc())).await?;
    Ok(Applied::Written)
}
