//! One-directional live replication between two stores.
//!
//! A replication task follows the source's change feed from the beginning,
//! copies every changed document into the target with its revision intact,
//! and reports progress as [`ReplicationEvent`]s. It never retries on its
//! own: the first failure is reported and the task ends.

use crate::error::StoreResult;
use crate::feed::ChangeEvent;
use crate::store::DocumentStore;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Progress counters carried by replication events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationInfo {
    /// Changes read from the source.
    pub docs_read: u64,
    /// Documents actually written to the target.
    pub docs_written: u64,
    /// Source sequence of the last processed change.
    pub last_seq: u64,
}

/// Progress notification from a running replication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationEvent {
    /// At least one document was written to the target.
    Change(ReplicationInfo),
    /// The target has caught up with everything the source held.
    UpToDate(ReplicationInfo),
    /// Replication failed and has stopped.
    Error(String),
    /// The source feed ended and replication has stopped.
    Complete(ReplicationInfo),
}

/// Handle to a running replication task.
///
/// Dropping the handle cancels the task.
#[derive(Debug)]
pub struct Replication {
    events: UnboundedReceiver<ReplicationEvent>,
    task: JoinHandle<()>,
}

impl Replication {
    /// Waits for the next event. `None` once the task has ended and every
    /// event has been delivered.
    pub async fn recv(&mut self) -> Option<ReplicationEvent> {
        self.events.recv().await
    }

    /// Returns the next event if one is ready.
    pub fn try_recv(&mut self) -> Option<ReplicationEvent> {
        self.events.try_recv().ok()
    }

    /// Stops the task. No further events are produced.
    pub fn cancel(&mut self) {
        self.task.abort();
        self.events.close();
    }

    /// True once the task has stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Replication {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Starts replicating `source` into `target`.
///
/// Must be called from within a tokio runtime.
pub fn replicate(source: Arc<dyn DocumentStore>, target: Arc<dyn DocumentStore>) -> Replication {
    let (tx, events) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        if let Err(e) = pump(source.as_ref(), target.as_ref(), &tx).await {
            warn!(
                source = source.name(),
                target = target.name(),
                error = %e,
                "replication stopped"
            );
            let _ = tx.send(ReplicationEvent::Error(e.to_string()));
        }
    });
    Replication { events, task }
}

async fn pump(
    source: &dyn DocumentStore,
    target: &dyn DocumentStore,
    tx: &UnboundedSender<ReplicationEvent>,
) -> StoreResult<()> {
    let caught_up_at = source.info().await?.update_seq;
    let mut feed = source.changes(0)?;
    let mut info = ReplicationInfo::default();

    let mut caught_up = caught_up_at == 0;
    if caught_up {
        let _ = tx.send(ReplicationEvent::UpToDate(info.clone()));
    }

    while let Some(event) = feed.recv().await {
        match event {
            ChangeEvent::Change(record) => {
                info.docs_read += 1;
                info.last_seq = record.seq;

                if let Some(doc) = source.fetch_replica(&record.id).await? {
                    if target.put_replica(doc).await? {
                        info.docs_written += 1;
                        debug!(
                            source = source.name(),
                            target = target.name(),
                            id = %record.id,
                            seq = record.seq,
                            "replicated document"
                        );
                        let _ = tx.send(ReplicationEvent::Change(info.clone()));
                    }
                }

                if caught_up || record.seq >= caught_up_at {
                    caught_up = true;
                    let _ = tx.send(ReplicationEvent::UpToDate(info.clone()));
                }
            }
            ChangeEvent::Error(message) => {
                warn!(source = source.name(), error = %message, "source feed failed");
                let _ = tx.send(ReplicationEvent::Error(message));
                return Ok(());
            }
            ChangeEvent::Complete => break,
        }
    }

    let _ = tx.send(ReplicationEvent::Complete(info));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use docsync_document::Document;

    fn stores() -> (Arc<MemoryStore>, Arc<MemoryStore>) {
        (
            Arc::new(MemoryStore::new("source")),
            Arc::new(MemoryStore::new("target")),
        )
    }

    fn note(id: &str) -> Document {
        Document::with_id(id).field("text", id)
    }

    fn written(event: Option<ReplicationEvent>) -> u64 {
        match event {
            Some(ReplicationEvent::Change(info)) | Some(ReplicationEvent::UpToDate(info)) => {
                info.docs_written
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    async fn written_count_until_up_to_date(rep: &mut Replication) -> u64 {
        loop {
            match rep.recv().await {
                Some(ReplicationEvent::UpToDate(info)) => return info.docs_written,
                Some(ReplicationEvent::Change(_)) => continue,
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn empty_source_is_immediately_up_to_date() {
        let (source, target) = stores();
        let mut rep = replicate(source, target);
        assert_eq!(
            rep.recv().await,
            Some(ReplicationEvent::UpToDate(ReplicationInfo::default()))
        );
    }

    #[tokio::test]
    async fn backlog_then_live_changes() {
        let (source, target) = stores();
        source.put(note("a")).await.unwrap();
        source.put(note("b")).await.unwrap();

        let mut rep = replicate(source.clone(), target.clone());
        assert!(matches!(rep.recv().await, Some(ReplicationEvent::Change(_))));
        assert!(matches!(rep.recv().await, Some(ReplicationEvent::Change(_))));
        assert_eq!(written(rep.recv().await), 2);

        source.put(note("c")).await.unwrap();
        assert_eq!(written(rep.recv().await), 3);
        assert_eq!(written(rep.recv().await), 3);

        assert_eq!(target.info().await.unwrap().doc_count, 3);
        assert_eq!(
            target.get_raw("c").unwrap().rev(),
            source.get_raw("c").unwrap().rev()
        );
    }

    #[tokio::test]
    async fn deletions_replicate() {
        let (source, target) = stores();
        let written = source.put(note("a")).await.unwrap();
        let mut rep = replicate(source.clone(), target.clone());
        assert_eq!(written_count_until_up_to_date(&mut rep).await, 1);

        source.remove("a", &written.rev).await.unwrap();
        assert_eq!(written_count_until_up_to_date(&mut rep).await, 2);
        assert_eq!(target.get("a").await.unwrap(), None);
        assert!(target.get_raw("a").unwrap().is_deleted());
    }

    #[tokio::test]
    async fn already_present_revisions_are_not_rewritten() {
        let (source, target) = stores();
        source.put(note("a")).await.unwrap();
        target.put_replica(source.get_raw("a").unwrap()).await.unwrap();

        let mut rep = replicate(source, target.clone());
        match rep.recv().await {
            Some(ReplicationEvent::UpToDate(info)) => {
                assert_eq!(info.docs_read, 1);
                assert_eq!(info.docs_written, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(target.info().await.unwrap().update_seq, 1);
    }

    #[tokio::test]
    async fn source_going_offline_reports_error() {
        let (source, target) = stores();
        let mut rep = replicate(source.clone(), target);
        assert!(matches!(rep.recv().await, Some(ReplicationEvent::UpToDate(_))));

        source.set_online(false);
        assert_eq!(
            rep.recv().await,
            Some(ReplicationEvent::Error("store unreachable".into()))
        );
        assert_eq!(rep.recv().await, None);
    }

    #[tokio::test]
    async fn unreachable_source_at_start_reports_error() {
        let (source, target) = stores();
        source.set_online(false);

        let mut rep = replicate(source, target);
        assert!(matches!(rep.recv().await, Some(ReplicationEvent::Error(_))));
    }

    #[tokio::test]
    async fn destroyed_source_completes() {
        let (source, target) = stores();
        let mut rep = replicate(source.clone(), target);
        assert!(matches!(rep.recv().await, Some(ReplicationEvent::UpToDate(_))));

        source.destroy().await.unwrap();
        assert!(matches!(rep.recv().await, Some(ReplicationEvent::Complete(_))));
    }

    #[tokio::test]
    async fn cancel_stops_events() {
        let (source, target) = stores();
        let mut rep = replicate(source.clone(), target.clone());
        assert!(matches!(rep.recv().await, Some(ReplicationEvent::UpToDate(_))));

        rep.cancel();
        source.put(note("late")).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(rep.try_recv(), None);
        assert_eq!(target.info().await.unwrap().doc_count, 0);
    }
}
