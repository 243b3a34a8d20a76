//! Recently viewed posts.
//!
//! Views arrive in bursts (scrolling past a post, reopening it), so each post
//! is debounced on its own key and only the last view of a burst is written.
//! Writes happen on a background task that owns the ordering.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::db::Database;
use crate::debounce::{DebounceOptions, KeyedDebouncer};
use crate::models::PostRef;

#[derive(Debug, Clone)]
struct ViewEvent {
    post: PostRef,
    title: Option<String>,
    viewed_at: DateTime<Utc>,
}

#[derive(Debug)]
enum WriterMessage {
    Record(ViewEvent),
    /// Reply once everything sent before it is written
    Sync(oneshot::Sender<()>),
    Shutdown,
}

/// Debounced recorder of post views
#[derive(Debug, Clone)]
pub struct RecentlyViewed {
    debouncer: KeyedDebouncer<PostRef, ViewEvent>,
    sender: mpsc::UnboundedSender<WriterMessage>,
}

impl RecentlyViewed {
    /// Start the writer task. `keep` bounds the stored history.
    pub fn new(db: Arc<Mutex<Database>>, options: DebounceOptions, keep: usize) -> Self {
        let (sender, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_task(rx, db, keep));

        let sink = sender.clone();
        let debouncer = KeyedDebouncer::new(
            options,
            |event: &ViewEvent| event.post.clone(),
            move |event: ViewEvent| {
                if let Err(mpsc::error::SendError(WriterMessage::Record(event))) =
                    sink.send(WriterMessage::Record(event))
                {
                    tracing::debug!("Writer stopped, dropping view of {}", event.post);
                }
            },
        );

        Self { debouncer, sender }
    }

    /// Note that `post` was viewed just now
    pub fn record(&self, post: PostRef, title: Option<String>) {
        self.debouncer.call(ViewEvent {
            post,
            title,
            viewed_at: Utc::now(),
        });
    }

    /// Whether a view of `post` is waiting for its quiet period
    pub fn is_pending(&self, post: &PostRef) -> bool {
        self.debouncer.is_pending(post)
    }

    /// Write every pending view now and wait until it is stored.
    pub async fn flush(&self) -> usize {
        let fired = self.debouncer.flush_all();
        self.sync().await;
        fired
    }

    /// Wait until every view handed to the writer is stored
    pub async fn sync(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(WriterMessage::Sync(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Drop pending views without writing them
    pub fn cancel(&self) -> usize {
        self.debouncer.cancel_all()
    }

    /// Stop the writer task. Views recorded afterwards are discarded.
    pub fn shutdown(&self) {
        if self.sender.send(WriterMessage::Shutdown).is_err() {
            tracing::debug!("Recently viewed writer already stopped");
        }
    }

    /// Whether the writer task is still accepting views
    pub fn is_writing(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Background task that owns database writes for views.
async fn writer_task(
    mut rx: mpsc::UnboundedReceiver<WriterMessage>,
    db: Arc<Mutex<Database>>,
    keep: usize,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            WriterMessage::Record(event) => {
                let db = db.lock().await;
                if let Err(e) =
                    db.record_view(&event.post, event.title.as_deref(), event.viewed_at)
                {
                    tracing::warn!("Failed to record view of {}: {}", event.post, e);
                    continue;
                }
                if let Err(e) = db.prune_recent(keep) {
                    tracing::warn!("Failed to prune recently viewed: {}", e);
                }
            }
            WriterMessage::Sync(done) => {
                let _ = done.send(());
            }
            WriterMessage::Shutdown => {
                tracing::debug!("Recently viewed writer shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tracker(keep: usize) -> (RecentlyViewed, Arc<Mutex<Database>>) {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let recent = RecentlyViewed::new(
            Arc::clone(&db),
            DebounceOptions::new(Duration::from_millis(200)),
            keep,
        );
        (recent, db)
    }

    #[tokio::test(start_paused = true)]
    async fn test_bursts_are_written_once_per_post() {
        let (recent, db) = tracker(10);
        let hot = PostRef::new("lemmy.ml", 1);
        let other = PostRef::new("lemmy.ml", 2);

        for _ in 0..3 {
            recent.record(hot.clone(), Some("Hot post".into()));
        }
        recent.record(other.clone(), None);
        assert!(recent.is_pending(&hot));

        tokio::time::sleep(Duration::from_millis(500)).await;
        recent.sync().await;

        let views = db.lock().await.recent_views(10).unwrap();
        assert_eq!(views.len(), 2);
        assert!(views.iter().all(|v| v.view_count == 1));
        assert!(!recent.is_pending(&hot));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_writes_without_waiting() {
        let (recent, db) = tracker(10);
        recent.record(PostRef::new("beehaw.org", 9), Some("Title".into()));

        assert_eq!(recent.flush().await, 1);

        let views = db.lock().await.recent_views(10).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].title.as_deref(), Some("Title"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_views() {
        let (recent, db) = tracker(10);
        recent.record(PostRef::new("lemmy.ml", 1), None);
        recent.record(PostRef::new("lemmy.ml", 2), None);

        assert_eq!(recent.cancel(), 2);
        tokio::time::sleep(Duration::from_secs(1)).await;
        recent.sync().await;

        assert!(db.lock().await.recent_views(10).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_views_after_shutdown_are_dropped() {
        let (recent, db) = tracker(10);
        recent.shutdown();
        while recent.is_writing() {
            tokio::task::yield_now().await;
        }

        recent.record(PostRef::new("lemmy.ml", 3), None);
        assert_eq!(recent.flush().await, 1);
        recent.shutdown();

        assert!(db.lock().await.recent_views(10).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_bounded() {
        let (recent, db) = tracker(2);
        for id in 0..4 {
            recent.record(PostRef::new("lemmy.ml", id), None);
            recent.flush().await;
        }

        assert_eq!(db.lock().await.recent_views(10).unwrap().len(), 2);
    }
}
