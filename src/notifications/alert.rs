use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub shown_at: OffsetDateTime,
}

struct AlertInner {
    current: watch::Sender<Option<Alert>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    duration: Duration,
}

impl AlertInner {
    fn clear_if(&self, id: u64) -> bool {
        self.current.send_if_modified(|current| {
            if current.as_ref().is_some_and(|alert| alert.id == id) {
                *current = None;
                true
            } else {
                false
            }
        })
    }

    fn timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Single-slot alert surface. Showing a new alert replaces the visible one
/// and restarts the dismiss timer.
#[derive(Clone)]
pub struct AlertController {
    inner: Arc<AlertInner>,
}

impl AlertController {
    pub fn new(duration: Duration) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            inner: Arc::new(AlertInner {
                current,
                timer: Mutex::new(None),
                next_id: AtomicU64::new(1),
                duration,
            }),
        }
    }

    pub fn show(&self, title: impl Into<String>, body: impl Into<String>) -> u64 {
        // Publish and arm under one lock so the visible alert owns the timer.
        let mut timer = self.inner.timer();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let alert = Alert {
            id,
            title: title.into(),
            body: body.into(),
            shown_at: OffsetDateTime::now_utc(),
        };
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        self.inner.current.send_replace(Some(alert));
        let inner = self.inner.clone();
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.duration).await;
            if inner.clear_if(id) {
                tracing::debug!(alert = id, "alert dismissed after timeout");
            }
        }));
        id
    }

    /// Dismisses the visible alert early. Returns `false` if none was shown.
    pub fn dismiss(&self) -> bool {
        let mut timer = self.inner.timer();
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        self.inner.current.send_replace(None).is_some()
    }

    pub fn current(&self) -> Option<Alert> {
        self.inner.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Alert>> {
        self.inner.current.subscribe()
    }
}
