use super::alert::AlertController;
use super::classify::{classify, EventCategory};
use crate::http::ApiError;
use crate::realtime::RealtimeEvent;
use crate::types::NotificationPayload;
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub type RefreshHook =
    Arc<dyn Fn(NotificationPayload) -> BoxFuture<'static, Result<(), ApiError>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

struct Registration {
    id: HookId,
    category: EventCategory,
    hook: RefreshHook,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub categories: Vec<EventCategory>,
    pub hooks_run: usize,
    pub hooks_failed: usize,
}

pub struct NotificationDispatcher {
    alerts: AlertController,
    hooks: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

impl NotificationDispatcher {
    pub fn new(alerts: AlertController) -> Self {
        Self {
            alerts,
            hooks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn hooks(&self) -> MutexGuard<'_, Vec<Registration>> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn alerts(&self) -> &AlertController {
        &self.alerts
    }

    pub fn register<F>(&self, category: EventCategory, hook: F) -> HookId
    where
        F: Fn(NotificationPayload) -> BoxFuture<'static, Result<(), ApiError>>
            + Send
            + Sync
            + 'static,
    {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.hooks().push(Registration {
            id,
            category,
            hook: Arc::new(hook),
        });
        id
    }

    pub fn unregister(&self, id: HookId) -> bool {
        let mut hooks = self.hooks();
        let before = hooks.len();
        hooks.retain(|registration| registration.id != id);
        hooks.len() != before
    }

    /// Shows the alert right away, then runs every hook registered for the
    /// payload's categories on a worker task. Hook errors and panics are
    /// logged and counted in the worker's report.
    pub fn dispatch(&self, payload: NotificationPayload) -> JoinHandle<DispatchReport> {
        self.alerts.show(payload.title.clone(), payload.body.clone());

        let categories = classify(&payload.data);
        let matched: Vec<(EventCategory, RefreshHook)> = self
            .hooks()
            .iter()
            .filter(|registration| categories.contains(&registration.category))
            .map(|registration| (registration.category, registration.hook.clone()))
            .collect();

        tokio::spawn(run_hooks(payload, categories, matched))
    }
}

async fn run_hooks(
    payload: NotificationPayload,
    categories: Vec<EventCategory>,
    matched: Vec<(EventCategory, RefreshHook)>,
) -> DispatchReport {
    let mut report = DispatchReport {
        categories,
        ..DispatchReport::default()
    };

    for (category, hook) in matched {
        report.hooks_run += 1;
        match tokio::spawn(hook(payload.clone())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                report.hooks_failed += 1;
                tracing::warn!(?category, error = %e, "notification refresh failed");
            }
            Err(e) => {
                report.hooks_failed += 1;
                tracing::error!(?category, error = %e, "notification refresh panicked");
            }
        }
    }

    tracing::debug!(
        categories = ?report.categories,
        hooks = report.hooks_run,
        failed = report.hooks_failed,
        "notification dispatched"
    );
    report
}

/// Feeds realtime notifications into `dispatcher` until the session's event
/// channel closes.
pub fn spawn_dispatch_loop(
    dispatcher: Arc<NotificationDispatcher>,
    mut events: broadcast::Receiver<RealtimeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RealtimeEvent::Notification(payload)) => {
                    // Refresh work runs detached; the next alert must not wait on it.
                    let _worker = dispatcher.dispatch(payload);
                }
                Ok(RealtimeEvent::Frame(frame)) => {
                    tracing::trace!(event = %frame.event, "ignoring realtime event");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "notification dispatcher fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
