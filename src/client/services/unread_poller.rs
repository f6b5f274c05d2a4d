use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::client::models::UnreadTracker;
use crate::client::services::api_client::ApiClient;
use crate::common::models::UserId;

const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Background refresh of the unread badge from `/api/messages/unread`.
///
/// The first refresh happens immediately, then once per interval. A 401/403
/// stops the loop: there is nothing left to poll for until the next login.
pub struct UnreadPoller {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl UnreadPoller {
    pub fn spawn(
        api: Arc<ApiClient>,
        tracker: Arc<Mutex<UnreadTracker>>,
        me: UserId,
        every: Duration,
    ) -> Self {
        // interval() panics on a zero period
        let every = every.max(MIN_POLL_INTERVAL);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("[UNREAD] Polling every {:?}", every);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        match api.unread().await {
                            Ok(unread) => {
                                let mut guard = tracker.lock().await;
                                guard.refresh(me, &unread);
                                debug!("[UNREAD] {} unread message(s)", guard.total());
                            }
                            Err(e) if e.requires_login() => {
                                warn!("[UNREAD] Session no longer valid, stopping: {}", e);
                                break;
                            }
                            Err(e) => warn!("[UNREAD] Refresh failed: {}", e),
                        }
                    }
                }
            }
            debug!("[UNREAD] Poller stopped");
        });
        Self { shutdown: Some(shutdown_tx), handle: Some(handle) }
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

impl Drop for UnreadPoller {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
