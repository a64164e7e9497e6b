use crate::state::AppState;
use std::sync::Arc;

/// Spawn a background task that closes rounds whose time budget ran out,
/// so a round resolves even when a client never sends its no-answer sentinel
pub fn spawn_round_deadline_watcher(state: Arc<AppState>) {
    tokio::spawn(async move {
        let interval = state.config.sweep_interval;
        loop {
            tokio::time::sleep(interval).await;

            let expired = state.expire_due_rounds(chrono::Utc::now()).await;
            if expired > 0 {
                tracing::debug!("Deadline watcher resolved {} round(s)", expired);
            }
        }
    });
}

/// Spawn a background task that evicts long-disconnected players and
/// drops rooms that stayed empty or finished past the idle grace
pub fn spawn_room_janitor(state: Arc<AppState>) {
    tokio::spawn(async move {
        // The janitor has no latency requirement; run it less often
        let interval = state.config.sweep_interval * 4;
        loop {
            tokio::time::sleep(interval).await;

            let removed = state.collect_garbage(chrono::Utc::now()).await;
            if !removed.is_empty() {
                tracing::info!(
                    "Janitor removed {} room(s), {} remaining",
                    removed.len(),
                    state.room_count().await
                );
            }
        }
    });
}
