use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use super::docsession::Session;

/// Flush the session every `autosaveInterval` while it has unsaved edits.
/// A failed write leaves the session dirty for the next tick.
pub async fn run_autosave(session: Arc<Session>) {
    let period = session.timings().autosave_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match session.flush().await {
            Ok(true) => info!("Autosaved {}", session.path()),
            Ok(false) => {}
            Err(e) => warn!("Autosave of {} failed, retrying next interval: {}", session.path(), e),
        }
    }
}
