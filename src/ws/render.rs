use futures_util::stream::{self, Stream};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::models::RenderedPreview;
use super::docsession::Session;

/// One item of the preview push stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Render(Arc<RenderedPreview>),
    Keepalive,
}

/// Re-render every `renderInterval` while the text has unrendered changes
pub async fn run_render_loop(session: Arc<Session>) {
    let period = session.timings().render_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match session.render_if_dirty().await {
            Ok(Some(preview)) => debug!("Pushed render {} for {}", preview.hash, session.path()),
            Ok(None) => {}
            Err(e) => warn!("Render of {} failed, retrying next interval: {}", session.path(), e),
        }
    }
}

struct PushState {
    first: Option<Arc<RenderedPreview>>,
    previews: watch::Receiver<Option<Arc<RenderedPreview>>>,
    keepalive: Duration,
    last_push: Instant,
}

/// Push stream for one subscriber: `initial` first, then every new render,
/// with a keepalive whenever nothing was pushed for `keepalive`. Ends when
/// the session goes away.
pub fn preview_events(
    initial: Arc<RenderedPreview>,
    mut previews: watch::Receiver<Option<Arc<RenderedPreview>>>,
    keepalive: Duration,
) -> impl Stream<Item = PushEvent> {
    // The initial render already reflects the current value
    let _ = previews.borrow_and_update();
    let state = PushState {
        first: Some(initial),
        previews,
        keepalive,
        last_push: Instant::now(),
    };

    stream::unfold(state, |mut state| async move {
        if let Some(first) = state.first.take() {
            state.last_push = Instant::now();
            return Some((PushEvent::Render(first), state));
        }

        loop {
            let idle_until = state.last_push + state.keepalive;
            tokio::select! {
                changed = state.previews.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                    let latest = state.previews.borrow_and_update().clone();
                    if let Some(preview) = latest {
                        state.last_push = Instant::now();
                        return Some((PushEvent::Render(preview), state));
                    }
                }
                _ = tokio::time::sleep_until(idle_until) => {
                    state.last_push = Instant::now();
                    return Some((PushEvent::Keepalive, state));
                }
            }
        }
    })
}
