//! Single-page browse scanning with exact-intent replay on rate limiting.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::backoff::RateLimitCoordinator;
use crate::fetcher::{FetchOutcome, PageSource};
use crate::models::ServerListing;

/// What the user asked the browser to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PageAction {
    /// Back to the first page.
    Reset,
    /// Reload the page currently shown.
    Refresh,
    /// Advance to the following page.
    Next,
}

/// Cursor position of the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaginationState {
    pub current_cursor: String,
    pub next_cursor: Option<String>,
    pub end_reached: bool,
    pub current_page: u32,
    /// Known once a totals walk has completed or a cached snapshot was loaded.
    pub max_pages: Option<u32>,
}

impl Default for PaginationState {
    fn default() -> Self {
        Self {
            current_cursor: String::new(),
            next_cursor: None,
            end_reached: false,
            current_page: 1,
            max_pages: None,
        }
    }
}

/// A successfully fetched page together with the state it produced.
#[derive(Debug, Clone)]
pub struct Page {
    pub action: PageAction,
    pub records: Vec<ServerListing>,
    pub state: PaginationState,
}

#[derive(Debug, Clone)]
pub enum ScanOutcome {
    Loaded(Page),
    /// `Next` was requested without a known next cursor; nothing was sent.
    AtLastPage,
    /// Another page operation was in flight; the call was dropped.
    Busy,
    NetworkError(String),
}

impl ScanOutcome {
    pub fn status_message(&self) -> String {
        match self {
            ScanOutcome::Loaded(page) => format!(
                "Page {} loaded ({} listings)",
                page.state.current_page,
                page.records.len()
            ),
            ScanOutcome::AtLastPage => "Already at the last page".to_string(),
            ScanOutcome::Busy => "A page is already loading".to_string(),
            ScanOutcome::NetworkError(e) => format!("Network error: {e}"),
        }
    }
}

pub struct PageScanner<F> {
    source: Arc<F>,
    backoff: Arc<RateLimitCoordinator>,
    state: Mutex<PaginationState>,
    pending: Mutex<Option<PageAction>>,
    in_flight: AtomicBool,
}

/// Clears the pending action and the in-flight flag, even when the scan
/// future is dropped mid-way.
struct InFlight<'a> {
    flag: &'a AtomicBool,
    pending: &'a Mutex<Option<PageAction>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.flag.store(false, Ordering::Release);
    }
}

impl<F: PageSource> PageScanner<F> {
    pub fn new(source: Arc<F>, backoff: Arc<RateLimitCoordinator>) -> Self {
        Self {
            source,
            backoff,
            state: Mutex::new(PaginationState::default()),
            pending: Mutex::new(None),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> PaginationState {
        self.lock_state().clone()
    }

    /// The action currently being carried out, including during backoff.
    pub fn pending_action(&self) -> Option<PageAction> {
        *self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn set_max_pages(&self, max_pages: u32) {
        let mut state = self.lock_state();
        state.max_pages = Some(max_pages.max(1));
        if state.end_reached {
            state.current_page = state.current_page.min(max_pages.max(1));
        }
    }

    /// Carries out `action`, replaying it after every 429 until it resolves.
    pub async fn scan(&self, action: PageAction) -> ScanOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(?action, "page scan already in flight, dropping request");
            return ScanOutcome::Busy;
        }
        let _guard = InFlight {
            flag: &self.in_flight,
            pending: &self.pending,
        };

        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(action);
        self.run(action).await
    }

    async fn run(&self, mut action: PageAction) -> ScanOutcome {
        loop {
            let Some(cursor) = self.cursor_for(action) else {
                info!("next requested at the last page");
                return ScanOutcome::AtLastPage;
            };
            match self.source.fetch(&cursor).await {
                FetchOutcome::Success(page) => {
                    let state = self.commit(action, cursor, page.next_page_cursor);
                    debug!(
                        ?action,
                        page = state.current_page,
                        records = page.data.len(),
                        end = state.end_reached,
                        "page loaded"
                    );
                    return ScanOutcome::Loaded(Page {
                        action,
                        records: page.data,
                        state,
                    });
                }
                FetchOutcome::RateLimited => {
                    action = self.backoff.schedule_retry(action).await;
                }
                FetchOutcome::TransportError(e) => return ScanOutcome::NetworkError(e),
            }
        }
    }

    fn cursor_for(&self, action: PageAction) -> Option<String> {
        let state = self.lock_state();
        match action {
            PageAction::Reset => Some(String::new()),
            PageAction::Refresh => Some(state.current_cursor.clone()),
            PageAction::Next => state.next_cursor.clone(),
        }
    }

    fn commit(&self, action: PageAction, cursor: String, next: Option<String>) -> PaginationState {
        let mut state = self.lock_state();
        match action {
            PageAction::Reset => state.current_page = 1,
            PageAction::Refresh => {}
            PageAction::Next => state.current_page += 1,
        }
        state.current_cursor = cursor;
        state.end_reached = next.is_none();
        state.next_cursor = next;
        if state.end_reached {
            if let Some(max) = state.max_pages {
                state.current_page = state.current_page.min(max);
            }
        }
        state.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, PaginationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{page, vacant, ScriptedSource};
    use std::time::Duration;
    use tokio::time::Instant;

    const DELAY: Duration = Duration::from_secs(5);

    fn scanner(source: ScriptedSource) -> (Arc<ScriptedSource>, Arc<PageScanner<ScriptedSource>>) {
        let source = Arc::new(source);
        let scanner = PageScanner::new(
            Arc::clone(&source),
            Arc::new(RateLimitCoordinator::new(DELAY)),
        );
        (source, Arc::new(scanner))
    }

    fn loaded(outcome: ScanOutcome) -> Page {
        match outcome {
            ScanOutcome::Loaded(page) => page,
            other => panic!("expected a loaded page, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reset_loads_first_page() {
        let (source, scanner) = scanner(ScriptedSource::new([page(vacant(100), Some("c1"))]));

        let page = loaded(scanner.scan(PageAction::Reset).await);

        assert_eq!(page.records.len(), 100);
        assert_eq!(page.state.current_page, 1);
        assert_eq!(page.state.next_cursor.as_deref(), Some("c1"));
        assert!(!page.state.end_reached);
        assert_eq!(source.calls(), vec![""]);
        assert_eq!(scanner.pending_action(), None);
    }

    #[tokio::test]
    async fn test_next_reaches_last_page() {
        let (source, scanner) = scanner(ScriptedSource::new([
            page(vacant(100), Some("c1")),
            page(vacant(50), None),
        ]));
        scanner.scan(PageAction::Reset).await;

        let page = loaded(scanner.scan(PageAction::Next).await);

        assert_eq!(page.records.len(), 50);
        assert_eq!(page.state.current_page, 2);
        assert!(page.state.end_reached);
        assert_eq!(page.state.next_cursor, None);
        assert_eq!(page.state.current_cursor, "c1");
        assert_eq!(source.calls(), vec!["", "c1"]);
    }

    #[tokio::test]
    async fn test_next_without_cursor_sends_nothing() {
        let (source, scanner) = scanner(ScriptedSource::new([page(vacant(3), None)]));
        scanner.scan(PageAction::Reset).await;
        let before = scanner.state();

        let outcome = scanner.scan(PageAction::Next).await;

        assert!(matches!(outcome, ScanOutcome::AtLastPage));
        assert_eq!(scanner.state(), before);
        assert_eq!(source.calls(), vec![""]);
    }

    #[tokio::test]
    async fn test_refresh_keeps_cursor_and_page() {
        let (source, scanner) = scanner(ScriptedSource::new([
            page(vacant(1), Some("c1")),
            page(vacant(1), Some("c2")),
            page(vacant(1), Some("c2")),
            page(vacant(1), Some("c2")),
        ]));
        scanner.scan(PageAction::Reset).await;
        scanner.scan(PageAction::Next).await;

        let first = loaded(scanner.scan(PageAction::Refresh).await);
        let second = loaded(scanner.scan(PageAction::Refresh).await);

        assert_eq!(first.state.current_cursor, "c1");
        assert_eq!(second.state.current_cursor, "c1");
        assert_eq!(second.state.current_page, 2);
        assert_eq!(source.calls(), vec!["", "c1", "c1", "c1"]);
    }

    #[tokio::test]
    async fn test_transport_error_leaves_state_untouched() {
        let (_, scanner) = scanner(ScriptedSource::new([
            page(vacant(1), Some("c1")),
            FetchOutcome::TransportError("timed out".into()),
        ]));
        scanner.scan(PageAction::Reset).await;
        let before = scanner.state();

        let outcome = scanner.scan(PageAction::Next).await;

        assert!(matches!(outcome, ScanOutcome::NetworkError(ref e) if e == "timed out"));
        assert_eq!(scanner.state(), before);
        assert!(!scanner.is_busy());
    }

    #[tokio::test]
    async fn test_page_clamped_to_known_max() {
        let (_, scanner) = scanner(ScriptedSource::new([
            page(vacant(1), Some("c1")),
            page(vacant(1), Some("c2")),
            page(vacant(1), None),
        ]));
        scanner.set_max_pages(2);
        scanner.scan(PageAction::Reset).await;
        scanner.scan(PageAction::Next).await;

        // upstream grew a page since the totals walk
        let page = loaded(scanner.scan(PageAction::Next).await);

        assert!(page.state.end_reached);
        assert_eq!(page.state.current_page, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_next_replays_next() {
        let (source, scanner) = scanner(ScriptedSource::new([
            page(vacant(100), Some("c1")),
            FetchOutcome::RateLimited,
            page(vacant(50), None),
        ]));
        scanner.scan(PageAction::Reset).await;
        let before = scanner.state();

        let task = {
            let scanner = Arc::clone(&scanner);
            tokio::spawn(async move { scanner.scan(PageAction::Next).await })
        };
        while source.calls().len() < 2 {
            tokio::task::yield_now().await;
        }

        // backing off: nothing moved, the intent is remembered, input is dropped
        assert_eq!(scanner.state(), before);
        assert_eq!(scanner.pending_action(), Some(PageAction::Next));
        assert!(matches!(scanner.scan(PageAction::Refresh).await, ScanOutcome::Busy));

        let started = Instant::now();
        tokio::time::advance(DELAY).await;
        let page = loaded(task.await.unwrap());

        assert!(started.elapsed() >= DELAY);
        assert_eq!(page.action, PageAction::Next);
        assert_eq!(page.state.current_page, 2);
        assert!(page.state.end_reached);
        assert_eq!(source.calls(), vec!["", "c1", "c1"]);
        assert_eq!(scanner.pending_action(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_reset_keeps_old_position_until_success() {
        let (source, scanner) = scanner(ScriptedSource::new([
            page(vacant(1), Some("c1")),
            page(vacant(1), Some("c2")),
            FetchOutcome::RateLimited,
            page(vacant(1), Some("c1")),
        ]));
        scanner.scan(PageAction::Reset).await;
        scanner.scan(PageAction::Next).await;

        let page = loaded(scanner.scan(PageAction::Reset).await);

        assert_eq!(page.action, PageAction::Reset);
        assert_eq!(page.state.current_page, 1);
        assert_eq!(page.state.current_cursor, "");
        assert_eq!(source.calls(), vec!["", "c1", "", ""]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_scan_releases_guard_and_intent() {
        let (source, scanner) = scanner(ScriptedSource::new([
            page(vacant(1), Some("c1")),
            FetchOutcome::RateLimited,
            page(vacant(1), Some("c1")),
        ]));
        scanner.scan(PageAction::Reset).await;

        let task = {
            let scanner = Arc::clone(&scanner);
            tokio::spawn(async move { scanner.scan(PageAction::Next).await })
        };
        while source.calls().len() < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(scanner.pending_action(), Some(PageAction::Next));

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert_eq!(scanner.pending_action(), None);
        assert!(!scanner.is_busy());
        let page = loaded(scanner.scan(PageAction::Refresh).await);
        assert_eq!(page.state.current_page, 1);
        assert_eq!(source.calls(), vec!["", "c1", ""]);
    }
}
