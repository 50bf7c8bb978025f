//! Orchestration of the scanners behind the user-facing actions.

use itertools::Itertools;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backoff::RateLimitCoordinator;
use crate::cache::TotalsCache;
use crate::error::{JoinError, StoreError};
use crate::fetcher::PageSource;
use crate::join::{JoinDispatch, JoinDispatcher};
use crate::models::{
    now_ms, LastJoined, ServerListing, Settings, TotalsSnapshot, LAST_JOINED_KEY, SETTINGS_KEY,
};
use crate::occupancy::{ListingFilter, Occupancy};
use crate::pager::{PageAction, PageScanner, ScanOutcome};
use crate::store::{load_json, save_json, KeyValueStore};
use crate::totals::{TotalsCounters, TotalsOutcome, TotalsPhase, TotalsScanner};

/// One displayed listing.
#[derive(Debug, Serialize, Clone)]
pub struct ListingView {
    pub listing: ServerListing,
    pub occupancy: Occupancy,
    pub last_joined: bool,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct PageSummary {
    pub current_page: u32,
    pub max_pages: Option<u32>,
    pub shown_count: usize,
    pub end_reached: bool,
}

/// What the presentation layer renders for the current page.
#[derive(Debug, Serialize, Clone, Default)]
pub struct PageView {
    pub entries: Vec<ListingView>,
    pub summary: PageSummary,
    /// Unfiltered records of the page, kept so filters can be re-applied
    /// and joins resolved without refetching.
    #[serde(skip)]
    records: Vec<ServerListing>,
}

/// Totals as currently displayed: cached, live progress or final.
#[derive(Debug, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct TotalsView {
    pub phase: TotalsPhase,
    pub counters: TotalsCounters,
    pub max_pages: Option<u32>,
    /// Timestamp of the snapshot the counters came from, if any.
    pub snapshot_at: Option<u64>,
}

impl TotalsView {
    fn from_snapshot(snapshot: &TotalsSnapshot, phase: TotalsPhase) -> Self {
        Self {
            phase,
            counters: TotalsCounters::from(snapshot),
            max_pages: Some(snapshot.max_pages),
            snapshot_at: Some(snapshot.timestamp),
        }
    }
}

pub struct Engine<F, S> {
    store: Arc<S>,
    pages: PageScanner<F>,
    totals: TotalsScanner<F, S>,
    join: JoinDispatcher,
    settings: RwLock<Settings>,
    walk: Mutex<Option<(u64, CancellationToken)>>,
    generation: AtomicU64,
    page_view: Mutex<PageView>,
    totals_view: watch::Sender<TotalsView>,
    status: watch::Sender<String>,
}

impl<F: PageSource, S: KeyValueStore> Engine<F, S> {
    pub fn new(
        source: Arc<F>,
        store: Arc<S>,
        backoff: Arc<RateLimitCoordinator>,
        join: JoinDispatcher,
    ) -> Self {
        let pages = PageScanner::new(Arc::clone(&source), Arc::clone(&backoff));
        let totals = TotalsScanner::new(source, backoff, TotalsCache::new(Arc::clone(&store)));
        Self {
            store,
            pages,
            totals,
            join,
            settings: RwLock::new(Settings::default()),
            walk: Mutex::new(None),
            generation: AtomicU64::new(0),
            page_view: Mutex::new(PageView::default()),
            totals_view: watch::Sender::new(TotalsView::default()),
            status: watch::Sender::new(String::new()),
        }
    }

    /// Startup sequence: settings, cached totals, optional walk, first page.
    pub async fn startup(&self) {
        self.load_settings();
        self.load_cached_totals();
        // a completed walk has already loaded the first page
        if !matches!(self.refresh_totals(false).await, TotalsOutcome::Completed(_)) {
            self.scan_page(PageAction::Reset).await;
        }
    }

    pub fn settings(&self) -> Settings {
        *self.settings.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn load_settings(&self) -> Settings {
        let settings = match load_json(&*self.store, SETTINGS_KEY) {
            Ok(stored) => stored.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "could not read settings, using defaults");
                Settings::default()
            }
        };
        *self.settings.write().unwrap_or_else(|e| e.into_inner()) = settings;
        settings
    }

    /// Persists new settings and re-filters the page on display.
    pub fn update_settings(&self, settings: Settings) -> Result<(), StoreError> {
        *self.settings.write().unwrap_or_else(|e| e.into_inner()) = settings;
        let active = [
            ("skip totals", settings.skip_totals),
            ("show owner inside", settings.show_owner_inside),
            ("only one player", settings.only_one_player),
            ("deep link", settings.use_deeplink),
        ]
        .iter()
        .filter(|(_, on)| *on)
        .map(|(name, _)| name)
        .join(", ");
        info!(%active, "settings updated");

        let records = self.lock_page_view().records.clone();
        self.publish_page(records);
        save_json(&*self.store, SETTINGS_KEY, &settings)
    }

    /// Shows fresh cached totals, if any, and records their page count.
    pub fn load_cached_totals(&self) -> Option<TotalsSnapshot> {
        let snapshot = self.totals.cache().load()?;
        self.show_snapshot(&snapshot, TotalsPhase::Idle);
        Some(snapshot)
    }

    pub fn is_walking(&self) -> bool {
        self.lock_walk().is_some()
    }

    /// Runs the totals walk, or the cache-only path when skipped.
    ///
    /// Starting a walk cancels any walk still running; a superseded walk
    /// no longer touches what is displayed. The counters on display stay
    /// until the first page of the new walk is counted. A completed walk
    /// moves the browser back to page 1 by reloading it.
    pub async fn refresh_totals(&self, force: bool) -> TotalsOutcome {
        let skip = self.settings().skip_totals;
        let cancel = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if !skip || force {
            if let Some((_, previous)) = self.lock_walk().replace((generation, cancel.clone())) {
                previous.cancel();
            }
            self.totals_view
                .send_modify(|view| view.phase = TotalsPhase::Running);
        }

        let progress = |counters: &TotalsCounters| {
            if self.is_current_walk(generation) {
                self.totals_view.send_modify(|view| view.counters = *counters);
            }
        };
        let outcome = self.totals.run(skip, force, &cancel, progress).await;

        if let TotalsOutcome::Skipped(cached) = &outcome {
            if let Some(snapshot) = cached {
                self.show_snapshot(snapshot, TotalsPhase::Idle);
            }
            self.set_status(outcome.status_message());
            return outcome;
        }

        {
            let mut walk = self.lock_walk();
            if !walk.as_ref().is_some_and(|(current, _)| *current == generation) {
                info!(generation, "totals walk superseded");
                return outcome;
            }
            *walk = None;
        }
        match &outcome {
            TotalsOutcome::Completed(snapshot) => {
                self.show_snapshot(snapshot, TotalsPhase::Completed);
                self.set_status(outcome.status_message());
                self.scan_page(PageAction::Reset).await;
            }
            _ => {
                self.totals_view.send_modify(|view| view.phase = outcome.phase());
                self.set_status(outcome.status_message());
            }
        }
        outcome
    }

    /// Raises the abort signal of the running walk. False when none runs.
    pub fn abort_totals(&self) -> bool {
        match self.lock_walk().as_ref() {
            Some((_, token)) => {
                token.cancel();
                info!("totals walk abort requested");
                true
            }
            None => false,
        }
    }

    pub async fn scan_page(&self, action: PageAction) -> ScanOutcome {
        let outcome = self.pages.scan(action).await;
        match &outcome {
            ScanOutcome::Loaded(page) => self.publish_page(page.records.clone()),
            ScanOutcome::Busy => return outcome,
            ScanOutcome::AtLastPage | ScanOutcome::NetworkError(_) => {}
        }
        self.set_status(outcome.status_message());
        outcome
    }

    /// Joins the listing with `access_code` from the page on display.
    pub fn join(&self, access_code: &str) -> Result<JoinDispatch, JoinError> {
        let listing = self
            .lock_page_view()
            .records
            .iter()
            .find(|l| l.access_code == access_code)
            .cloned()
            .ok_or(JoinError::UnknownListing);

        let result = listing.and_then(|listing| {
            let dispatch = self
                .join
                .dispatch(&listing.access_code, self.settings().use_deeplink)?;
            let marker = LastJoined {
                id: listing.id.clone(),
                ts: now_ms(),
            };
            if let Err(e) = save_json(&*self.store, LAST_JOINED_KEY, &marker) {
                warn!(error = %e, "could not remember last joined server");
            }
            Ok(dispatch)
        });

        match &result {
            Ok(_) => {
                self.set_status("Joining server".to_string());
                let records = self.lock_page_view().records.clone();
                self.publish_page(records);
            }
            Err(e) => self.set_status(format!("Join failed: {e}")),
        }
        result
    }

    pub fn last_joined(&self) -> Option<LastJoined> {
        load_json(&*self.store, LAST_JOINED_KEY).ok().flatten()
    }

    pub fn page_view(&self) -> PageView {
        self.lock_page_view().clone()
    }

    pub fn totals_view(&self) -> TotalsView {
        *self.totals_view.borrow()
    }

    pub fn status(&self) -> String {
        self.status.borrow().clone()
    }

    pub fn pages(&self) -> &PageScanner<F> {
        &self.pages
    }

    /// Classifies and filters `records` with the current settings.
    fn publish_page(&self, records: Vec<ServerListing>) {
        let filter = ListingFilter::from(&self.settings());
        let last_joined = self.last_joined().map(|l| l.id).filter(|id| !id.is_empty());
        let entries: Vec<ListingView> = filter
            .apply(&records)
            .map(|(listing, occupancy)| ListingView {
                last_joined: last_joined.as_deref() == Some(listing.id.as_str()),
                listing: listing.clone(),
                occupancy,
            })
            .collect();
        let state = self.pages.state();
        let mut view = self.lock_page_view();
        view.summary = PageSummary {
            current_page: state.current_page,
            max_pages: state.max_pages,
            shown_count: entries.len(),
            end_reached: state.end_reached,
        };
        view.entries = entries;
        view.records = records;
    }

    fn refresh_summary(&self) {
        let state = self.pages.state();
        let mut view = self.lock_page_view();
        view.summary.max_pages = state.max_pages;
        view.summary.current_page = state.current_page;
    }

    fn is_current_walk(&self, generation: u64) -> bool {
        self.lock_walk()
            .as_ref()
            .is_some_and(|(current, _)| *current == generation)
    }

    fn show_snapshot(&self, snapshot: &TotalsSnapshot, phase: TotalsPhase) {
        self.pages.set_max_pages(snapshot.max_pages);
        self.totals_view
            .send_replace(TotalsView::from_snapshot(snapshot, phase));
        self.refresh_summary();
    }

    fn set_status(&self, message: String) {
        info!(status = %message);
        self.status.send_replace(message);
    }

    fn lock_walk(&self) -> MutexGuard<'_, Option<(u64, CancellationToken)>> {
        self.walk.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_page_view(&self) -> MutexGuard<'_, PageView> {
        self.page_view.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<F: PageSource + 'static, S: KeyValueStore + 'static> Engine<F, S> {
    /// Runs `scan_page` on its own task. Dropping the handle does not cancel
    /// the scan, including a replay waiting out a rate limit.
    pub fn spawn_scan(self: &Arc<Self>, action: PageAction) -> JoinHandle<ScanOutcome> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.scan_page(action).await })
    }
}
