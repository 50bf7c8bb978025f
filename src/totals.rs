//! Full walk of the cursor chain to compute aggregate occupancy totals.

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::RateLimitCoordinator;
use crate::cache::TotalsCache;
use crate::fetcher::{FetchOutcome, PageSource};
use crate::models::{now_ms, ServerListing, TotalsSnapshot};
use crate::occupancy::{has_players, owner_inside};
use crate::store::KeyValueStore;

/// Running aggregate of a walk. Partial values are shown but never cached.
#[derive(Debug, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TotalsCounters {
    pub total_servers: u64,
    pub servers_with_players: u64,
    pub servers_with_players_no_owner: u64,
    pub pages_scanned: u32,
}

impl TotalsCounters {
    /// Adds one page worth of records.
    pub fn tally(&mut self, records: &[ServerListing]) {
        self.pages_scanned += 1;
        self.total_servers += records.len() as u64;
        for record in records.iter().filter(|r| has_players(r)) {
            self.servers_with_players += 1;
            if !owner_inside(record) {
                self.servers_with_players_no_owner += 1;
            }
        }
    }

    pub fn snapshot(&self, timestamp: u64) -> TotalsSnapshot {
        TotalsSnapshot {
            timestamp,
            total_servers: self.total_servers,
            servers_with_players: self.servers_with_players,
            servers_with_players_no_owner: self.servers_with_players_no_owner,
            max_pages: self.pages_scanned.max(1),
        }
    }
}

impl From<&TotalsSnapshot> for TotalsCounters {
    fn from(snapshot: &TotalsSnapshot) -> Self {
        Self {
            total_servers: snapshot.total_servers,
            servers_with_players: snapshot.servers_with_players,
            servers_with_players_no_owner: snapshot.servers_with_players_no_owner,
            pages_scanned: snapshot.max_pages,
        }
    }
}

/// Lifecycle of the totals walk as shown to the user.
#[derive(Debug, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum TotalsPhase {
    #[default]
    Idle,
    Running,
    Completed,
    Aborted,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TotalsOutcome {
    /// Walked to the end; the snapshot has been persisted.
    Completed(TotalsSnapshot),
    /// Cancelled between pages. Counters are what had been reached.
    Aborted(TotalsCounters),
    /// A page could not be fetched.
    Failed {
        partial: TotalsCounters,
        error: String,
    },
    /// No walk ran because totals are skipped; carries the fresh cache, if any.
    Skipped(Option<TotalsSnapshot>),
}

impl TotalsOutcome {
    pub fn phase(&self) -> TotalsPhase {
        match self {
            TotalsOutcome::Completed(_) => TotalsPhase::Completed,
            TotalsOutcome::Aborted(_) => TotalsPhase::Aborted,
            TotalsOutcome::Failed { .. } => TotalsPhase::Failed,
            TotalsOutcome::Skipped(_) => TotalsPhase::Idle,
        }
    }

    pub fn status_message(&self) -> String {
        match self {
            TotalsOutcome::Completed(s) => format!(
                "Totals: {} servers, {} with players, {} without owner ({} pages)",
                s.total_servers, s.servers_with_players, s.servers_with_players_no_owner, s.max_pages
            ),
            TotalsOutcome::Aborted(c) => format!(
                "Totals scan skipped after {} pages (partial counts)",
                c.pages_scanned
            ),
            TotalsOutcome::Failed { error, .. } => format!("Totals scan failed: {error}"),
            TotalsOutcome::Skipped(Some(_)) => "Totals skipped, showing cached totals".to_string(),
            TotalsOutcome::Skipped(None) => "Totals skipped, no recent totals cached".to_string(),
        }
    }
}

pub struct TotalsScanner<F, S> {
    source: Arc<F>,
    backoff: Arc<RateLimitCoordinator>,
    cache: TotalsCache<S>,
}

impl<F: PageSource, S: KeyValueStore> TotalsScanner<F, S> {
    pub fn new(source: Arc<F>, backoff: Arc<RateLimitCoordinator>, cache: TotalsCache<S>) -> Self {
        Self {
            source,
            backoff,
            cache,
        }
    }

    pub fn cache(&self) -> &TotalsCache<S> {
        &self.cache
    }

    /// Walks unless totals are skipped and the caller did not force it.
    pub async fn run(
        &self,
        skip_totals: bool,
        force: bool,
        cancel: &CancellationToken,
        progress: impl FnMut(&TotalsCounters) + Send,
    ) -> TotalsOutcome {
        if skip_totals && !force {
            debug!("totals walk skipped by preference");
            return TotalsOutcome::Skipped(self.cache.load());
        }
        self.walk(cancel, progress).await
    }

    /// Visits every page in cursor order, reporting counters after each.
    pub async fn walk(
        &self,
        cancel: &CancellationToken,
        mut progress: impl FnMut(&TotalsCounters) + Send,
    ) -> TotalsOutcome {
        info!("totals walk started");
        let mut counters = TotalsCounters::default();
        let mut cursor = String::new();

        loop {
            if cancel.is_cancelled() {
                info!(pages = counters.pages_scanned, "totals walk aborted");
                return TotalsOutcome::Aborted(counters);
            }
            match self.source.fetch(&cursor).await {
                FetchOutcome::Success(page) => {
                    counters.tally(&page.data);
                    progress(&counters);
                    debug!(
                        page = counters.pages_scanned,
                        total = counters.total_servers,
                        "totals page counted"
                    );
                    match page.next_page_cursor {
                        Some(next) => cursor = next,
                        None => break,
                    }
                }
                FetchOutcome::RateLimited => {
                    cursor = self.backoff.schedule_retry(cursor).await;
                }
                FetchOutcome::TransportError(error) => {
                    warn!(%error, pages = counters.pages_scanned, "totals walk failed");
                    return TotalsOutcome::Failed {
                        partial: counters,
                        error,
                    };
                }
            }
        }

        let snapshot = counters.snapshot(now_ms());
        if let Err(e) = self.cache.save(&snapshot) {
            warn!(error = %e, "could not persist totals");
        }
        info!(
            total = snapshot.total_servers,
            with_players = snapshot.servers_with_players,
            no_owner = snapshot.servers_with_players_no_owner,
            pages = snapshot.max_pages,
            "totals walk completed"
        );
        TotalsOutcome::Completed(snapshot)
    }
}
