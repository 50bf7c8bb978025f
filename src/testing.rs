//! Scripted page sources shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::fetcher::{FetchOutcome, PageSource};
use crate::models::{ListingPage, Owner, Player, ServerListing};

/// Replays queued outcomes in order and records every cursor requested.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    outcomes: Mutex<VecDeque<FetchOutcome>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new(outcomes: impl IntoIterator<Item = FetchOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl PageSource for ScriptedSource {
    async fn fetch(&self, cursor: &str) -> FetchOutcome {
        self.calls.lock().unwrap().push(cursor.to_string());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| FetchOutcome::TransportError("script exhausted".into()))
    }
}

/// A successful page holding `listings`.
pub fn page(listings: Vec<ServerListing>, next: Option<&str>) -> FetchOutcome {
    FetchOutcome::Success(ListingPage {
        data: listings,
        next_page_cursor: next.map(str::to_string),
    })
}

pub fn vacant(n: usize) -> Vec<ServerListing> {
    (0..n)
        .map(|i| ServerListing {
            id: format!("vacant-{i}"),
            access_code: format!("code-vacant-{i}"),
            owner: Some(Owner { id: 1, name: None }),
            players: Some(Vec::new()),
            ..Default::default()
        })
        .collect()
}

/// A listing owned by user 1 with the given player ids inside.
pub fn occupied(tag: &str, players: &[i64]) -> ServerListing {
    ServerListing {
        id: tag.to_string(),
        name: tag.to_string(),
        access_code: format!("code-{tag}"),
        owner: Some(Owner { id: 1, name: None }),
        players: Some(
            players
                .iter()
                .map(|&id| Player {
                    id,
                    ..Default::default()
                })
                .collect(),
        ),
        ..Default::default()
    }
}
