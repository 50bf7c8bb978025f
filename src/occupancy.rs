//! Occupancy classification of listings.
//!
//! These functions are the only place that decides whether a listing has
//! players, whether its owner is inside, and how many non-owner players it
//! holds. Totals, filters and rendering all go through them.

use serde::Serialize;

use crate::models::{ServerListing, Settings};

/// True if somebody other than the owner is in the server.
///
/// A non-empty `playerTokens` list is authoritative on its own; it carries no
/// owner identity.
pub fn has_players(s: &ServerListing) -> bool {
    if has_tokens(s) {
        return true;
    }
    let owner_id = s.owner.as_ref().map(|o| o.id);
    s.players
        .as_deref()
        .is_some_and(|players| players.iter().any(|p| Some(p.id) != owner_id))
}

/// True iff the owner appears in the `players` list.
pub fn owner_inside(s: &ServerListing) -> bool {
    match (&s.owner, &s.players) {
        (Some(owner), Some(players)) => players.iter().any(|p| p.id == owner.id),
        _ => false,
    }
}

/// Number of players excluding the owner.
///
/// When tokens are present their count is returned verbatim, so an owner
/// holding a token is counted too. Upstream exposes nothing to correct that.
pub fn count_excluding_owner(s: &ServerListing) -> usize {
    if let Some(tokens) = s.player_tokens.as_deref().filter(|t| !t.is_empty()) {
        return tokens.len();
    }
    let owner_id = s.owner.as_ref().map(|o| o.id);
    s.players
        .as_deref()
        .map_or(0, |players| players.iter().filter(|p| Some(p.id) != owner_id).count())
}

fn has_tokens(s: &ServerListing) -> bool {
    s.player_tokens.as_deref().is_some_and(|t| !t.is_empty())
}

/// Classification results for one listing.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    pub has_players: bool,
    pub owner_inside: bool,
    pub player_count: usize,
}

impl Occupancy {
    pub fn of(s: &ServerListing) -> Self {
        Self {
            has_players: has_players(s),
            owner_inside: owner_inside(s),
            player_count: count_excluding_owner(s),
        }
    }
}

/// The two user-toggleable display filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingFilter {
    pub show_owner_inside: bool,
    pub only_one_player: bool,
}

impl From<&Settings> for ListingFilter {
    fn from(settings: &Settings) -> Self {
        Self {
            show_owner_inside: settings.show_owner_inside,
            only_one_player: settings.only_one_player,
        }
    }
}

impl ListingFilter {
    /// Whether a classified listing should be displayed.
    pub fn admits(&self, occupancy: &Occupancy) -> bool {
        if !occupancy.has_players {
            return false;
        }
        if occupancy.owner_inside && !self.show_owner_inside {
            return false;
        }
        !self.only_one_player || occupancy.player_count == 1
    }

    /// Classifies every record first, then keeps those the filter admits.
    pub fn apply<'a>(
        &self,
        records: &'a [ServerListing],
    ) -> impl Iterator<Item = (&'a ServerListing, Occupancy)> + 'a {
        let filter = *self;
        records
            .iter()
            .map(|s| (s, Occupancy::of(s)))
            .filter(move |(_, occupancy)| filter.admits(occupancy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Owner, Player};

    fn player(id: i64) -> Player {
        Player {
            id,
            ..Default::default()
        }
    }

    fn listing(owner: Option<i64>, players: Option<&[i64]>, tokens: Option<usize>) -> ServerListing {
        ServerListing {
            id: "id".into(),
            access_code: "code".into(),
            owner: owner.map(|id| Owner { id, name: None }),
            players: players.map(|ids| ids.iter().copied().map(player).collect()),
            player_tokens: tokens.map(|n| (0..n).map(|i| format!("t{i}")).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn test_tokens_mean_players_regardless_of_player_list() {
        assert!(has_players(&listing(Some(1), None, Some(1))));
        assert!(has_players(&listing(Some(1), Some(&[]), Some(2))));
        assert!(has_players(&listing(Some(1), Some(&[1]), Some(1))));
    }

    #[test]
    fn test_no_players_without_either_collection() {
        assert!(!has_players(&listing(Some(1), None, None)));
        assert!(!has_players(&listing(Some(1), Some(&[]), Some(0))));
        assert!(!has_players(&listing(None, Some(&[]), None)));
    }

    #[test]
    fn test_owner_alone_is_not_players() {
        assert!(!has_players(&listing(Some(1), Some(&[1]), None)));
        assert!(has_players(&listing(Some(1), Some(&[1, 2]), None)));
    }

    #[test]
    fn test_owner_inside_requires_owner() {
        assert!(!owner_inside(&listing(None, Some(&[1, 2]), None)));
        assert!(!owner_inside(&listing(Some(1), None, Some(3))));
        assert!(owner_inside(&listing(Some(1), Some(&[2, 1]), None)));
        assert!(!owner_inside(&listing(Some(1), Some(&[2, 3]), None)));
    }

    #[test]
    fn test_count_prefers_tokens_verbatim() {
        // owner holds a token too; the count is not corrected
        assert_eq!(count_excluding_owner(&listing(Some(1), Some(&[1, 2]), Some(2))), 2);
        assert_eq!(count_excluding_owner(&listing(Some(1), Some(&[1, 2, 3]), None)), 2);
        assert_eq!(count_excluding_owner(&listing(None, Some(&[1, 2]), None)), 2);
        assert_eq!(count_excluding_owner(&listing(Some(1), None, None)), 0);
    }

    #[test]
    fn test_filter_hides_owner_inside_when_disabled() {
        let records = vec![
            listing(Some(1), Some(&[1, 2]), None),
            listing(Some(1), Some(&[2]), None),
            listing(Some(1), None, None),
        ];
        let filter = ListingFilter {
            show_owner_inside: false,
            only_one_player: false,
        };
        let shown: Vec<_> = filter.apply(&records).collect();
        assert_eq!(shown.len(), 1);
        assert!(!shown[0].1.owner_inside);

        let filter = ListingFilter {
            show_owner_inside: true,
            only_one_player: false,
        };
        assert_eq!(filter.apply(&records).count(), 2);
    }

    #[test]
    fn test_filter_only_one_player_uses_owner_excluded_count() {
        let records = vec![
            listing(Some(1), Some(&[1, 2]), None),
            listing(Some(1), Some(&[2, 3]), None),
            listing(None, None, Some(1)),
        ];
        let filter = ListingFilter {
            show_owner_inside: true,
            only_one_player: true,
        };
        let counts: Vec<_> = filter.apply(&records).map(|(_, o)| o.player_count).collect();
        assert_eq!(counts, vec![1, 1]);
    }
}
