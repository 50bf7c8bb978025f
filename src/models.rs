//! Data models for the upstream private-server listing API and the
//! records persisted between sessions.

use serde::{Deserialize, Deserializer, Serialize};

/// Storage key of the persisted [`Settings`].
pub const SETTINGS_KEY: &str = "settings";
/// Storage key of the persisted [`TotalsSnapshot`].
pub const TOTALS_CACHE_KEY: &str = "totalsCache";
/// Storage key of the persisted [`LastJoined`] marker.
pub const LAST_JOINED_KEY: &str = "lastJoinedServer";

/// One page of the upstream listing endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
    #[serde(default)]
    pub data: Vec<ServerListing>,
    /// Cursor of the following page. Absent, null and `""` all mean "last page".
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub next_page_cursor: Option<String>,
}

/// Represents a single private server returned by the listing API.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerListing {
    /// Instance id; upstream sends null for servers nobody has started.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub access_code: String,
    #[serde(default)]
    pub owner: Option<Owner>,
    #[serde(default)]
    pub players: Option<Vec<Player>>,
    #[serde(default)]
    pub player_tokens: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Aggregate produced by a complete totals walk.
///
/// Persisted under [`TOTALS_CACHE_KEY`] and considered fresh for ten minutes
/// after `timestamp` (unix milliseconds).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TotalsSnapshot {
    pub timestamp: u64,
    pub total_servers: u64,
    pub servers_with_players: u64,
    pub servers_with_players_no_owner: u64,
    pub max_pages: u32,
}

/// User preferences, persisted under [`SETTINGS_KEY`].
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Do not walk every page for totals on startup; rely on the cache.
    pub skip_totals: bool,
    /// Show listings whose owner is currently inside.
    pub show_owner_inside: bool,
    /// Show only listings with exactly one non-owner player.
    pub only_one_player: bool,
    /// Join through a deep link rather than the host launcher.
    pub use_deeplink: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            skip_totals: false,
            show_owner_inside: true,
            only_one_player: false,
            use_deeplink: true,
        }
    }
}

/// The listing the user joined most recently.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LastJoined {
    pub id: String,
    pub ts: u64,
}

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt {
        Some(s) if s.is_empty() => Ok(None),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_decodes_upstream_shape() {
        let json = r#"{
            "previousPageCursor": null,
            "nextPageCursor": "c1",
            "data": [{
                "id": "9f1c",
                "name": "Friends",
                "accessCode": "abc",
                "owner": {"id": 7, "name": "host", "displayName": "Host"},
                "players": [{"id": 7, "name": "host"}, {"id": 8}],
                "playerTokens": ["t1", "t2"],
                "maxPlayers": 12
            }]
        }"#;
        let page: ListingPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.next_page_cursor.as_deref(), Some("c1"));
        let listing = &page.data[0];
        assert_eq!(listing.access_code, "abc");
        assert_eq!(listing.owner.as_ref().map(|o| o.id), Some(7));
        assert_eq!(listing.players.as_ref().map(Vec::len), Some(2));
        assert_eq!(listing.player_tokens.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_optional_fields_tolerated() {
        let json = r#"{"data": [{"id": null, "accessCode": "x", "owner": null}], "nextPageCursor": ""}"#;
        let page: ListingPage = serde_json::from_str(json).unwrap();
        assert!(page.next_page_cursor.is_none());
        let listing = &page.data[0];
        assert!(listing.id.is_empty());
        assert!(listing.owner.is_none());
        assert!(listing.players.is_none());
        assert!(listing.player_tokens.is_none());
    }

    #[test]
    fn test_settings_fill_missing_fields_with_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"skipTotals": true}"#).unwrap();
        assert!(settings.skip_totals);
        assert!(settings.show_owner_inside);
        assert!(!settings.only_one_player);
        assert!(settings.use_deeplink);
    }
}
