use chrono::{DateTime, NaiveDate, Utc};

use crate::crypto;

#[derive(sqlx::FromRow, Debug, Clone, serde::Serialize)]
pub struct User {
    pub id: i64,
    // id reported by spotify, unique per spotify account
    pub spotify_user_id: String,
    // name reported by spotify, overwritten on every login
    pub display_name: String,
    // a spotify access token that can be used to access
    // the spotify user's info. This value is AES_256_GCM
    // encrypted using the application secret set in the
    // current environment and the `access_nonce` generated
    // when the value was originally encrypted.
    #[serde(skip)]
    pub access_token: Option<String>,
    #[serde(skip)]
    pub access_nonce: Option<String>,
    // a spotify token that can be used to refresh the spotify
    // user's access_token. This is encrypted and stored the
    // same way as the actual access_token.
    #[serde(skip)]
    pub refresh_token: Option<String>,
    #[serde(skip)]
    pub refresh_nonce: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl User {
    /// The encrypted access token, if this user ever completed a login
    pub fn access_enc(&self) -> Option<crypto::Enc> {
        match (&self.access_token, &self.access_nonce) {
            (Some(value), Some(nonce)) => Some(crypto::Enc {
                value: value.clone(),
                nonce: nonce.clone(),
            }),
            _ => None,
        }
    }
}

/// Everything needed to create or refresh a user after a login
#[derive(Debug, Clone)]
pub struct NewUser {
    pub spotify_user_id: String,
    pub display_name: String,
    pub access: crypto::Enc,
    pub refresh: Option<crypto::Enc>,
    pub token_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Artist {
    pub id: i64,
    pub user_id: i64,
    pub spotify_artist_id: String,
    pub name: String,
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Track {
    pub id: i64,
    pub user_id: i64,
    pub spotify_track_id: String,
    pub name: String,
    pub album_name: String,
    pub popularity: Option<i32>,
    pub artist_id: i64,
}

/// A single play. `spotify_track_id` is a weak reference to a `Track`,
/// resolved at query time; the track row may not exist yet.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ListeningEvent {
    pub id: i64,
    pub user_id: i64,
    pub spotify_track_id: String,
    pub played_at: DateTime<Utc>,
    pub context: Option<String>,
}

/// An event that resolved through its track to an artist
#[derive(Debug, Clone, PartialEq)]
pub struct ArtistPlay {
    pub artist_name: String,
    pub genres: Vec<String>,
}

/// Genres are stored as one comma-joined column
pub fn join_genres(genres: &[String]) -> String {
    genres.join(", ")
}

pub fn split_genres(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SyncReport {
    pub status: &'static str,
    pub top_artists_synced: usize,
    pub top_tracks_synced: usize,
    pub recent_plays_added: usize,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ArtistCount {
    pub artist_name: String,
    pub play_count: i64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct GenreCount {
    pub genre: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Summary {
    pub total_tracks: i64,
    pub total_plays: i64,
    pub top_artists: Vec<ArtistCount>,
    pub top_genres: Vec<GenreCount>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TimePoint {
    pub weekday: u32,
    pub hour: u32,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TimeDistribution {
    pub points: Vec<TimePoint>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Session {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub plays: i64,
    pub duration_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Sessions {
    pub sessions: Vec<Session>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DayCount {
    pub date: NaiveDate,
    pub plays: i64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DailyTrend {
    pub points: Vec<DayCount>,
}
