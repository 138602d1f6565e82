/*!
The entity store. Natural keys are the durable contract:

- users: `spotify_user_id`
- artists: `(user_id, spotify_artist_id)`
- tracks: `(user_id, spotify_track_id)`
- listening events: `(user_id, spotify_track_id, played_at)`

Every write below is a single atomic upsert on one of these keys.
*/
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::catalog::{ArtistRef, CatalogArtist, CatalogTrack};
use crate::models::{Artist, ArtistPlay, ListeningEvent, NewUser, Track, User};

#[cfg(test)]
pub mod memory;
pub mod postgres;

/// An event ready to be appended
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub spotify_track_id: String,
    pub played_at: DateTime<Utc>,
    pub context: Option<String>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user(&self, user_id: i64) -> crate::Result<Option<User>>;

    /// Insert a user or overwrite the display name and credentials
    /// of the existing one with the same provider user id
    async fn upsert_user(&self, user: &NewUser) -> crate::Result<User>;

    /// Open the unit of work a sync pass writes through. Nothing is
    /// visible to readers until `SyncTx::commit`.
    async fn begin_sync(&self) -> crate::Result<Box<dyn SyncTx>>;

    async fn count_tracks(&self, user_id: i64) -> crate::Result<i64>;

    async fn count_events(&self, user_id: i64) -> crate::Result<i64>;

    /// All of a user's events, ascending by `played_at`
    async fn events(&self, user_id: i64) -> crate::Result<Vec<ListeningEvent>>;

    /// One row per event that resolves event -> track -> artist.
    /// Events whose track is not materialized are left out.
    async fn artist_plays(&self, user_id: i64) -> crate::Result<Vec<ArtistPlay>>;
}

#[async_trait]
pub trait SyncTx: Send {
    /// Insert, or overwrite name and genres of, the artist
    async fn upsert_artist(&mut self, user_id: i64, artist: &CatalogArtist) -> crate::Result<Artist>;

    /// Return the existing artist untouched, or create it with no genres
    async fn find_or_create_artist(&mut self, user_id: i64, artist: &ArtistRef) -> crate::Result<Artist>;

    /// Insert, or overwrite name, album, popularity and artist of, the track
    async fn upsert_track(
        &mut self,
        user_id: i64,
        track: &CatalogTrack,
        artist_id: i64,
    ) -> crate::Result<Track>;

    /// Append the event unless its natural key already exists.
    /// Returns whether a row was inserted.
    async fn insert_event(&mut self, user_id: i64, event: &NewEvent) -> crate::Result<bool>;

    async fn commit(self: Box<Self>) -> crate::Result<()>;
}
