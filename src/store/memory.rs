/*!
In-memory store for tests. Same natural keys as the postgres schema.
A sync transaction reads from a snapshot plus its own writes; on commit
only the rows it wrote are merged into the current shared tables, so
transactions for different users can overlap without losing rows.
*/
use async_mutex::Mutex;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

use super::{NewEvent, Store, SyncTx};
use crate::catalog::{ArtistRef, CatalogArtist, CatalogTrack};
use crate::models::{Artist, ArtistPlay, ListeningEvent, NewUser, Track, User};
use crate::se;

#[derive(Clone, Default, Debug)]
pub struct Tables {
    pub users: Vec<User>,
    pub artists: Vec<Artist>,
    pub tracks: Vec<Track>,
    pub events: Vec<ListeningEvent>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Tables {
        self.tables.lock().await.clone()
    }

    /// Seed an event directly, bypassing sync
    pub async fn push_event(&self, user_id: i64, event: NewEvent) {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        tables.events.push(ListeningEvent {
            id,
            user_id,
            spotify_track_id: event.spotify_track_id,
            played_at: event.played_at,
            context: event.context,
        });
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, user_id: i64) -> crate::Result<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.iter().find(|u| u.id == user_id).cloned())
    }

    async fn upsert_user(&self, new: &NewUser) -> crate::Result<User> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        if let Some(user) = tables
            .users
            .iter_mut()
            .find(|u| u.spotify_user_id == new.spotify_user_id)
        {
            user.display_name = new.display_name.clone();
            user.access_token = Some(new.access.value.clone());
            user.access_nonce = Some(new.access.nonce.clone());
            if let Some(refresh) = &new.refresh {
                user.refresh_token = Some(refresh.value.clone());
                user.refresh_nonce = Some(refresh.nonce.clone());
            }
            user.token_expires_at = Some(new.token_expires_at);
            user.modified = now;
            return Ok(user.clone());
        }
        let user = User {
            id: tables.next_id(),
            spotify_user_id: new.spotify_user_id.clone(),
            display_name: new.display_name.clone(),
            access_token: Some(new.access.value.clone()),
            access_nonce: Some(new.access.nonce.clone()),
            refresh_token: new.refresh.as_ref().map(|r| r.value.clone()),
            refresh_nonce: new.refresh.as_ref().map(|r| r.nonce.clone()),
            token_expires_at: Some(new.token_expires_at),
            created: now,
            modified: now,
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn begin_sync(&self) -> crate::Result<Box<dyn SyncTx>> {
        let working = self.tables.lock().await.clone();
        Ok(Box::new(MemorySyncTx {
            shared: self.tables.clone(),
            working,
            written: HashSet::new(),
        }))
    }

    async fn count_tracks(&self, user_id: i64) -> crate::Result<i64> {
        let tables = self.tables.lock().await;
        Ok(tables.tracks.iter().filter(|t| t.user_id == user_id).count() as i64)
    }

    async fn count_events(&self, user_id: i64) -> crate::Result<i64> {
        let tables = self.tables.lock().await;
        Ok(tables.events.iter().filter(|e| e.user_id == user_id).count() as i64)
    }

    async fn events(&self, user_id: i64) -> crate::Result<Vec<ListeningEvent>> {
        let tables = self.tables.lock().await;
        let mut events = tables
            .events
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect::<Vec<_>>();
        events.sort_by_key(|e| (e.played_at, e.id));
        Ok(events)
    }

    async fn artist_plays(&self, user_id: i64) -> crate::Result<Vec<ArtistPlay>> {
        let tables = self.tables.lock().await;
        let mut events = tables
            .events
            .iter()
            .filter(|e| e.user_id == user_id)
            .collect::<Vec<_>>();
        events.sort_by_key(|e| (e.played_at, e.id));
        Ok(events
            .into_iter()
            .filter_map(|e| {
                let track = tables
                    .tracks
                    .iter()
                    .find(|t| t.user_id == user_id && t.spotify_track_id == e.spotify_track_id)?;
                let artist = tables.artists.iter().find(|a| a.id == track.artist_id)?;
                Some(ArtistPlay {
                    artist_name: artist.name.clone(),
                    genres: artist.genres.clone(),
                })
            })
            .collect())
    }
}

/// Rows that carry a natural key besides their id
trait Keyed {
    fn id(&self) -> i64;
    fn same_key(&self, other: &Self) -> bool;
}

impl Keyed for Artist {
    fn id(&self) -> i64 {
        self.id
    }
    fn same_key(&self, other: &Self) -> bool {
        self.user_id == other.user_id && self.spotify_artist_id == other.spotify_artist_id
    }
}

impl Keyed for Track {
    fn id(&self) -> i64 {
        self.id
    }
    fn same_key(&self, other: &Self) -> bool {
        self.user_id == other.user_id && self.spotify_track_id == other.spotify_track_id
    }
}

impl Keyed for ListeningEvent {
    fn id(&self) -> i64 {
        self.id
    }
    fn same_key(&self, other: &Self) -> bool {
        self.user_id == other.user_id
            && self.spotify_track_id == other.spotify_track_id
            && self.played_at == other.played_at
    }
}

/// Apply the rows in `written` onto `rows`. A new row whose natural key
/// was committed by someone else in the meantime is a unique violation.
fn merge<T: Keyed + Clone>(
    rows: &mut Vec<T>,
    working: &[T],
    written: &HashSet<i64>,
) -> crate::Result<()> {
    for row in working.iter().filter(|r| written.contains(&r.id())) {
        if let Some(existing) = rows.iter_mut().find(|r| r.id() == row.id()) {
            *existing = row.clone();
            continue;
        }
        if rows.iter().any(|r| r.same_key(row)) {
            return Err(se!("unique violation committing row {}", row.id()));
        }
        rows.push(row.clone());
    }
    Ok(())
}

pub struct MemorySyncTx {
    shared: Arc<Mutex<Tables>>,
    // snapshot from `begin_sync` plus this transaction's writes
    working: Tables,
    // ids of rows this transaction inserted or updated
    written: HashSet<i64>,
}

impl MemorySyncTx {
    /// Ids come from the shared counter so they never collide across transactions
    async fn next_id(&self) -> i64 {
        self.shared.lock().await.next_id()
    }

    fn artist_mut(&mut self, user_id: i64, spotify_artist_id: &str) -> Option<&mut Artist> {
        self.working
            .artists
            .iter_mut()
            .find(|a| a.user_id == user_id && a.spotify_artist_id == spotify_artist_id)
    }

    async fn insert_artist(
        &mut self,
        user_id: i64,
        id: &str,
        name: &str,
        genres: Vec<String>,
    ) -> Artist {
        let artist = Artist {
            id: self.next_id().await,
            user_id,
            spotify_artist_id: id.to_string(),
            name: name.to_string(),
            genres,
        };
        self.written.insert(artist.id);
        self.working.artists.push(artist.clone());
        artist
    }
}

#[async_trait]
impl SyncTx for MemorySyncTx {
    async fn upsert_artist(&mut self, user_id: i64, artist: &CatalogArtist) -> crate::Result<Artist> {
        if let Some(existing) = self.artist_mut(user_id, &artist.id) {
            existing.name = artist.name.clone();
            existing.genres = artist.genres.clone();
            let existing = existing.clone();
            self.written.insert(existing.id);
            return Ok(existing);
        }
        Ok(self
            .insert_artist(user_id, &artist.id, &artist.name, artist.genres.clone())
            .await)
    }

    async fn find_or_create_artist(&mut self, user_id: i64, artist: &ArtistRef) -> crate::Result<Artist> {
        if let Some(existing) = self.artist_mut(user_id, &artist.id) {
            return Ok(existing.clone());
        }
        Ok(self
            .insert_artist(user_id, &artist.id, &artist.name, vec![])
            .await)
    }

    async fn upsert_track(
        &mut self,
        user_id: i64,
        track: &CatalogTrack,
        artist_id: i64,
    ) -> crate::Result<Track> {
        if let Some(existing) = self
            .working
            .tracks
            .iter_mut()
            .find(|t| t.user_id == user_id && t.spotify_track_id == track.id)
        {
            existing.name = track.name.clone();
            existing.album_name = track.album_name.clone();
            existing.popularity = track.popularity;
            existing.artist_id = artist_id;
            let existing = existing.clone();
            self.written.insert(existing.id);
            return Ok(existing);
        }
        let row = Track {
            id: self.next_id().await,
            user_id,
            spotify_track_id: track.id.clone(),
            name: track.name.clone(),
            album_name: track.album_name.clone(),
            popularity: track.popularity,
            artist_id,
        };
        self.written.insert(row.id);
        self.working.tracks.push(row.clone());
        Ok(row)
    }

    async fn insert_event(&mut self, user_id: i64, event: &NewEvent) -> crate::Result<bool> {
        let exists = self.working.events.iter().any(|e| {
            e.user_id == user_id
                && e.spotify_track_id == event.spotify_track_id
                && e.played_at == event.played_at
        });
        if exists {
            return Ok(false);
        }
        let id = self.next_id().await;
        self.written.insert(id);
        self.working.events.push(ListeningEvent {
            id,
            user_id,
            spotify_track_id: event.spotify_track_id.clone(),
            played_at: event.played_at,
            context: event.context.clone(),
        });
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> crate::Result<()> {
        let mut shared = self.shared.lock().await;
        // all or nothing: merge into a copy, swap it in only if every row fits
        let mut merged = (*shared).clone();
        merge(&mut merged.artists, &self.working.artists, &self.written)?;
        merge(&mut merged.tracks, &self.working.tracks, &self.written)?;
        merge(&mut merged.events, &self.working.events, &self.written)?;
        *shared = merged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;
    use chrono::TimeZone;

    fn artist(id: &str, name: &str) -> CatalogArtist {
        CatalogArtist {
            id: id.into(),
            name: name.into(),
            genres: vec!["ambient".into()],
        }
    }

    fn new_user(spotify_user_id: &str) -> NewUser {
        NewUser {
            spotify_user_id: spotify_user_id.into(),
            display_name: spotify_user_id.into(),
            access: crypto::encrypt("token").unwrap(),
            refresh: None,
            token_expires_at: Utc::now(),
        }
    }

    #[async_std::test]
    async fn overlapping_transactions_keep_each_others_writes() {
        let store = MemoryStore::new();
        let a = store.upsert_user(&new_user("a")).await.unwrap().id;
        let b = store.upsert_user(&new_user("b")).await.unwrap().id;

        let mut tx_a = store.begin_sync().await.unwrap();
        let mut tx_b = store.begin_sync().await.unwrap();
        tx_a.upsert_artist(a, &artist("x", "X")).await.unwrap();
        tx_b.upsert_artist(b, &artist("y", "Y")).await.unwrap();
        // a login landing while both syncs are open
        store.upsert_user(&new_user("c")).await.unwrap();
        tx_a.commit().await.unwrap();
        tx_b.commit().await.unwrap();

        let tables = store.snapshot().await;
        let mut artists = tables
            .artists
            .iter()
            .map(|r| (r.user_id, r.spotify_artist_id.as_str()))
            .collect::<Vec<_>>();
        artists.sort();
        assert_eq!(artists, vec![(a, "x"), (b, "y")]);
        assert_eq!(tables.users.len(), 3);
    }

    #[async_std::test]
    async fn updates_from_a_later_commit_win() {
        let store = MemoryStore::new();
        let a = store.upsert_user(&new_user("a")).await.unwrap().id;
        let mut tx = store.begin_sync().await.unwrap();
        tx.upsert_artist(a, &artist("x", "X")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin_sync().await.unwrap();
        tx.upsert_artist(a, &artist("x", "X renamed")).await.unwrap();
        tx.commit().await.unwrap();

        let tables = store.snapshot().await;
        assert_eq!(tables.artists.len(), 1);
        assert_eq!(tables.artists[0].name, "X renamed");
    }

    #[async_std::test]
    async fn same_natural_key_from_two_transactions_is_rejected() {
        let store = MemoryStore::new();
        let a = store.upsert_user(&new_user("a")).await.unwrap().id;
        let event = NewEvent {
            spotify_track_id: "t1".into(),
            played_at: Utc.with_ymd_and_hms(2024, 3, 4, 20, 0, 0).unwrap(),
            context: None,
        };

        let mut first = store.begin_sync().await.unwrap();
        let mut second = store.begin_sync().await.unwrap();
        assert!(first.insert_event(a, &event).await.unwrap());
        assert!(second.insert_event(a, &event).await.unwrap());
        second.upsert_artist(a, &artist("x", "X")).await.unwrap();
        first.commit().await.unwrap();
        assert!(second.commit().await.is_err());

        // the failed commit applied nothing
        let tables = store.snapshot().await;
        assert_eq!(tables.events.len(), 1);
        assert!(tables.artists.is_empty());
    }

    #[async_std::test]
    async fn dropped_transaction_discards_writes() {
        let store = MemoryStore::new();
        let a = store.upsert_user(&new_user("a")).await.unwrap().id;
        let mut tx = store.begin_sync().await.unwrap();
        tx.upsert_artist(a, &artist("x", "X")).await.unwrap();
        drop(tx);
        assert!(store.snapshot().await.artists.is_empty());
    }
}
