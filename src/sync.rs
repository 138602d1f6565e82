/*!
Reconciliation of a user's provider catalog into the store.

A sync pass fetches top artists, top tracks and recently played, then
merges all three in a single store transaction. Any fetch failure
happens before the transaction opens, so nothing is partially merged.
*/
use async_mutex::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::{Catalog, CatalogArtist, CatalogTrack, RecentPlay};
use crate::models::SyncReport;
use crate::store::{NewEvent, Store, SyncTx};
use crate::{crypto, utils, Config, Error, LOG};

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub top_artists: u32,
    pub top_tracks: u32,
    pub recently_played: u32,
}

impl Limits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_artists: config.top_artists_limit,
            top_tracks: config.top_tracks_limit,
            recently_played: config.recently_played_limit,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            top_artists: 20,
            top_tracks: 50,
            recently_played: 50,
        }
    }
}

/// The three collections of one sync pass
struct Fetched {
    artists: Vec<CatalogArtist>,
    tracks: Vec<CatalogTrack>,
    recent: Vec<RecentPlay>,
}

pub struct Reconciler {
    limits: Limits,
    // sync passes for the same user run one at a time
    user_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl Reconciler {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn user_lock(&self, user_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run one full sync pass for `user_id`
    pub async fn sync_user(
        &self,
        store: &dyn Store,
        catalog: &dyn Catalog,
        user_id: i64,
    ) -> crate::Result<SyncReport> {
        let user = store
            .get_user(user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {}", user_id)))?;
        let access_enc = user.access_enc().ok_or_else(|| {
            Error::NotFound(format!("user {} has not logged in with spotify", user_id))
        })?;
        let access_token = crypto::decrypt(&access_enc)?;

        let lock = self.user_lock(user_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.run_pass(store, catalog, user_id, &access_token).await
        };
        self.release_user_lock(user_id, lock).await;
        result
    }

    /// Drop the user's lock entry once no other pass holds or waits on it
    async fn release_user_lock(&self, user_id: i64, lock: Arc<Mutex<()>>) {
        let mut locks = self.user_locks.lock().await;
        drop(lock);
        if locks
            .get(&user_id)
            .map_or(false, |l| Arc::strong_count(l) == 1)
        {
            locks.remove(&user_id);
        }
    }

    async fn run_pass(
        &self,
        store: &dyn Store,
        catalog: &dyn Catalog,
        user_id: i64,
        access_token: &str,
    ) -> crate::Result<SyncReport> {
        let fetched = match self.fetch(catalog, access_token).await {
            Ok(f) => f,
            Err(e) => {
                slog::error!(
                    LOG, "sync fetch failed";
                    "user_id" => user_id,
                    "code" => e.code(),
                    "error" => e.to_string(),
                );
                return Err(e);
            }
        };
        let events = fetched
            .recent
            .iter()
            .map(new_event)
            .collect::<crate::Result<Vec<_>>>()?;

        let mut tx = store.begin_sync().await?;
        let artists_synced = merge_artists(tx.as_mut(), user_id, &fetched.artists).await?;
        let tracks_synced = merge_tracks(tx.as_mut(), user_id, &fetched.tracks).await?;
        let plays_added = append_events(tx.as_mut(), user_id, &events).await?;
        tx.commit().await?;

        slog::info!(
            LOG, "synced user";
            "user_id" => user_id,
            "top_artists_synced" => artists_synced,
            "top_tracks_synced" => tracks_synced,
            "recent_plays_fetched" => events.len(),
            "recent_plays_added" => plays_added,
        );
        Ok(SyncReport {
            status: "ok",
            top_artists_synced: artists_synced,
            top_tracks_synced: tracks_synced,
            recent_plays_added: plays_added,
        })
    }

    async fn fetch(&self, catalog: &dyn Catalog, access_token: &str) -> crate::Result<Fetched> {
        let artists = catalog
            .top_artists(access_token, self.limits.top_artists)
            .await?;
        let tracks = catalog
            .top_tracks(access_token, self.limits.top_tracks)
            .await?;
        let recent = catalog
            .recently_played(access_token, self.limits.recently_played)
            .await?;
        Ok(Fetched {
            artists,
            tracks,
            recent,
        })
    }
}

fn new_event(play: &RecentPlay) -> crate::Result<NewEvent> {
    let played_at = utils::parse_instant(&play.played_at).ok_or_else(|| {
        Error::MalformedUpstreamData(format!(
            "played_at: invalid timestamp {:?} for track {}",
            play.played_at, play.track_id
        ))
    })?;
    Ok(NewEvent {
        spotify_track_id: play.track_id.clone(),
        played_at,
        context: play.context_type.clone(),
    })
}

async fn merge_artists(
    tx: &mut dyn SyncTx,
    user_id: i64,
    artists: &[CatalogArtist],
) -> crate::Result<usize> {
    for artist in artists {
        tx.upsert_artist(user_id, artist).await?;
    }
    Ok(artists.len())
}

async fn merge_tracks(
    tx: &mut dyn SyncTx,
    user_id: i64,
    tracks: &[CatalogTrack],
) -> crate::Result<usize> {
    for track in tracks {
        // only the primary artist is kept
        let primary = track.artists.first().ok_or_else(|| {
            Error::MalformedUpstreamData(format!("track {} has no artists", track.id))
        })?;
        let artist = tx.find_or_create_artist(user_id, primary).await?;
        tx.upsert_track(user_id, track, artist.id).await?;
    }
    Ok(tracks.len())
}

async fn append_events(
    tx: &mut dyn SyncTx,
    user_id: i64,
    events: &[NewEvent],
) -> crate::Result<usize> {
    let mut added = 0;
    for event in events {
        if tx.insert_event(user_id, event).await? {
            added += 1;
        }
    }
    Ok(added)
}
