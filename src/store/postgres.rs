use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use super::{NewEvent, Store, SyncTx};
use crate::catalog::{ArtistRef, CatalogArtist, CatalogTrack};
use crate::models::{self, Artist, ArtistPlay, ListeningEvent, NewUser, Track, User};
use crate::se;

#[derive(sqlx::FromRow)]
struct ArtistRow {
    id: i64,
    user_id: i64,
    spotify_artist_id: String,
    name: String,
    genres: String,
}

impl From<ArtistRow> for Artist {
    fn from(row: ArtistRow) -> Self {
        Artist {
            id: row.id,
            user_id: row.user_id,
            spotify_artist_id: row.spotify_artist_id,
            name: row.name,
            genres: models::split_genres(&row.genres),
        }
    }
}

#[derive(sqlx::FromRow)]
struct TrackRow {
    id: i64,
    user_id: i64,
    spotify_track_id: String,
    name: String,
    album_name: String,
    popularity: Option<i32>,
    artist_id: i64,
}

impl From<TrackRow> for Track {
    fn from(row: TrackRow) -> Self {
        Track {
            id: row.id,
            user_id: row.user_id,
            spotify_track_id: row.spotify_track_id,
            name: row.name,
            album_name: row.album_name,
            popularity: row.popularity,
            artist_id: row.artist_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    user_id: i64,
    spotify_track_id: String,
    played_at: DateTime<Utc>,
    context: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ArtistPlayRow {
    artist_name: String,
    genres: String,
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_user(&self, user_id: i64) -> crate::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("select * from users where id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn upsert_user(&self, user: &NewUser) -> crate::Result<User> {
        let (refresh_token, refresh_nonce) = match &user.refresh {
            Some(enc) => (Some(enc.value.as_str()), Some(enc.nonce.as_str())),
            None => (None, None),
        };
        let user = sqlx::query_as::<_, User>(
            "
            insert into
            users (
                spotify_user_id, display_name,
                access_token, access_nonce,
                refresh_token, refresh_nonce,
                token_expires_at
            )
            values ($1, $2, $3, $4, $5, $6, $7)
            on conflict (spotify_user_id) do update set
            display_name = excluded.display_name,
            access_token = excluded.access_token, access_nonce = excluded.access_nonce,
            refresh_token = coalesce(excluded.refresh_token, users.refresh_token),
            refresh_nonce = coalesce(excluded.refresh_nonce, users.refresh_nonce),
            token_expires_at = excluded.token_expires_at,
            modified = now()
            returning *
            ",
        )
        .bind(&user.spotify_user_id)
        .bind(&user.display_name)
        .bind(&user.access.value)
        .bind(&user.access.nonce)
        .bind(refresh_token)
        .bind(refresh_nonce)
        .bind(user.token_expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| se!("error upserting user {:?}", e))?;
        Ok(user)
    }

    async fn begin_sync(&self) -> crate::Result<Box<dyn SyncTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| se!("error starting sync transaction {:?}", e))?;
        Ok(Box::new(PgSyncTx { tx }))
    }

    async fn count_tracks(&self, user_id: i64) -> crate::Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("select count(*) from tracks where user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_events(&self, user_id: i64) -> crate::Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "select count(*) from listening_events where user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn events(&self, user_id: i64) -> crate::Result<Vec<ListeningEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "
            select id, user_id, spotify_track_id, played_at, context
            from listening_events
            where user_id = $1
            order by played_at asc, id asc
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| se!("error getting events for user {} {}", user_id, e))?;
        Ok(rows
            .into_iter()
            .map(|r| ListeningEvent {
                id: r.id,
                user_id: r.user_id,
                spotify_track_id: r.spotify_track_id,
                played_at: r.played_at,
                context: r.context,
            })
            .collect())
    }

    async fn artist_plays(&self, user_id: i64) -> crate::Result<Vec<ArtistPlay>> {
        let rows = sqlx::query_as::<_, ArtistPlayRow>(
            "
            select a.name as artist_name, a.genres
            from listening_events e
                inner join tracks t
                on t.user_id = e.user_id and t.spotify_track_id = e.spotify_track_id
                inner join artists a
                on a.id = t.artist_id
            where e.user_id = $1
            order by e.played_at asc, e.id asc
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| se!("error joining plays to artists for user {} {}", user_id, e))?;
        Ok(rows
            .into_iter()
            .map(|r| ArtistPlay {
                genres: models::split_genres(&r.genres),
                artist_name: r.artist_name,
            })
            .collect())
    }
}

pub struct PgSyncTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SyncTx for PgSyncTx {
    async fn upsert_artist(&mut self, user_id: i64, artist: &CatalogArtist) -> crate::Result<Artist> {
        let row = sqlx::query_as::<_, ArtistRow>(
            "
            insert into artists (user_id, spotify_artist_id, name, genres)
            values ($1, $2, $3, $4)
            on conflict (user_id, spotify_artist_id) do update set
            name = excluded.name, genres = excluded.genres, modified = now()
            returning id, user_id, spotify_artist_id, name, genres
            ",
        )
        .bind(user_id)
        .bind(&artist.id)
        .bind(&artist.name)
        .bind(models::join_genres(&artist.genres))
        .fetch_one(&mut self.tx)
        .await
        .map_err(|e| se!("failed to upsert artist {} {:?}", artist.id, e))?;
        Ok(row.into())
    }

    async fn find_or_create_artist(&mut self, user_id: i64, artist: &ArtistRef) -> crate::Result<Artist> {
        // the no-op update makes `returning` yield the existing row
        let row = sqlx::query_as::<_, ArtistRow>(
            "
            insert into artists (user_id, spotify_artist_id, name, genres)
            values ($1, $2, $3, '')
            on conflict (user_id, spotify_artist_id) do update set
            name = artists.name
            returning id, user_id, spotify_artist_id, name, genres
            ",
        )
        .bind(user_id)
        .bind(&artist.id)
        .bind(&artist.name)
        .fetch_one(&mut self.tx)
        .await
        .map_err(|e| se!("failed to find or create artist {} {:?}", artist.id, e))?;
        Ok(row.into())
    }

    async fn upsert_track(
        &mut self,
        user_id: i64,
        track: &CatalogTrack,
        artist_id: i64,
    ) -> crate::Result<Track> {
        let row = sqlx::query_as::<_, TrackRow>(
            "
            insert into tracks (user_id, spotify_track_id, name, album_name, popularity, artist_id)
            values ($1, $2, $3, $4, $5, $6)
            on conflict (user_id, spotify_track_id) do update set
            name = excluded.name, album_name = excluded.album_name,
            popularity = excluded.popularity, artist_id = excluded.artist_id,
            modified = now()
            returning id, user_id, spotify_track_id, name, album_name, popularity, artist_id
            ",
        )
        .bind(user_id)
        .bind(&track.id)
        .bind(&track.name)
        .bind(&track.album_name)
        .bind(track.popularity)
        .bind(artist_id)
        .fetch_one(&mut self.tx)
        .await
        .map_err(|e| se!("failed to upsert track {} {:?}", track.id, e))?;
        Ok(row.into())
    }

    async fn insert_event(&mut self, user_id: i64, event: &NewEvent) -> crate::Result<bool> {
        let id = sqlx::query_scalar::<_, i64>(
            "
            insert into listening_events (user_id, spotify_track_id, played_at, context)
            values ($1, $2, $3, $4)
            on conflict (user_id, spotify_track_id, played_at) do nothing
            returning id
            ",
        )
        .bind(user_id)
        .bind(&event.spotify_track_id)
        .bind(event.played_at)
        .bind(&event.context)
        .fetch_optional(&mut self.tx)
        .await
        .map_err(|e| se!("failed to insert play for user {} {:?}", user_id, e))?;
        Ok(id.is_some())
    }

    async fn commit(self: Box<Self>) -> crate::Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| se!("error committing sync {:?}", e))?;
        Ok(())
    }
}
