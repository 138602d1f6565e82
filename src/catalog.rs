/*!
The provider catalog as seen by the reconciler: three collections
fetched per sync pass, each parsed out of the provider's JSON pages
into typed records.
*/
use async_trait::async_trait;
use serde_json::Value;
use std::convert::TryFrom;

use crate::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogArtist {
    pub id: String,
    pub name: String,
    pub genres: Vec<String>,
}

/// A reference to an artist as embedded in a track
#[derive(Debug, Clone, PartialEq)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogTrack {
    pub id: String,
    pub name: String,
    pub album_name: String,
    pub popularity: Option<i32>,
    pub artists: Vec<ArtistRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecentPlay {
    pub track_id: String,
    // raw ISO-8601 value as emitted by the provider
    pub played_at: String,
    pub context_type: Option<String>,
}

/// Provider access for a single user's credential.
///
/// Implementations map a rejected credential to `Error::UpstreamAuth`
/// and every other provider failure to `Error::Upstream`.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn top_artists(&self, access_token: &str, limit: u32) -> crate::Result<Vec<CatalogArtist>>;
    async fn top_tracks(&self, access_token: &str, limit: u32) -> crate::Result<Vec<CatalogTrack>>;
    async fn recently_played(&self, access_token: &str, limit: u32) -> crate::Result<Vec<RecentPlay>>;
}

fn items(page: &Value) -> crate::Result<&Vec<Value>> {
    match &page["items"] {
        Value::Null => {
            // an absent list is an empty page
            static EMPTY: Vec<Value> = Vec::new();
            Ok(&EMPTY)
        }
        Value::Array(items) => Ok(items),
        _ => Err(Error::malformed("items", page)),
    }
}

fn str_field<'a>(item: &'a Value, field: &str, what: &str) -> crate::Result<&'a str> {
    item[field]
        .as_str()
        .ok_or_else(|| Error::malformed(what, item))
}

pub fn parse_top_artists(page: &Value) -> crate::Result<Vec<CatalogArtist>> {
    items(page)?
        .iter()
        .map(|item| {
            let genres = match &item["genres"] {
                Value::Null => vec![],
                Value::Array(gs) => gs
                    .iter()
                    .map(|g| {
                        g.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| Error::malformed("artist genre", item))
                    })
                    .collect::<crate::Result<Vec<_>>>()?,
                _ => return Err(Error::malformed("artist genres", item)),
            };
            Ok(CatalogArtist {
                id: str_field(item, "id", "artist id")?.to_string(),
                name: str_field(item, "name", "artist name")?.to_string(),
                genres,
            })
        })
        .collect()
}

pub fn parse_top_tracks(page: &Value) -> crate::Result<Vec<CatalogTrack>> {
    items(page)?
        .iter()
        .map(|item| {
            let album_name = item["album"]["name"]
                .as_str()
                .ok_or_else(|| Error::malformed("track album name", item))?;
            let popularity = match &item["popularity"] {
                Value::Null => None,
                p => Some(
                    p.as_i64()
                        .and_then(|n| i32::try_from(n).ok())
                        .ok_or_else(|| Error::malformed("track popularity", item))?,
                ),
            };
            let artists = item["artists"]
                .as_array()
                .ok_or_else(|| Error::malformed("track artists", item))?
                .iter()
                .map(|artist| {
                    Ok(ArtistRef {
                        id: str_field(artist, "id", "track artist id")?.to_string(),
                        name: str_field(artist, "name", "track artist name")?.to_string(),
                    })
                })
                .collect::<crate::Result<Vec<_>>>()?;
            Ok(CatalogTrack {
                id: str_field(item, "id", "track id")?.to_string(),
                name: str_field(item, "name", "track name")?.to_string(),
                album_name: album_name.to_string(),
                popularity,
                artists,
            })
        })
        .collect()
}

pub fn parse_recently_played(page: &Value) -> crate::Result<Vec<RecentPlay>> {
    items(page)?
        .iter()
        .map(|item| {
            let track_id = item["track"]["id"]
                .as_str()
                .ok_or_else(|| Error::malformed("played track id", item))?;
            // context is null for plays outside a playlist/album/artist
            let context_type = match &item["context"] {
                Value::Null => None,
                ctx => ctx["type"].as_str().map(str::to_string),
            };
            Ok(RecentPlay {
                track_id: track_id.to_string(),
                played_at: str_field(item, "played_at", "played_at")?.to_string(),
                context_type,
            })
        })
        .collect()
}
