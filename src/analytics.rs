/*!
Read-only views over a user's stored listening data
*/
use chrono::{Datelike, Timelike};
use std::collections::{BTreeMap, HashMap};

use crate::models::{
    ArtistCount, ArtistPlay, DailyTrend, DayCount, GenreCount, Sessions, Summary,
    TimeDistribution, TimePoint,
};
use crate::session;
use crate::store::Store;
use crate::Error;

const TOP_N: usize = 5;

async fn require_user(store: &dyn Store, user_id: i64) -> crate::Result<()> {
    store
        .get_user(user_id)
        .await?
        .map(|_| ())
        .ok_or_else(|| Error::NotFound(format!("user {}", user_id)))
}

/// Count occurrences, keeping first-seen order so that the stable
/// sort below leaves ties in encounter order
fn rank<'a>(keys: impl Iterator<Item = &'a str>, n: usize) -> Vec<(String, i64)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<(String, i64)> = vec![];
    for key in keys {
        match index.get(key) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(key, counts.len());
                counts.push((key.to_string(), 1));
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.truncate(n);
    counts
}

pub fn top_artists(plays: &[ArtistPlay], n: usize) -> Vec<ArtistCount> {
    rank(plays.iter().map(|p| p.artist_name.as_str()), n)
        .into_iter()
        .map(|(artist_name, play_count)| ArtistCount {
            artist_name,
            play_count,
        })
        .collect()
}

/// Every play counts once toward each genre of its artist
pub fn top_genres(plays: &[ArtistPlay], n: usize) -> Vec<GenreCount> {
    let labels = plays
        .iter()
        .flat_map(|p| p.genres.iter())
        .map(|g| g.trim())
        .filter(|g| !g.is_empty());
    rank(labels, n)
        .into_iter()
        .map(|(genre, count)| GenreCount { genre, count })
        .collect()
}

pub async fn summary(store: &dyn Store, user_id: i64) -> crate::Result<Summary> {
    require_user(store, user_id).await?;
    let total_tracks = store.count_tracks(user_id).await?;
    let total_plays = store.count_events(user_id).await?;
    let plays = store.artist_plays(user_id).await?;
    Ok(Summary {
        total_tracks,
        total_plays,
        top_artists: top_artists(&plays, TOP_N),
        top_genres: top_genres(&plays, TOP_N),
    })
}

pub async fn time_distribution(store: &dyn Store, user_id: i64) -> crate::Result<TimeDistribution> {
    require_user(store, user_id).await?;
    let mut buckets: BTreeMap<(u32, u32), i64> = BTreeMap::new();
    for event in store.events(user_id).await? {
        let t = event.played_at;
        *buckets
            .entry((t.weekday().num_days_from_monday(), t.hour()))
            .or_insert(0) += 1;
    }
    Ok(TimeDistribution {
        points: buckets
            .into_iter()
            .map(|((weekday, hour), count)| TimePoint {
                weekday,
                hour,
                count,
            })
            .collect(),
    })
}

pub async fn daily_trend(store: &dyn Store, user_id: i64) -> crate::Result<DailyTrend> {
    require_user(store, user_id).await?;
    let mut days = BTreeMap::new();
    for event in store.events(user_id).await? {
        *days.entry(event.played_at.date_naive()).or_insert(0) += 1;
    }
    Ok(DailyTrend {
        points: days
            .into_iter()
            .map(|(date, plays)| DayCount { date, plays })
            .collect(),
    })
}

pub async fn sessions(store: &dyn Store, user_id: i64) -> crate::Result<Sessions> {
    require_user(store, user_id).await?;
    let played_at = store
        .events(user_id)
        .await?
        .into_iter()
        .map(|e| e.played_at)
        .collect::<Vec<_>>();
    Ok(Sessions {
        sessions: session::top_sessions(&played_at),
    })
}
