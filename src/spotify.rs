use async_trait::async_trait;

use crate::catalog::{self, Catalog, CatalogArtist, CatalogTrack, RecentPlay};
use crate::{se, Config, Error, LOG};

const ACCOUNTS_URL: &str = "https://accounts.spotify.com";
const API_URL: &str = "https://api.spotify.com/v1";

pub const SCOPES: &str = "user-read-email user-top-read user-read-recently-played";

#[derive(serde::Deserialize, Debug)]
pub struct SpotifyAccess {
    pub access_token: String,
    pub token_type: String,
    pub scope: Option<String>,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
}

#[derive(serde::Serialize)]
struct SpotifyAccessParams<'a> {
    grant_type: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
}

#[derive(serde::Deserialize, Debug)]
pub struct SpotifyMe {
    pub id: String,
    pub display_name: Option<String>,
}

impl SpotifyMe {
    /// Spotify allows accounts without a display name
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// Spotify web api client. Holds the app credentials, user
/// credentials are passed per call.
#[derive(Clone)]
pub struct SpotifyCatalog {
    client_id: String,
    secret_id: String,
    redirect_url: String,
}

impl SpotifyCatalog {
    pub fn from_config(config: &Config) -> Self {
        Self {
            client_id: config.spotify_client_id.clone(),
            secret_id: config.spotify_secret_id.clone(),
            redirect_url: config.spotify_redirect_url(),
        }
    }

    pub fn authorize_url(&self, state: &str) -> String {
        format!(
            "{base}/authorize?client_id={id}&response_type=code&redirect_uri={redirect}&scope={scope}&state={state}",
            base = ACCOUNTS_URL,
            id = self.client_id,
            redirect = self.redirect_url,
            scope = SCOPES.replace(' ', "%20"),
            state = state,
        )
    }

    /// Exchange a one-time authorization code for access and refresh tokens
    pub async fn new_spotify_access_token(&self, code: &str) -> crate::Result<SpotifyAccess> {
        let auth = base64::encode(format!("{}:{}", self.client_id, self.secret_id).as_bytes());
        let body = surf::Body::from_form(&SpotifyAccessParams {
            grant_type: "authorization_code",
            code,
            redirect_uri: &self.redirect_url,
        })
        .map_err(|e| se!("form error {}", e))?;
        let mut resp = surf::post(format!("{}/api/token", ACCOUNTS_URL))
            .body(body)
            .header("authorization", format!("Basic {}", auth))
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("account request error {}", e)))?;
        check_status(&mut resp, "api/token").await?;
        resp.body_json()
            .await
            .map_err(|e| Error::MalformedUpstreamData(format!("account json parse error {}", e)))
    }

    pub async fn get_me(&self, access_token: &str) -> crate::Result<SpotifyMe> {
        let mut resp = self.get("me", access_token).await?;
        resp.body_json()
            .await
            .map_err(|e| Error::MalformedUpstreamData(format!("me json error {}", e)))
    }

    async fn get(&self, path: &str, access_token: &str) -> crate::Result<surf::Response> {
        let mut resp = surf::get(format!("{}/{}", API_URL, path))
            .header("authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("get {} error {}", path, e)))?;
        check_status(&mut resp, path).await?;
        Ok(resp)
    }

    async fn get_json(&self, path: &str, access_token: &str) -> crate::Result<serde_json::Value> {
        let mut resp = self.get(path, access_token).await?;
        resp.body_json()
            .await
            .map_err(|e| Error::MalformedUpstreamData(format!("{} json error {}", path, e)))
    }
}

async fn check_status(resp: &mut surf::Response, path: &str) -> crate::Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.body_string().await.unwrap_or_default();
    slog::error!(
        LOG, "spotify request failed";
        "path" => path,
        "status" => u16::from(status),
        "body" => &body,
    );
    Err(status_error(u16::from(status), path, &body))
}

/// 401 means the stored credential is expired or revoked,
/// everything else is a generic upstream failure
fn status_error(status: u16, path: &str, body: &str) -> Error {
    let msg = format!("{} returned {}: {}", path, status, body);
    match status {
        401 => Error::UpstreamAuth(msg),
        _ => Error::Upstream(msg),
    }
}

#[async_trait]
impl Catalog for SpotifyCatalog {
    async fn top_artists(&self, access_token: &str, limit: u32) -> crate::Result<Vec<CatalogArtist>> {
        let page = self
            .get_json(
                &format!("me/top/artists?limit={}&time_range=medium_term", limit),
                access_token,
            )
            .await?;
        catalog::parse_top_artists(&page)
    }

    async fn top_tracks(&self, access_token: &str, limit: u32) -> crate::Result<Vec<CatalogTrack>> {
        let page = self
            .get_json(
                &format!("me/top/tracks?limit={}&time_range=medium_term", limit),
                access_token,
            )
            .await?;
        catalog::parse_top_tracks(&page)
    }

    async fn recently_played(&self, access_token: &str, limit: u32) -> crate::Result<Vec<RecentPlay>> {
        let page = self
            .get_json(
                &format!("me/player/recently-played?limit={}", limit),
                access_token,
            )
            .await?;
        catalog::parse_recently_played(&page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_is_an_auth_error() {
        assert!(matches!(
            status_error(401, "me/top/artists", "The access token expired"),
            Error::UpstreamAuth(_)
        ));
        assert!(matches!(
            status_error(429, "me/top/artists", ""),
            Error::Upstream(_)
        ));
        assert!(matches!(
            status_error(502, "me/player/recently-played", ""),
            Error::Upstream(_)
        ));
    }

    #[test]
    fn authorize_url_carries_state_and_scopes() {
        let catalog = SpotifyCatalog {
            client_id: "cid".into(),
            secret_id: "secret".into(),
            redirect_url: "http://localhost:3030/spotify/callback".into(),
        };
        let url = catalog.authorize_url("abc");
        assert!(url.starts_with("https://accounts.spotify.com/authorize?client_id=cid"));
        assert!(url.contains("state=abc"));
        assert!(url.contains("user-top-read"));
        assert!(!url.contains(' '));
    }

    #[test]
    fn me_name_falls_back_to_id() {
        let me = SpotifyMe {
            id: "wizzler".into(),
            display_name: None,
        };
        assert_eq!(me.name(), "wizzler");
    }
}
