use cached::Cached;
use std::sync::Arc;
use tide::http::headers::HeaderValue;
use tide::security::{CorsMiddleware, Origin};

use crate::models::NewUser;
use crate::spotify::SpotifyCatalog;
use crate::store::Store;
use crate::sync::{Limits, Reconciler};
use crate::{analytics, crypto, resp, se, utils, Error, CONFIG, LOG};

#[derive(Clone)]
struct Context {
    store: Arc<dyn Store>,
    spotify: Arc<SpotifyCatalog>,
    reconciler: Arc<Reconciler>,
}

pub async fn start(store: Arc<dyn Store>, spotify: Arc<SpotifyCatalog>) -> crate::Result<()> {
    let ctx = Context {
        store,
        spotify,
        reconciler: Arc::new(Reconciler::new(Limits::from_config(&CONFIG))),
    };
    let app = build(ctx)?;
    slog::info!(LOG, "running at {}", CONFIG.host());
    app.listen(CONFIG.host())
        .await
        .map_err(|e| se!("server error {}", e))?;
    Ok(())
}

fn build(ctx: Context) -> crate::Result<tide::Server<Context>> {
    let cors = CorsMiddleware::new()
        .allow_methods(
            "GET, POST, OPTIONS"
                .parse::<HeaderValue>()
                .map_err(|e| se!("cors header error {}", e))?,
        )
        .allow_origin(Origin::from("*"))
        .allow_credentials(false);

    let mut app = tide::with_state(ctx);
    app.with(crate::logging::LogMiddleware::new());
    app.with(cors);
    app.at("/health").get(health);
    app.at("/spotify/login").get(login);
    app.at("/spotify/callback").get(auth_callback);
    app.at("/spotify/sync/:user_id").get(sync_user);
    app.at("/analytics/summary").get(summary);
    app.at("/analytics/time-distribution").get(time_distribution);
    app.at("/analytics/sessions").get(sessions);
    app.at("/analytics/daily-trend").get(daily_trend);
    Ok(app)
}

/// Serialize a successful result, or turn the error into its status and code
fn respond<T: serde::Serialize>(result: crate::Result<T>) -> tide::Result {
    match result {
        Ok(body) => Ok(resp!(json => body)),
        Err(e) => {
            if e.status() >= 500 {
                slog::error!(LOG, "request failed"; "code" => e.code(), "error" => e.to_string());
            } else {
                slog::info!(LOG, "request rejected"; "code" => e.code(), "error" => e.to_string());
            }
            Ok(resp!(error => e))
        }
    }
}

#[derive(serde::Serialize)]
struct Health<'a> {
    status: &'a str,
    version: &'a str,
}

async fn health(_req: tide::Request<Context>) -> tide::Result {
    Ok(resp!(json => Health {
        status: "ok",
        version: &CONFIG.version
    }))
}

/// The login process uses spotify to authenticate the current user
/// which then redirects back to our callback url with a code we
/// can use to generate reusable access and refresh API tokens.
async fn login(req: tide::Request<Context>) -> tide::Result {
    let token = new_one_time_login_token().await;
    slog::info!(LOG, "redirecting to spotify-auth with state token {}", token);
    Ok(tide::Redirect::new(req.state().spotify.authorize_url(&token)).into())
}

#[derive(Debug, serde::Deserialize)]
struct SpotifyAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// After we redirect users to spotify to login, spotify will send
/// them back here with `code` and `state`. `state` must be a
/// one-time token we handed out in `login`.
async fn auth_callback(req: tide::Request<Context>) -> tide::Result {
    slog::info!(LOG, "got login redirect");
    match complete_login(&req).await {
        Ok(user_id) => {
            let url = format!("{}/dashboard?user_id={}", CONFIG.frontend_url, user_id);
            Ok(tide::Redirect::new(url).into())
        }
        Err(e) => respond::<()>(Err(e)),
    }
}

async fn complete_login(req: &tide::Request<Context>) -> crate::Result<i64> {
    let ctx = req.state();
    let callback: SpotifyAuthCallback = req
        .query()
        .map_err(|e| Error::BadRequest(format!("query parse error {}", e)))?;
    if let Some(error) = callback.error {
        return Err(Error::BadRequest(format!("spotify login failed: {}", error)));
    }
    let state = callback
        .state
        .ok_or_else(|| Error::BadRequest("missing state".into()))?;
    if !is_valid_one_time_login_token(&state).await {
        return Err(Error::BadRequest(format!(
            "invalid one-time login token {}",
            state
        )));
    }
    let code = callback
        .code
        .ok_or_else(|| Error::BadRequest("missing code".into()))?;

    let access = ctx.spotify.new_spotify_access_token(&code).await?;
    let me = ctx.spotify.get_me(&access.access_token).await?;
    let new_user = NewUser {
        spotify_user_id: me.id.clone(),
        display_name: me.name().to_string(),
        access: crypto::encrypt(&access.access_token)?,
        refresh: access
            .refresh_token
            .as_deref()
            .map(crypto::encrypt)
            .transpose()?,
        token_expires_at: utils::expiry_from_now(access.expires_in)?,
    };
    let user = ctx.store.upsert_user(&new_user).await?;
    let is_new = user.created == user.modified;
    slog::info!(
        LOG, "completing user login: {}", user.display_name;
        "user_id" => user.id,
        "is_new" => is_new,
    );
    Ok(user.id)
}

async fn new_one_time_login_token() -> String {
    let s = uuid::Uuid::new_v4().simple().to_string();
    let mut lock = crate::ONE_TIME_TOKENS.lock().await;
    lock.cache_set(s.clone(), ());
    s
}

async fn is_valid_one_time_login_token(state: &str) -> bool {
    let mut lock = crate::ONE_TIME_TOKENS.lock().await;
    lock.cache_remove(&state.to_string()).is_some()
}

fn path_user_id(req: &tide::Request<Context>) -> crate::Result<i64> {
    let raw = req
        .param("user_id")
        .map_err(|_| Error::BadRequest("missing user_id".into()))?;
    raw.parse()
        .map_err(|_| Error::BadRequest(format!("invalid user_id {:?}", raw)))
}

#[derive(serde::Deserialize)]
struct UserQuery {
    user_id: i64,
}

fn query_user_id(req: &tide::Request<Context>) -> crate::Result<i64> {
    req.query::<UserQuery>()
        .map(|q| q.user_id)
        .map_err(|e| Error::BadRequest(format!("user_id query parameter: {}", e)))
}

async fn sync_user(req: tide::Request<Context>) -> tide::Result {
    let ctx = req.state();
    let result = match path_user_id(&req) {
        Ok(user_id) => {
            slog::info!(LOG, "sync requested"; "user_id" => user_id);
            ctx.reconciler
                .sync_user(ctx.store.as_ref(), ctx.spotify.as_ref(), user_id)
                .await
        }
        Err(e) => Err(e),
    };
    respond(result)
}

async fn summary(req: tide::Request<Context>) -> tide::Result {
    let store = req.state().store.as_ref();
    let result = match query_user_id(&req) {
        Ok(user_id) => analytics::summary(store, user_id).await,
        Err(e) => Err(e),
    };
    respond(result)
}

async fn time_distribution(req: tide::Request<Context>) -> tide::Result {
    let store = req.state().store.as_ref();
    let result = match query_user_id(&req) {
        Ok(user_id) => analytics::time_distribution(store, user_id).await,
        Err(e) => Err(e),
    };
    respond(result)
}

async fn sessions(req: tide::Request<Context>) -> tide::Result {
    let store = req.state().store.as_ref();
    let result = match query_user_id(&req) {
        Ok(user_id) => analytics::sessions(store, user_id).await,
        Err(e) => Err(e),
    };
    respond(result)
}

async fn daily_trend(req: tide::Request<Context>) -> tide::Result {
    let store = req.state().store.as_ref();
    let result = match query_user_id(&req) {
        Ok(user_id) => analytics::daily_trend(store, user_id).await,
        Err(e) => Err(e),
    };
    respond(result)
}
