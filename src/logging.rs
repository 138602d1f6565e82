/*!
Request logging for the tide server, written to the app slog logger
*/
use std::time::Instant;

use crate::LOG;

#[derive(Debug, Default, Clone)]
pub struct LogMiddleware {
    _priv: (),
}

impl LogMiddleware {
    pub fn new() -> Self {
        Self { _priv: () }
    }
}

#[tide::utils::async_trait]
impl<State: Clone + Send + Sync + 'static> tide::Middleware<State> for LogMiddleware {
    async fn handle(&self, req: tide::Request<State>, next: tide::Next<'_, State>) -> tide::Result {
        let start = Instant::now();
        let method = req.method().to_string();
        let path = req.url().path().to_string();
        let resp = next.run(req).await;
        let status = u16::from(resp.status());
        let elapsed_ms = start.elapsed().as_millis() as u64;
        if status >= 500 {
            slog::error!(
                LOG, "request";
                "method" => method,
                "path" => path,
                "status" => status,
                "elapsed_ms" => elapsed_ms,
            );
        } else {
            slog::info!(
                LOG, "request";
                "method" => method,
                "path" => path,
                "status" => status,
                "elapsed_ms" => elapsed_ms,
            );
        }
        Ok(resp)
    }
}
