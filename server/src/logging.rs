use crate::LOG;
use tide::{Middleware, Next, Request, Result};

/// Request logging through the `slog` base logger. One line per
/// request, warn/error level for 4xx/5xx responses.
#[derive(Debug, Default, Clone)]
pub struct LogMiddleware {
    _i: (),
}

struct RequestLogged;

impl LogMiddleware {
    #[must_use]
    pub fn new() -> Self {
        Self { _i: () }
    }

    async fn log<'a, State: Clone + Send + Sync + 'static>(
        &'a self,
        mut req: Request<State>,
        next: Next<'a, State>,
    ) -> Result {
        if req.ext::<RequestLogged>().is_some() {
            return Ok(next.run(req).await);
        }
        req.set_ext(RequestLogged);

        // the query string can carry oauth codes, only log the path
        let path = req.url().path().to_owned();
        let method = req.method().to_string();
        let start = std::time::Instant::now();
        let log = LOG.new(slog::o!("method" => method, "path" => path));
        slog::debug!(log, "request received");

        let response = next.run(req).await;
        let status = response.status();
        let duration_ms = start.elapsed().as_millis() as u64;
        let error = response.error().map(|e| format!("{:?}", e));
        if status.is_server_error() {
            slog::error!(log, "request failed";
                "status" => status as u16,
                "duration_ms" => duration_ms,
                "error" => error,
            );
        } else if status.is_client_error() {
            slog::warn!(log, "request rejected";
                "status" => status as u16,
                "duration_ms" => duration_ms,
                "error" => error,
            );
        } else {
            slog::info!(log, "handled request";
                "status" => status as u16,
                "duration_ms" => duration_ms,
            );
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl<State: Clone + Send + Sync + 'static> Middleware<State> for LogMiddleware {
    async fn handle(&self, req: Request<State>, next: Next<'_, State>) -> Result {
        self.log(req, next).await
    }
}
