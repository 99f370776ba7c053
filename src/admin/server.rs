use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::AdminApi;

/// Admin server for serving the admin API
pub struct AdminServer {
    api: Arc<AdminApi>,
}

impl AdminServer {
    pub fn new(api: AdminApi) -> Self {
        Self { api: Arc::new(api) }
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Admin API listening on http://{}", listener.local_addr()?);

        if let Some(limiter) = self.api.rate_limiter() {
            limiter.start_cleanup_task(shutdown.clone());
        }

        loop {
            let (stream, remote_addr) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = shutdown.changed() => {
                    debug!("Admin server shutting down");
                    return Ok(());
                }
            };
            let io = TokioIo::new(stream);
            let api = Arc::clone(&self.api);

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let api = Arc::clone(&api);
                    async move {
                        debug!("Admin request: {} {}", req.method(), req.uri().path());
                        Ok::<_, hyper::Error>(api.handle(req, remote_addr.ip()).await)
                    }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Admin connection error from {}: {}", remote_addr, e);
                }
            });
        }
    }
}
