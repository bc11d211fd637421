use crate::CRATE_NAME;
use crate::challenge::{ChallengeCoordinator, extract_token};
use http::{Method, StatusCode};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const MAX_OPEN_CONNECTIONS: usize = 200;

/// Answers HTTP-01 validation requests for the challenges held by `coordinator` until `shutdown`
/// is cancelled.
pub async fn serve(
    listener: TcpListener,
    coordinator: ChallengeCoordinator,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        debug!("Answering HTTP-01 challenges on {addr}");
    }
    // Limit the max number of open connections to avoid an FD-based DoS
    let connection_limiter = Arc::new(Semaphore::new(MAX_OPEN_CONNECTIONS));
    loop {
        let Ok(permit) = connection_limiter.clone().acquire_owned().await else {
            break;
        };
        let (client, client_addr) = tokio::select! {
            accept_result = listener.accept() => accept_result?,
            () = shutdown.cancelled() => break,
        };
        let io = TokioIo::new(client);
        let coordinator = coordinator.clone();
        tokio::task::spawn(async move {
            if let Err(err) = http1::Builder::new()
                .keep_alive(false)
                .serve_connection(
                    io,
                    service_fn(|request| {
                        let coordinator = coordinator.clone();
                        async move { handle(&coordinator, request).await }
                    }),
                )
                .await
            {
                warn!("Error serving challenge request from {client_addr}: {err}");
            }
            drop(permit);
        });
    }
    Ok(())
}

async fn handle<B>(
    coordinator: &ChallengeCoordinator,
    request: Request<B>,
) -> Result<Response<Full<Bytes>>, http::Error> {
    let path = request.uri().path();
    let Some(token) = extract_token(path) else {
        return plain_response(StatusCode::NOT_FOUND, "Not found");
    };
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .header(http::header::SERVER, CRATE_NAME)
            .header(http::header::ALLOW, "GET, HEAD")
            .body(Full::new(Bytes::new()));
    }
    match coordinator.lookup(token).await {
        Ok(Some(challenge)) => {
            debug!("Answering challenge {token} for {}", challenge.domain);
            plain_response(StatusCode::OK, challenge.key_authorization)
        }
        Ok(None) => {
            debug!("Request for unknown challenge {token}");
            plain_response(StatusCode::NOT_FOUND, "Not found")
        }
        Err(e) => {
            error!("Looking up challenge {token} failed: {e:#}");
            plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

fn plain_response<T: Into<Bytes>>(
    status: StatusCode,
    body: T,
) -> Result<Response<Full<Bytes>>, http::Error> {
    Response::builder()
        .status(status)
        .header(http::header::SERVER, CRATE_NAME)
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(Full::new(body.into()))
}
