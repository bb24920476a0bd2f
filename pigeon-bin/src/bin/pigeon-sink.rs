//! `pigeon-sink` is a disposable endpoint for exercising pigeon.
//!
//! It accepts every request, logs the body, and answers 200 with an empty
//! body. Connection handling is deliberately primitive: a fixed number of
//! connections is served at a time and the rest queue up in the accept
//! backlog, which makes the sink double as a slow endpoint for testing
//! backpressure.
//!
//! ```sh
//! pigeon-sink --addr 127.0.0.1:8080 &
//! echo "on my way" | pigeon --url http://127.0.0.1:8080
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use env_logger::{Builder, Env};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use log::{error, info};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

#[derive(Parser, Debug)]
#[command(version, about)]
struct SinkOptions {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Number of connections served at a time
    #[arg(long, default_value_t = 10)]
    max_connections: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    Builder::from_env(Env::default().filter_or("RUST_LOG", "info"))
        .format_timestamp(None)
        .init();

    let opts = SinkOptions::parse();
    let listener = TcpListener::bind(opts.addr).await?;
    info!("listening on {}", opts.addr);

    let connections = Arc::new(Semaphore::new(opts.max_connections));
    loop {
        // take the slot before accepting, so the backlog does the queuing
        let permit = Arc::clone(&connections).acquire_owned().await?;
        let (stream, _) = listener.accept().await?;
        tokio::spawn(async move {
            let served = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service_fn(echo))
                .await;
            if let Err(error) = served {
                error!("connection error: {error}");
            }
            drop(permit);
        });
    }
}

/// Log the request body and answer 200 with an empty body
async fn echo(request: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    match request.into_body().collect().await {
        Ok(body) => info!("Got message: {}", String::from_utf8_lossy(&body.to_bytes())),
        Err(error) => error!("unreadable body: {error}"),
    }
    Ok(Response::new(Full::new(Bytes::new())))
}
