pub mod auth;
pub mod captcha;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod messages;
pub mod push;
pub mod router;
mod routes;
pub mod subscribers;

use std::io;
use std::net::{AddrParseError, SocketAddr};
use std::str::FromStr as _;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, Method};
use fila_db::Database;
use fila_util_error::WhateverResult;
use snafu::{ResultExt as _, Snafu, Whatever};
use tokio::net::{TcpListener, TcpSocket};
use tokio::signal;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

use crate::auth::HostAuth;
use crate::captcha::TurnstileGate;
use crate::config::Config;
use crate::push::{DISPATCH_QUEUE_CAPACITY, PushDispatcher, PushJob, PushTransport};
use crate::router::SessionRouter;

const LOG_TARGET: &str = "fila::server";

pub struct Opts {
    pub listen: String,
    pub reuseport: bool,
}

impl Opts {
    pub fn new(listen: String, reuseport: bool) -> Self {
        Self { listen, reuseport }
    }
}

pub struct AppState {
    pub config: Arc<Config>,
    pub auth: HostAuth,
    pub captcha: TurnstileGate,
    pub router: SessionRouter,
    pub db: Arc<Database>,
    pub push_tx: dedup_chan::Sender<PushJob>,
}

pub type SharedAppState = Arc<AppState>;

pub struct Server {
    listener: TcpListener,

    state: SharedAppState,
}

#[derive(Debug, Snafu)]
pub enum ServerError {
    #[snafu(transparent)]
    IO {
        source: io::Error,
    },

    ListenAddr {
        source: AddrParseError,
    },

    Cors {
        source: Whatever,
    },
}

pub type ServerResult<T> = std::result::Result<T, ServerError>;

impl Server {
    pub async fn init(
        opts: Opts,
        config: Config,
        db: Arc<Database>,
        push_transport: Arc<dyn PushTransport>,
    ) -> ServerResult<Server> {
        let listener = Self::get_listener(&opts).await?;
        let config = Arc::new(config);

        let (push_tx, push_rx) = dedup_chan::channel(DISPATCH_QUEUE_CAPACITY);
        if config.push_enabled() {
            PushDispatcher::new(db.clone(), config.clone(), push_transport).spawn(push_rx);
        }

        let state = Arc::new(AppState {
            auth: HostAuth::new(&config),
            captcha: TurnstileGate::new(&config),
            router: SessionRouter::new(db.clone(), config.clone(), push_tx.clone()),
            db,
            push_tx,
            config,
        });

        info!(target: LOG_TARGET, "Listening on {}", listener.local_addr()?);
        Ok(Self { listener, state })
    }

    pub async fn get_listener(opts: &Opts) -> ServerResult<TcpListener> {
        let socket = {
            let addr = SocketAddr::from_str(&opts.listen).context(ListenAddrSnafu)?;

            let socket = if addr.is_ipv4() {
                TcpSocket::new_v4()?
            } else {
                TcpSocket::new_v6()?
            };
            if opts.reuseport {
                #[cfg(unix)]
                socket.set_reuseport(true)?;
            }
            socket.set_nodelay(true)?;

            socket.bind(addr)?;

            socket
        };

        Ok(socket.listen(1024)?)
    }

    pub async fn run(self) -> ServerResult<()> {
        let listen = self.addr()?;
        let router = routes::route_handler(self.state.clone());

        info!(target: LOG_TARGET, "Starting server");
        axum::serve(
            self.listener,
            router
                .layer(cors_layer(&self.state.config, listen)?)
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }

    pub fn addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

fn cors_layer(config: &Config, listen: SocketAddr) -> ServerResult<CorsLayer> {
    Ok(CorsLayer::new()
        .allow_credentials(true)
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static(auth::HOST_AUTH_HEADER),
        ])
        .max_age(Duration::from_secs(86400))
        .allow_origin(AllowOrigin::list(
            allowed_origins(config, listen).context(CorsSnafu)?,
        ))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS]))
}

fn allowed_origins(config: &Config, listen: SocketAddr) -> WhateverResult<Vec<HeaderValue>> {
    let origins = if config.allowed_origins.is_empty() {
        vec![format!("http://{listen}")]
    } else {
        config.allowed_origins.clone()
    };

    origins
        .iter()
        .map(|origin| {
            origin
                .parse()
                .whatever_context(format!("Origin does not parse as a header value: {origin}"))
        })
        .collect()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
