//! # Ballast Node
//!
//! Server side of the Ballast big-file store.
//!
//! A node serves content out of a cache hierarchy in two ways:
//!
//! - `serve`: an HTTP server exposing the wire commands on its root URL and
//!   the `/bfile/<hash>` file API, so both wire and HTTP-API clients work
//!   against the same node
//! - `stdio`: one wire protocol session framed as pkt-lines on
//!   stdin/stdout, run by `ssh` on behalf of a client
//!
//! ## Modules
//!
//! - [`api`] - HTTP routes, transfer counters, and error responses
//! - [`config`] - Node configuration
//! - [`observability`] - Logging setup
//! - [`server`] - The two serving modes
//!
//! ## Example
//!
//! ```rust,no_run
//! use ballast_node::api::{create_router, AppState};
//! use ballast_proto::WireHandler;
//! use ballast_storage::CacheHierarchy;
//!
//! # async fn run() -> std::io::Result<()> {
//! let cache = CacheHierarchy::new("/srv/ballast", "/srv/ballast/system");
//! let app = create_router(AppState::new(WireHandler::new(cache)));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, app).await
//! # }
//! ```

pub mod api;
pub mod config;
pub mod observability;
pub mod server;
