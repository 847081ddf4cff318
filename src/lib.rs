//! # Arbiter
//!
//! An idiomatic Rust client library for [Cerbos](https://cerbos.dev), the
//! open-source policy decision point, with transparent request batching.
//!
//! Every check a caller submits is queued into a shared batch; batches leave
//! when they fill up, when their byte budget is reached or when a short flush
//! interval elapses, and every answer is matched back to exactly the question
//! that produced it. A session underneath handles deadlines, retries with
//! backoff and connection state, and an optional cache answers repeated
//! questions without a round trip.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use arbiter::{Client, Principal, Resource};
//!
//! # async fn example() -> Result<(), arbiter::Error> {
//! let client = Client::new("http://localhost:3593").await?;
//!
//! let alice = Principal::builder("alice")
//!     .role("employee")
//!     .attr("department", "marketing")
//!     .build()?;
//! let doc = Resource::builder("document", "doc:42")
//!     .attr("owner", "alice")
//!     .build()?;
//!
//! let result = client
//!     .check(&alice, &doc)
//!     .actions(["read", "write", "delete"])
//!     .await?;
//!
//! for (action, decision) in result.decisions() {
//!     println!("{action}: {decision:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `serde` | No | Enables serde support on configuration, actions, decisions, session state and stats |
//! | `tls-rustls` | No | Use rustls for TLS |
//! | `tls-native` | No | Use native TLS |

mod batcher;
mod cache;
pub mod client;
pub mod config;
mod correlator;
pub mod error;
mod pending;
mod proto;
mod session;
mod stats;
pub mod transport;
pub mod types;

pub use client::{CheckBuilder, Client, ClientBuilder};
pub use config::{BackoffConfig, CacheConfig, SessionConfig};
pub use error::{Error, ErrorKind};
pub use pending::PendingCall;
pub use session::SessionState;
pub use stats::StatsSnapshot;
pub use types::*;
