//! # subpub-core
//!
//! In-process publish/subscribe engine.
//!
//! Callers subscribe a [`Handler`] to a named subject; every message published
//! to that subject afterwards is delivered to every active subscriber, in the
//! order it was published, even though delivery runs asynchronously and
//! concurrently across subscribers.
//!
//! - **Registry** - subject to subscription-list mapping with lazy compaction
//! - **Engine** - subscribe, publish, close and the per-subscriber delivery workers
//! - **Handler** - subscriber callback contract
//! - **Payload** - message payload contract
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────────┐
//! │  Publisher  │────▶│   Engine    │────▶│ Subscription     │
//! └─────────────┘     └─────────────┘     │ queue ─▶ worker  │
//!                            │            └──────────────────┘
//!                            ▼
//!                     ┌─────────────┐
//!                     │  Registry   │
//!                     └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use subpub_core::{Engine, HandlerFn};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), subpub_core::EngineError> {
//! let engine: Engine<String> = Engine::new();
//!
//! let sub = engine.subscribe(
//!     "news",
//!     HandlerFn::arc(|msg: String| async move { println!("{msg}") }),
//! )?;
//! engine.publish("news", "hello".to_string())?;
//!
//! sub.unsubscribe();
//! engine.close(Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod handler;
pub mod message;
pub mod registry;

pub use engine::{Engine, EngineError, EngineState, EngineStats, ErrorKind};
pub use handler::{Handler, HandlerFn, HandlerRef};
pub use message::Payload;
pub use registry::{Registry, RegistryError, Subscription, SubscriptionId};
