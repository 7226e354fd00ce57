//! # Audio Module
//!
//! Playback engine for Rat Bot: per-guild queues, the playback state
//! machine and the voice transport adapter.
//!
//! ## Architecture
//!
//! ### [`player`] - Playback Controller
//! - Owns every state mutation of a session (enqueue, skip, pause, loop)
//! - Serializes track advancement with a per-session guard
//! - Falls back to alternative providers when a start attempt fails
//!
//! ### [`queue`] - Queue Management
//! - Persistent queue backed by a [`PersistentQueueStore`](crate::storage::PersistentQueueStore)
//! - Bounded in-memory history used by queue looping
//! - Cached preview for synchronous reads
//!
//! ### [`session`] - Session Registry
//! - Explicit create/get/destroy lifecycle per guild
//! - Cancellation epoch checked by in-flight advancement
//!
//! ### [`transport`] - Voice Transport
//! - [`PlaybackTransport`](transport::PlaybackTransport) trait consumed by the controller
//! - Songbird implementation that reports track end and errors as events
//!
//! ### [`votes`] and [`inactivity`]
//! - Vote-skip thresholds relative to the listener population
//! - Cancellable idle timers that are re-validated before disconnecting
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use rat_music::audio::player::PlaybackController;
//! use serenity::all::{ChannelId, GuildId, UserId};
//!
//! # async fn example(controller: &PlaybackController) -> anyhow::Result<()> {
//! let guild = GuildId::new(123456789);
//! controller.connect(guild, ChannelId::new(42)).await?;
//! controller.enqueue(guild, "never gonna give you up", UserId::new(7)).await?;
//! controller.pause(guild).await?;
//! controller.resume(guild).await?;
//! # Ok(())
//! # }
//! ```

pub mod inactivity;
pub mod player;
pub mod queue;
pub mod session;
pub mod track;
pub mod transport;
pub mod votes;

pub use player::{EngineSettings, PlaybackController, PlaybackNotice};
pub use queue::LoopMode;
pub use track::{Provider, TrackRecord};
