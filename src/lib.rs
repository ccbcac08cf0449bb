//! chatpoll library
//!
//! Poll management core for a chat client: an in-memory registry of polls,
//! reconciliation of server updates, lazy hydration from a key-value store,
//! and change propagation to the messages that display each poll.
//!
//! The engine runs on a single task behind [`polls::PollHandle`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use chatpoll::config::Config;
//! use chatpoll::polls::{spawn_poll_service_from_config, ChannelObserver};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("chatpoll.json5")?;
//! chatpoll::logging::init_logging(&config.logging)?;
//!
//! let (observer, mut updates) = ChannelObserver::new();
//! let polls = spawn_poll_service_from_config(&config, Arc::new(observer)).await?;
//!
//! let poll_id = polls
//!     .create_poll("Lunch?", vec!["Pizza".into(), "Sushi".into()])
//!     .await?;
//! let media = polls.get_input_media(poll_id).await?;
//! # let _ = (media, updates.try_recv());
//! polls.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod polls;
