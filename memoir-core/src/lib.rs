//! Hierarchical conversational memory for long-running roleplay chats.
//!
//! This crate provides:
//! - Per-exchange summarization through any completion provider
//! - Five-tier memory classification with importance-weighted decay
//! - Budgeted memory injection for the next generation request
//! - A cross-session fact ledger and local semantic retrieval
//! - Conversation persistence with retention pruning
//!
//! # Quick Start
//!
//! ```ignore
//! use memoir_core::{EngineConfig, MemoryEngine, Turn};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = completions::Client::from_env()?;
//!     let mut engine = MemoryEngine::new(provider, EngineConfig::default());
//!
//!     engine.push_turn(Turn::user("Where did you hide the amulet?"));
//!     engine.push_turn(Turn::character("Marcus", "Somewhere you will never look."));
//!     engine.drive().await;
//!
//!     let memory_block = engine.compose_injection(1200).await;
//!     println!("{memory_block}");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod memory;
pub mod persist;
pub mod provider;
pub mod scheduler;
pub mod testing;
pub mod transcript;

// Primary public API
pub use config::{EngineConfig, SummaryOptions};
pub use engine::{EngineStats, MemoryEngine};
pub use memory::pairing::PairingPolicy;
pub use memory::queue::{IndicatorHook, SummaryEvent};
pub use memory::record::{MemoryRecord, MemoryTier, MemoryType};
pub use memory::weight::{ReinforcementKind, WeightConfig};
pub use persist::{ConversationInfo, MemoryArchive, PersistError};
pub use provider::{CompletionProvider, ProviderError};
pub use scheduler::{Scheduler, TokioScheduler};
pub use testing::{ManualScheduler, MockProvider};
pub use transcript::{Transcript, Turn};
