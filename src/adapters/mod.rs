//! Infrastructure Adapters
//!
//! Implementations of the domain ports, following the Port/Adapter
//! (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │              OrderStore    │    OrderStream                 │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ PostgresOrderStore  │ KafkaOrderStream (feature "kafka")   │ │
//! │  │ InMemoryOrderStore  │ InMemoryOrderStream                  │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use ordercache::adapters::{PostgresConfig, PostgresOrderStore};
//! use ordercache::domain::OrderStore;
//!
//! let store = PostgresOrderStore::from_config(&PostgresConfig::default())?;
//! store.migrate().await?;
//! let ids = store.list_ids().await?;
//! ```

#[cfg(feature = "kafka")]
mod kafka;
mod memory;
mod postgres;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaConfig, KafkaOrderStream};
pub use memory::{InMemoryOrderStore, InMemoryOrderStream, StoreCalls};
pub use postgres::{PostgresConfig, PostgresOrderStore};
