//! Domain Layer
//!
//! - **Order** (`order.rs`) - the order aggregate and its identifier
//! - **Ports** (`ports.rs`) - trait abstractions for the store and the stream
//!
//! # Usage
//!
//! ```ignore
//! use ordercache::domain::{Order, OrderStore};
//!
//! async fn persist<S: OrderStore>(store: &S, payload: &[u8]) -> Result<()> {
//!     let order = Order::decode(payload)?;
//!     store.save_if_absent(&order).await?;
//!     Ok(())
//! }
//! ```

pub mod order;
pub mod ports;

pub use order::{Delivery, Item, Order, OrderId, Payment};
pub use ports::{InboundRecord, OrderStore, OrderStream, SaveOutcome};
