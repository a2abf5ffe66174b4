// payment-storage: repository traits and storage backends for payment-kit.
//
// To the extent possible under law, the payment-kit contributors have
// dedicated all copyright and related and neighboring rights to this
// software to the public domain worldwide.

//! Repository traits for channel, RAV, pending-proposal and transaction
//! state, with three interchangeable backends: in-memory, embedded
//! (`sled`), and relational (`sqlx`/Postgres).

#[macro_use]
extern crate amplify_derive;

pub mod error;
pub mod mem;
pub mod models;
#[cfg(feature = "sled-backend")]
pub mod sled_store;
#[cfg(feature = "sql")]
pub mod sql;
pub mod traits;

pub use error::Error;
pub use models::*;
pub use traits::{ChannelRepository, PendingSubRavRepository, RavRepository, TransactionStore};
