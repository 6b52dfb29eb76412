//! Contact relay: a private inbox behind a public address.
//!
//! Mail to the public address is spam-filtered, acknowledged, and forwarded
//! to the operator's private mailbox with a per-sender thread address as
//! Reply-To. Replies to that thread address go back to the original sender.

pub mod config;
pub mod delivery;
pub mod error;
pub mod extract;
pub mod identity;
pub mod notify;
pub mod pipeline;
pub mod server;
pub mod storage;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod worker;
