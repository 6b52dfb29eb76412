//! Outbound delivery: mail transport plus the retry/escalation loop.

pub mod retry;
pub mod transport;

pub use retry::{DEFAULT_RETRY_DELAYS_SECS, Deliverer, DeliveryKind, RetrySchedule};
pub use transport::{MailTransport, SendError, SendErrorCode, SmtpMailer, SmtpSettings};
