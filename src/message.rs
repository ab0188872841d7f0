//! Message types seen by handlers and producers.
//!
//! Handlers receive either the decoded payload value or an [`Envelope`] carrying the
//! value together with the broker metadata. Producers accept an [`OutboundMessage`].

mod envelope;
mod outbound;

pub use envelope::Envelope;
pub use outbound::OutboundMessage;
