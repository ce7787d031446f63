//! Dispatch side of Herald: the outbox worker, mail transports, template
//! rendering, and the weekly scheduler loop.
//!
//! The worker is the only component that transitions outbox rows out of
//! `queued`. It competes with other worker processes through the store's
//! claim protocol, so running several instances is safe.

#![allow(async_fn_in_trait)]

pub mod render;
pub mod scheduler;
pub mod smtp;
pub mod transport;
pub mod worker;

pub use render::{DefaultTemplates, RenderedEmail, TemplateRenderer};
pub use smtp::{SmtpConfig, SmtpTransport};
pub use transport::{DisabledTransport, MailTransport, OutboundEmail, TransportError};
pub use worker::{SendMode, Worker, WorkerConfig, WorkerSetupError};
