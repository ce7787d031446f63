//! The outbound mail seam.
//!
//! The worker talks to a [`MailTransport`], never to SMTP directly, so tests
//! run against an in-memory double and simulate mode can ship with no
//! transport configured at all.

use std::future::Future;

use thiserror::Error;

use crate::smtp::SmtpError;

/// A fully rendered email ready for handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
  pub to:      String,
  pub subject: String,
  pub body:    String,
}

#[derive(Debug, Error)]
pub enum TransportError {
  /// No transport is configured; any attempt to send is a bug in the
  /// caller's mode wiring.
  #[error("mail transport is disabled")]
  Disabled,

  #[error(transparent)]
  Smtp(#[from] SmtpError),
}

pub trait MailTransport: Send + Sync {
  fn send<'a>(
    &'a self,
    email: &'a OutboundEmail,
  ) -> impl Future<Output = Result<(), TransportError>> + Send + 'a;
}

/// The transport for simulate mode. The worker never invokes the transport
/// in that mode; reaching this is an error, not a silent no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledTransport;

impl MailTransport for DisabledTransport {
  async fn send(&self, _email: &OutboundEmail) -> Result<(), TransportError> {
    Err(TransportError::Disabled)
  }
}

#[cfg(test)]
pub(crate) mod memory {
  //! In-memory transport double for worker tests.

  use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
  };

  use super::{MailTransport, OutboundEmail, TransportError};
  use crate::smtp::SmtpError;

  #[derive(Debug, Default)]
  pub struct MemoryTransport {
    sent:      Mutex<Vec<OutboundEmail>>,
    fail_next: AtomicBool,
  }

  impl MemoryTransport {
    pub fn new() -> Self {
      Self::default()
    }

    /// Make the next `send` call fail with a protocol error.
    pub fn fail_next(&self) {
      self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
      self.sent.lock().unwrap().clone()
    }
  }

  impl MailTransport for MemoryTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<(), TransportError> {
      if self.fail_next.swap(false, Ordering::SeqCst) {
        return Err(TransportError::Smtp(SmtpError::Protocol(
          "injected failure".into(),
        )));
      }
      self.sent.lock().unwrap().push(email.clone());
      Ok(())
    }
  }
}
