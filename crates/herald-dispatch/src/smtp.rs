//! Minimal SMTP submission client (EHLO, STARTTLS, AUTH PLAIN).
//!
//! Covers exactly what the worker needs: one plain-text message to one
//! recipient per connection, submitted over port 587 with a mandatory
//! STARTTLS upgrade. Not a general SMTP library.

use std::{sync::Arc, time::Duration};

use base64::Engine as _;
use rustls::pki_types::ServerName;
use thiserror::Error;
use tokio::{
  io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
  net::TcpStream,
  time::timeout,
};
use tokio_rustls::{
  TlsConnector,
  rustls::{ClientConfig, RootCertStore},
};
use tracing::debug;

use crate::transport::{MailTransport, OutboundEmail, TransportError};

#[derive(Debug, Error)]
pub enum SmtpError {
  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error("invalid hostname: {0}")]
  InvalidHostname(String),

  #[error("unexpected reply: {code} {message}")]
  UnexpectedReply { code: u16, message: String },

  #[error("protocol error: {0}")]
  Protocol(String),

  #[error("smtp conversation timed out")]
  Timeout,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
  pub host:         String,
  pub port:         u16,
  pub username:     String,
  pub password:     String,
  pub from_name:    String,
  pub from_address: String,
  /// Budget for the whole conversation, connect included.
  pub timeout_secs: u64,
}

/// A [`MailTransport`] submitting over SMTP with STARTTLS.
///
/// One connection per message. Delivery volume here is a weekly batch, not
/// a firehose; connection reuse is not worth the session bookkeeping.
pub struct SmtpTransport {
  config: SmtpConfig,
  tls:    TlsConnector,
}

impl SmtpTransport {
  pub fn new(config: SmtpConfig) -> Self {
    let roots = RootCertStore { roots: webpki_roots::TLS_SERVER_ROOTS.to_vec() };
    let tls_config = ClientConfig::builder()
      .with_root_certificates(roots)
      .with_no_client_auth();
    Self { config, tls: TlsConnector::from(Arc::new(tls_config)) }
  }

  async fn submit(&self, email: &OutboundEmail) -> Result<(), SmtpError> {
    let stream =
      TcpStream::connect((self.config.host.as_str(), self.config.port)).await?;
    let mut session = Session::Tcp(BufReader::new(stream));

    session.expect(220).await?;
    session.command("EHLO localhost", 250).await?;

    session.command("STARTTLS", 220).await?;
    session = session.upgrade(&self.tls, &self.config.host).await?;
    session.command("EHLO localhost", 250).await?;

    let credentials = base64::engine::general_purpose::STANDARD.encode(format!(
      "\0{}\0{}",
      self.config.username, self.config.password
    ));
    session.command(&format!("AUTH PLAIN {credentials}"), 235).await?;

    session
      .command(&format!("MAIL FROM:<{}>", self.config.from_address), 250)
      .await?;
    session.command(&format!("RCPT TO:<{}>", email.to), 250).await?;
    session.command("DATA", 354).await?;

    let message = format_message(
      &self.config.from_name,
      &self.config.from_address,
      email,
    );
    session.write(message.as_bytes()).await?;
    session.write(b"\r\n.\r\n").await?;
    session.expect(250).await?;

    // Best-effort goodbye; the message is already accepted.
    let _ = session.command("QUIT", 221).await;

    debug!(to = %email.to, "smtp submission accepted");
    Ok(())
  }
}

impl MailTransport for SmtpTransport {
  async fn send(&self, email: &OutboundEmail) -> Result<(), TransportError> {
    let budget = Duration::from_secs(self.config.timeout_secs);
    match timeout(budget, self.submit(email)).await {
      Ok(result) => Ok(result?),
      Err(_) => Err(TransportError::Smtp(SmtpError::Timeout)),
    }
  }
}

// ─── Session plumbing ─────────────────────────────────────────────────────────

enum Session {
  Tcp(BufReader<TcpStream>),
  Tls(Box<BufReader<tokio_rustls::client::TlsStream<TcpStream>>>),
}

impl Session {
  async fn read_line(&mut self) -> Result<String, SmtpError> {
    let mut line = String::new();
    let n = match self {
      Self::Tcp(reader) => reader.read_line(&mut line).await?,
      Self::Tls(reader) => reader.read_line(&mut line).await?,
    };
    if n == 0 {
      return Err(SmtpError::Protocol("connection closed by server".into()));
    }
    Ok(line.trim_end().to_owned())
  }

  /// Read one (possibly multi-line) reply and return its code and text.
  async fn read_reply(&mut self) -> Result<(u16, String), SmtpError> {
    let mut text = String::new();
    loop {
      let line = self.read_line().await?;
      if line.len() < 3 {
        return Err(SmtpError::Protocol(format!("short reply line: {line:?}")));
      }
      let code: u16 = line[..3]
        .parse()
        .map_err(|_| SmtpError::Protocol(format!("bad reply code: {line:?}")))?;

      if !text.is_empty() {
        text.push(' ');
      }
      text.push_str(line[3..].trim_start_matches(['-', ' ']));

      // "250-..." continues the reply, "250 ..." ends it.
      if line.as_bytes().get(3) != Some(&b'-') {
        return Ok((code, text));
      }
    }
  }

  async fn write(&mut self, data: &[u8]) -> Result<(), SmtpError> {
    match self {
      Self::Tcp(reader) => {
        reader.get_mut().write_all(data).await?;
        reader.get_mut().flush().await?;
      }
      Self::Tls(reader) => {
        reader.get_mut().write_all(data).await?;
        reader.get_mut().flush().await?;
      }
    }
    Ok(())
  }

  async fn expect(&mut self, code: u16) -> Result<(), SmtpError> {
    let (got, message) = self.read_reply().await?;
    if got == code {
      Ok(())
    } else {
      Err(SmtpError::UnexpectedReply { code: got, message })
    }
  }

  async fn command(&mut self, line: &str, expect: u16) -> Result<(), SmtpError> {
    self.write(format!("{line}\r\n").as_bytes()).await?;
    self.expect(expect).await
  }

  async fn upgrade(self, tls: &TlsConnector, hostname: &str) -> Result<Self, SmtpError> {
    let tcp = match self {
      Self::Tcp(reader) => reader.into_inner(),
      Self::Tls(_) => return Err(SmtpError::Protocol("already using tls".into())),
    };
    let server_name = ServerName::try_from(hostname.to_owned())
      .map_err(|_| SmtpError::InvalidHostname(hostname.to_owned()))?;
    let stream = tls.connect(server_name, tcp).await?;
    Ok(Self::Tls(Box::new(BufReader::new(stream))))
  }
}

/// RFC 5322 plain-text message with transparency (dot-stuffing) applied.
fn format_message(from_name: &str, from_address: &str, email: &OutboundEmail) -> String {
  let mut message = String::new();
  message.push_str(&format!("From: {from_name} <{from_address}>\r\n"));
  message.push_str(&format!("To: {}\r\n", email.to));
  message.push_str(&format!("Subject: {}\r\n", email.subject));
  message.push_str("MIME-Version: 1.0\r\n");
  message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
  message.push_str("Content-Transfer-Encoding: 8bit\r\n");
  message.push_str("\r\n");

  for line in email.body.split('\n') {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.starts_with('.') {
      message.push('.');
    }
    message.push_str(line);
    message.push_str("\r\n");
  }
  // The terminating ".\r\n" is written by the caller.
  message.trim_end_matches("\r\n").to_owned()
}
