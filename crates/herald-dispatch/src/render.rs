//! Template rendering seam.
//!
//! Rendering is pure: template key plus frozen payload snapshot in, subject
//! and body out. Unknown template keys fall back to a generic message rather
//! than failing the row.

use herald_core::outbox::MessagePayload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
  pub subject: String,
  pub body:    String,
}

pub trait TemplateRenderer: Send + Sync {
  fn render(&self, template_key: &str, payload: &MessagePayload) -> RenderedEmail;
}

/// The built-in template set.
#[derive(Debug, Clone)]
pub struct DefaultTemplates {
  /// Public base URL of the API, for unsubscribe links.
  pub base_url: String,
}

impl DefaultTemplates {
  pub fn new(base_url: impl Into<String>) -> Self {
    let mut base_url = base_url.into();
    while base_url.ends_with('/') {
      base_url.pop();
    }
    Self { base_url }
  }

  fn unsubscribe_link(&self, address: &str) -> String {
    format!(
      "{}/unsubscribe?channel=email&value={address}",
      self.base_url
    )
  }
}

impl TemplateRenderer for DefaultTemplates {
  fn render(&self, template_key: &str, payload: &MessagePayload) -> RenderedEmail {
    match template_key {
      "weekly_promo_v1" => {
        let greeting = if payload.name.is_empty() {
          "Hi!".to_string()
        } else {
          format!("Hi {}!", payload.name)
        };

        RenderedEmail {
          subject: "This week's picks, just for you".into(),
          body:    format!(
            "{greeting}\n\n\
             We've put together this week's store benefits for you.\n\
             Show this email in store for exclusive discounts and\n\
             recommendations picked for you.\n\n\
             Drop by any time during opening hours. We'd love to see you!\n\n\
             --\n\
             Prefer not to receive these messages? Unsubscribe here:\n\
             {unsubscribe}\n",
            unsubscribe = self.unsubscribe_link(&payload.address),
          ),
        }
      }
      _ => RenderedEmail {
        subject: "News from the store".into(),
        body:    "Hello!\n".into(),
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn payload(name: &str, address: &str) -> MessagePayload {
    MessagePayload {
      name:       name.into(),
      address:    address.into(),
      attributes: serde_json::Map::new(),
    }
  }

  #[test]
  fn weekly_promo_includes_unsubscribe_link() {
    let templates = DefaultTemplates::new("https://example.test/");
    let rendered = templates.render("weekly_promo_v1", &payload("Alice", "alice@example.com"));

    assert!(rendered.body.contains("Hi Alice!"));
    assert!(rendered.body.contains(
      "https://example.test/unsubscribe?channel=email&value=alice@example.com"
    ));
  }

  #[test]
  fn unknown_template_falls_back() {
    let templates = DefaultTemplates::new("https://example.test");
    let rendered = templates.render("mystery_v9", &payload("Alice", "alice@example.com"));
    assert_eq!(rendered.subject, "News from the store");
  }
}
