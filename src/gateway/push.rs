//! Push notifications and notification clicks.

use serde::Serialize;
use serde_json::{json, Map, Value};
use url::Url;

pub const DEFAULT_TITLE: &str = "VASA";
pub const DEFAULT_BODY: &str = "You have a new notification";

/// A notification ready to be shown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  /// Display options (icon, badge, actions, data, ...)
  pub options: Map<String, Value>,
}

fn default_options() -> Map<String, Value> {
  let mut options = Map::new();
  options.insert("icon".into(), json!("/icons/icon-192x192.png"));
  options.insert("badge".into(), json!("/icons/badge-72x72.png"));
  options.insert("vibrate".into(), json!([100, 50, 100]));
  options.insert("data".into(), json!({}));
  options.insert(
    "actions".into(),
    json!([
      {"action": "open", "title": "Open"},
      {"action": "dismiss", "title": "Dismiss"},
    ]),
  );
  options
}

/// Build a notification from a push payload.
///
/// JSON objects may set `title`, `body`, `data` and an `options` object
/// merged over the defaults. Anything that is not a JSON object is shown
/// as literal text.
pub fn build_notification(payload: Option<&[u8]>) -> Notification {
  let mut notification = Notification {
    title: DEFAULT_TITLE.to_string(),
    body: DEFAULT_BODY.to_string(),
    options: default_options(),
  };

  let Some(payload) = payload.filter(|p| !p.is_empty()) else {
    return notification;
  };

  match serde_json::from_slice::<Value>(payload) {
    Ok(Value::Object(fields)) => {
      if let Some(title) = fields.get("title").and_then(Value::as_str) {
        notification.title = title.to_string();
      }
      if let Some(body) = fields.get("body").and_then(Value::as_str) {
        notification.body = body.to_string();
      }
      if let Some(data) = fields.get("data") {
        notification.options.insert("data".into(), data.clone());
      }
      if let Some(Value::Object(options)) = fields.get("options") {
        for (key, value) in options {
          notification.options.insert(key.clone(), value.clone());
        }
      }
    }
    Ok(Value::String(text)) => notification.body = text,
    _ => notification.body = String::from_utf8_lossy(payload).into_owned(),
  }

  notification
}

/// An open window of the client application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWindow {
  pub id: String,
  pub url: String,
}

/// What a notification click should do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum ClickEffect {
  /// Dismissed: no navigation
  None,
  /// Bring an existing window to the front
  Focus { client_id: String, url: String },
  /// No window shows the target yet
  Open { url: String },
}

/// Target path for a notification's `data` payload.
pub fn notification_target(data: &Value) -> String {
  if let Some(url) = data.get("url").and_then(Value::as_str) {
    return url.to_string();
  }

  match data.get("type").and_then(Value::as_str) {
    Some("order") => match id_field(data, "id") {
      Some(id) => format!("/orders/{}", id),
      None => "/orders".to_string(),
    },
    Some("message") => match id_field(data, "conversationId") {
      Some(id) => format!("/messages/{}", id),
      None => "/messages".to_string(),
    },
    Some("compliance") => "/compliance".to_string(),
    _ => "/".to_string(),
  }
}

/// Ids arrive as strings or numbers.
fn id_field(data: &Value, field: &str) -> Option<String> {
  match data.get(field)? {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

pub fn handle_click(
  action: Option<&str>,
  data: &Value,
  clients: &[ClientWindow],
  origin: &Url,
) -> ClickEffect {
  if action == Some("dismiss") {
    return ClickEffect::None;
  }

  let target = match origin.join(&notification_target(data)) {
    Ok(target) => target,
    Err(_) => origin.clone(),
  };

  let existing = clients.iter().find(|client| {
    Url::parse(&client.url)
      .map(|url| url.origin() == target.origin() && url.path() == target.path())
      .unwrap_or(false)
  });

  match existing {
    Some(client) => ClickEffect::Focus {
      client_id: client.id.clone(),
      url: target.to_string(),
    },
    None => ClickEffect::Open {
      url: target.to_string(),
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn origin() -> Url {
    Url::parse("https://vasa.test").unwrap()
  }

  #[test]
  fn test_json_payload_overrides_defaults() {
    let payload = json!({
      "title": "Order shipped",
      "body": "PO-881 left the warehouse",
      "data": {"type": "order", "id": "881"},
      "options": {"tag": "order-881", "icon": "/icons/truck.png"}
    });

    let notification = build_notification(Some(payload.to_string().as_bytes()));

    assert_eq!(notification.title, "Order shipped");
    assert_eq!(notification.body, "PO-881 left the warehouse");
    assert_eq!(notification.options["tag"], json!("order-881"));
    assert_eq!(notification.options["icon"], json!("/icons/truck.png"));
    assert_eq!(notification.options["data"]["id"], json!("881"));
    assert!(notification.options.contains_key("badge"));
  }

  #[test]
  fn test_malformed_payload_becomes_text() {
    let notification = build_notification(Some(b"{not json"));

    assert_eq!(notification.title, DEFAULT_TITLE);
    assert_eq!(notification.body, "{not json");
  }

  #[test]
  fn test_empty_payload_uses_defaults() {
    assert_eq!(build_notification(None).body, DEFAULT_BODY);
    assert_eq!(build_notification(Some(b"")).body, DEFAULT_BODY);
  }

  #[test]
  fn test_notification_targets() {
    assert_eq!(notification_target(&json!({"type": "order", "id": 12})), "/orders/12");
    assert_eq!(
      notification_target(&json!({"type": "message", "conversationId": "c-3"})),
      "/messages/c-3"
    );
    assert_eq!(notification_target(&json!({"type": "compliance"})), "/compliance");
    assert_eq!(notification_target(&json!({"type": "promo"})), "/");
    assert_eq!(notification_target(&Value::Null), "/");
  }

  #[test]
  fn test_click_focuses_matching_window() {
    let clients = vec![
      ClientWindow {
        id: "a".to_string(),
        url: "https://vasa.test/search".to_string(),
      },
      ClientWindow {
        id: "b".to_string(),
        url: "https://vasa.test/orders/12?tab=items".to_string(),
      },
    ];

    let effect = handle_click(None, &json!({"type": "order", "id": "12"}), &clients, &origin());

    assert_eq!(
      effect,
      ClickEffect::Focus {
        client_id: "b".to_string(),
        url: "https://vasa.test/orders/12".to_string(),
      }
    );
  }

  #[test]
  fn test_click_opens_window_when_none_match() {
    let effect = handle_click(Some("open"), &json!({"type": "compliance"}), &[], &origin());

    assert_eq!(
      effect,
      ClickEffect::Open {
        url: "https://vasa.test/compliance".to_string()
      }
    );
  }

  #[test]
  fn test_dismiss_does_nothing() {
    let effect = handle_click(Some("dismiss"), &json!({"type": "order", "id": 1}), &[], &origin());
    assert_eq!(effect, ClickEffect::None);
  }
}
