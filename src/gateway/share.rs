//! Share target: content shared into the app from other applications.

use reqwest::Method;
use serde::Serialize;
use tracing::{info, warn};
use url::{form_urlencoded, Url};

use crate::http::{CachedResponse, GatewayRequest};

/// Fields posted by the platform share sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SharedPayload {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub text: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub files: Vec<String>,
}

pub fn is_share_target(request: &GatewayRequest, origin: &Url, share_path: &str) -> bool {
  request.method == Method::POST
    && request.url.origin() == origin.origin()
    && request.url.path() == share_path
}

pub fn parse_share_form(body: &[u8]) -> SharedPayload {
  let mut payload = SharedPayload::default();

  for (key, value) in form_urlencoded::parse(body) {
    let value = value.into_owned();
    match &*key {
      "title" => payload.title = Some(value),
      "text" => payload.text = Some(value),
      "url" => payload.url = Some(value),
      "files" | "files[]" => payload.files.push(value),
      other => warn!("Ignoring unexpected share field '{}'", other),
    }
  }

  payload
}

/// Redirect to the app root with the payload as JSON in `?shared=`.
pub fn handle_share(request: &GatewayRequest) -> CachedResponse {
  let payload = parse_share_form(&request.body);

  let json = match serde_json::to_string(&payload) {
    Ok(json) => json,
    Err(e) => {
      warn!("Failed to serialize shared payload: {}", e);
      return CachedResponse::redirect(303, "/");
    }
  };

  let query = form_urlencoded::Serializer::new(String::new())
    .append_pair("shared", &json)
    .finish();

  info!("Received shared content, redirecting to app root");
  CachedResponse::redirect(303, &format!("/?{}", query))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::url;

  #[test]
  fn test_parse_share_form() {
    let payload = parse_share_form(
      b"title=Cotton%20bales&text=Look+at+this&url=https%3A%2F%2Fx.example%2Fp%2F1&files%5B%5D=spec.pdf&files%5B%5D=photo.jpg",
    );

    assert_eq!(payload.title.as_deref(), Some("Cotton bales"));
    assert_eq!(payload.text.as_deref(), Some("Look at this"));
    assert_eq!(payload.url.as_deref(), Some("https://x.example/p/1"));
    assert_eq!(payload.files, vec!["spec.pdf", "photo.jpg"]);
  }

  #[test]
  fn test_share_redirects_with_payload() {
    let request = GatewayRequest::parse("POST", url("/share-target").as_str())
      .unwrap()
      .with_body("title=Hi&text=there");

    let response = handle_share(&request);

    assert_eq!(response.status, 303);
    let location = response.header("location").unwrap();
    let redirect = url(location);
    assert_eq!(redirect.path(), "/");
    let (key, shared) = redirect.query_pairs().next().unwrap();
    assert_eq!(key, "shared");
    let shared: serde_json::Value = serde_json::from_str(&shared).unwrap();
    assert_eq!(shared, serde_json::json!({"title": "Hi", "text": "there"}));
  }

  #[test]
  fn test_only_post_to_share_path_matches() {
    let origin = Url::parse("https://vasa.test").unwrap();
    let post = GatewayRequest::parse("POST", url("/share-target").as_str()).unwrap();
    let get = GatewayRequest::get(url("/share-target"));
    let elsewhere = GatewayRequest::parse("POST", url("/api/share").as_str()).unwrap();

    assert!(is_share_target(&post, &origin, "/share-target"));
    assert!(!is_share_target(&get, &origin, "/share-target"));
    assert!(!is_share_target(&elsewhere, &origin, "/share-target"));
  }
}
