//! End-to-end tests of the widget routes against a mocked chat API.
//!
//! Requests go through the full router (sessions, middleware, templates)
//! with `tower::ServiceExt::oneshot`; the remote endpoint is a wiremock server.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chat_widget::config::{Settings, StorageSettings, WidgetSettings};
use chat_widget::startup::{build_router, build_state};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;
use widget_core::config::ServerConfig;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(api_url: Option<String>) -> Settings {
    Settings {
        server: ServerConfig::default(),
        widget: WidgetSettings {
            api_url,
            request_timeout_ms: 2_000,
            ..Default::default()
        },
        storage: StorageSettings::default(),
    }
}

fn app(settings: &Settings) -> Router {
    let state = build_state(settings).expect("state builds");
    build_router(state, false)
}

async fn mock_api() -> MockServer {
    MockServer::start().await
}

fn chat_url(server: &MockServer) -> Option<String> {
    Some(format!("{}/chat", server.uri()))
}

/// A browser: remembers the session cookie between requests.
struct Browser {
    router: Router,
    cookie: Option<String>,
}

impl Browser {
    fn new(router: Router) -> Self {
        Self {
            router,
            cookie: None,
        }
    }

    async fn request(&mut self, request: Request<Body>) -> Response {
        let response = self.router.clone().oneshot(request).await.unwrap();
        if let Some(value) = response.headers().get(header::SET_COOKIE) {
            let pair = value.to_str().unwrap().split(';').next().unwrap();
            self.cookie = Some(pair.to_string());
        }
        response
    }

    fn builder(&self, method: &str, uri: &str) -> axum::http::request::Builder {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = &self.cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder
    }

    async fn get(&mut self, uri: &str) -> Response {
        let request = self.builder("GET", uri).body(Body::empty()).unwrap();
        self.request(request).await
    }

    async fn get_fragment(&mut self, uri: &str) -> Response {
        let request = self
            .builder("GET", uri)
            .header("hx-request", "true")
            .body(Body::empty())
            .unwrap();
        self.request(request).await
    }

    fn send_request(&self, text: &str, htmx: bool) -> Request<Body> {
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("message", text)
            .finish();
        let mut builder = self
            .builder("POST", "/widget/messages")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if htmx {
            builder = builder.header("hx-request", "true");
        }
        builder.body(Body::from(form)).unwrap()
    }

    async fn send(&mut self, text: &str) -> Response {
        let request = self.send_request(text, true);
        self.request(request).await
    }

    async fn post_form(&mut self, uri: &str, form: &str) -> Response {
        let request = self
            .builder("POST", uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap();
        self.request(request).await
    }
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

#[tokio::test]
async fn health_check_returns_ok() {
    let server = mock_api().await;
    let router = app(&settings(chat_url(&server)));

    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(body_text(response).await, "OK");
}

#[tokio::test]
async fn widget_page_sets_session_and_renders_shell() {
    let server = mock_api().await;
    let mut browser = Browser::new(app(&settings(chat_url(&server))));

    let closed = body_text(browser.get("/widget").await).await;
    assert!(browser.cookie.is_some());
    assert!(closed.contains("chat-launcher"));
    assert!(!closed.contains("id=\"chat-form\""));

    browser.post_form("/widget/ui", "action=open").await;
    let response = browser.get("/widget").await;
    assert_eq!(response.status(), StatusCode::OK);
    let csp = response
        .headers()
        .get("content-security-policy")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(!csp.is_empty());

    let html = body_text(response).await;
    assert!(html.contains("id=\"chat-form\""));
    assert!(html.contains("maxlength=\"1000\""));
    assert!(html.contains("data-failed=\"Oops! Something went wrong. Please try again.\""));
}

#[tokio::test]
async fn missing_api_url_shows_configuration_error() {
    let mut browser = Browser::new(app(&settings(None)));

    let page = browser.get("/widget").await;
    assert_eq!(page.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(body_text(page).await.contains("The chat is not configured"));

    let send = browser.send("hello").await;
    assert_eq!(send.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn non_http_api_url_shows_configuration_error() {
    let mut browser = Browser::new(app(&settings(Some("ftp://example.com/chat".into()))));

    let page = browser.get("/widget").await;

    assert_eq!(page.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn send_relays_message_and_renders_markdown_reply() {
    let server = mock_api().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(body_partial_json(json!({ "message": "hello there" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "response": "**Hi**, see [docs](https://example.com/docs)" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut browser = Browser::new(app(&settings(chat_url(&server))));
    browser.get("/widget").await;

    let response = browser.send("hello there").await;
    assert_eq!(response.status(), StatusCode::OK);

    let html = body_text(response).await;
    assert!(html.contains("message-user"));
    assert!(html.contains("hello there"));
    assert!(html.contains("<strong>Hi</strong>"));
    assert!(html.contains("<a href="));
    assert!(html.contains("example.com"));
    assert!(html.contains("rel=\"noopener noreferrer\""));
}

#[tokio::test]
async fn thread_id_is_the_session_id() {
    let server = mock_api().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "ok" })))
        .mount(&server)
        .await;

    let mut browser = Browser::new(app(&settings(chat_url(&server))));
    browser.get("/widget").await;
    browser.send("one").await;

    let listing = body_json(browser.get("/widget/messages").await).await;
    let session_id = listing["sessionId"].as_str().unwrap().to_string();
    assert!(session_id.starts_with("session_"));

    let requests = server.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent["thread_id"], session_id);
    assert_eq!(sent["message"], "one");
}

#[tokio::test]
async fn history_is_listed_as_json_with_nodes_for_bot_messages() {
    let server = mock_api().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "message": "# Title\n- item" })),
        )
        .mount(&server)
        .await;

    let mut browser = Browser::new(app(&settings(chat_url(&server))));
    browser.get("/widget").await;
    browser.send("question").await;

    let response = browser.get("/widget/messages").await;
    assert_eq!(response.status(), StatusCode::OK);
    let listing = body_json(response).await;

    assert_eq!(listing["isLoading"], false);
    let messages = listing["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);

    assert_eq!(messages[0]["sender"], "user");
    assert_eq!(messages[0]["content"], "question");
    assert!(messages[0].get("nodes").is_none());

    assert_eq!(messages[1]["sender"], "bot");
    assert_eq!(messages[1]["isError"], false);
    let nodes = messages[1]["nodes"].as_array().unwrap();
    assert_eq!(nodes[0]["type"], "header");
    assert_eq!(nodes[1]["type"], "list_item");
}

#[tokio::test]
async fn blank_reply_falls_back_to_default_text() {
    let server = mock_api().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "   " })))
        .mount(&server)
        .await;

    let mut browser = Browser::new(app(&settings(chat_url(&server))));
    let html = body_text(browser.send("hi").await).await;

    assert!(html.contains("Sorry, I did not receive a valid response."));
}

#[tokio::test]
async fn script_input_is_rejected_without_calling_the_api() {
    let server = mock_api().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "no" })))
        .expect(0)
        .mount(&server)
        .await;

    let mut browser = Browser::new(app(&settings(chat_url(&server))));
    browser.get("/widget").await;

    let response = browser.send("<script>alert(1)</script>").await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_text(response).await.contains("This message cannot be sent"));

    let listing = body_json(browser.get("/widget/messages").await).await;
    assert!(listing["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn encoded_script_input_is_rejected() {
    let server = mock_api().await;
    let mut browser = Browser::new(app(&settings(chat_url(&server))));

    let response = browser.send("&amp;lt;script&amp;gt;alert(1)").await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn hidden_script_input_is_rejected() {
    let server = mock_api().await;
    let mut browser = Browser::new(app(&settings(chat_url(&server))));

    for text in [
        "&amp;ltscript>alert(1)",
        "&#38;ltscript>alert(1)",
        "hello <scr\u{7}ipt",
        "&\u{0}#60script",
    ] {
        let response = browser.send(text).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY, "{text:?}");
    }
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn oversized_input_is_rejected() {
    let server = mock_api().await;
    let mut browser = Browser::new(app(&settings(chat_url(&server))));

    let response = browser.send(&"a".repeat(1001)).await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn markup_in_reply_is_escaped() {
    let server = mock_api().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({ "response": "<img src=x onerror=alert(1)> [x](javascript:alert(1))" }),
        ))
        .mount(&server)
        .await;

    let mut browser = Browser::new(app(&settings(chat_url(&server))));
    let html = body_text(browser.send("hi").await).await;

    assert!(!html.contains("<img"));
    assert!(html.contains("&lt;img"));
    assert!(!html.contains("href=\"javascript"));
}

async fn error_bubble_for(template: ResponseTemplate) -> String {
    let server = mock_api().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(template)
        .mount(&server)
        .await;

    let mut browser = Browser::new(app(&settings(chat_url(&server))));
    let response = browser.send("hello").await;
    assert_eq!(response.status(), StatusCode::OK);
    body_text(response).await
}

#[tokio::test]
async fn not_found_becomes_endpoint_error_bubble() {
    let html = error_bubble_for(ResponseTemplate::new(404)).await;

    assert!(html.contains("message-error"));
    assert!(html.contains("Endpoint not found (404)"));
}

#[tokio::test]
async fn forbidden_becomes_access_denied_bubble() {
    let html = error_bubble_for(ResponseTemplate::new(403)).await;

    assert!(html.contains("Access denied (403)"));
}

#[tokio::test]
async fn server_error_becomes_internal_error_bubble() {
    let html = error_bubble_for(ResponseTemplate::new(500).set_body_string("boom")).await;

    assert!(html.contains("Internal server error (500)"));
}

#[tokio::test]
async fn other_status_is_reported_with_its_code() {
    let html = error_bubble_for(ResponseTemplate::new(418)).await;

    assert!(html.contains("HTTP 418"));
}

#[tokio::test]
async fn non_json_reply_becomes_malformed_bubble() {
    let html = error_bubble_for(ResponseTemplate::new(200).set_body_string("not json")).await;

    assert!(html.contains("non-JSON"));
}

#[tokio::test]
async fn slow_api_becomes_timeout_bubble() {
    let server = mock_api().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "response": "late" }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let mut config = settings(chat_url(&server));
    config.widget.request_timeout_ms = 200;
    let mut browser = Browser::new(app(&config));

    let html = body_text(browser.send("hello").await).await;

    assert!(html.contains("Timeout:"));
    assert!(!html.contains("late"));
}

#[tokio::test]
async fn unreachable_api_becomes_network_bubble() {
    // Nothing listens on the discard port.
    let mut browser = Browser::new(app(&settings(Some("http://127.0.0.1:9/chat".into()))));
    let html = body_text(browser.send("hello").await).await;

    assert!(html.contains("message-error"));
    assert!(html.contains("Network error"));
}

#[tokio::test]
async fn concurrent_send_is_refused_while_one_is_in_flight() {
    let server = mock_api().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "response": "done" }))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut browser = Browser::new(app(&settings(chat_url(&server))));
    browser.get("/widget").await;

    let first = browser.router.clone().oneshot(browser.send_request("first", true));
    let second = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        browser
            .router
            .clone()
            .oneshot(browser.send_request("second", true))
            .await
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.unwrap().status(), StatusCode::OK);
    let second = second.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert!(body_text(second).await.contains("Please wait"));
}

#[tokio::test]
async fn history_keeps_only_the_newest_messages() {
    let server = mock_api().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "ack" })))
        .mount(&server)
        .await;

    let mut config = settings(chat_url(&server));
    config.widget.max_messages = 4;
    let mut browser = Browser::new(app(&config));
    browser.get("/widget").await;

    for text in ["one", "two", "three"] {
        assert_eq!(browser.send(text).await.status(), StatusCode::OK);
    }

    let listing = body_json(browser.get("/widget/messages").await).await;
    let contents: Vec<&str> = listing["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["two", "ack", "three", "ack"]);
}

#[tokio::test]
async fn browsers_do_not_share_history() {
    let server = mock_api().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "ack" })))
        .mount(&server)
        .await;

    let router = app(&settings(chat_url(&server)));
    let mut alice = Browser::new(router.clone());
    let mut bob = Browser::new(router);
    alice.get("/widget").await;
    bob.get("/widget").await;

    alice.send("private").await;

    let listing = body_json(bob.get("/widget/messages").await).await;
    assert!(listing["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn ui_state_round_trips_through_the_form() {
    let server = mock_api().await;
    let mut browser = Browser::new(app(&settings(chat_url(&server))));
    browser.get("/widget").await;

    let response = browser.post_form("/widget/ui", "action=open").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let response = browser.post_form("/widget/ui", "action=minimize").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let request = browser
        .builder("POST", "/widget/ui")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header("hx-request", "true")
        .body(Body::from("action=restore"))
        .unwrap();
    let ui = body_json(browser.request(request).await).await;
    assert_eq!(ui, json!({ "isOpen": true, "isMinimized": false }));
}

#[tokio::test]
async fn reset_clears_history_and_starts_a_new_session() {
    let server = mock_api().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "ack" })))
        .mount(&server)
        .await;

    let mut browser = Browser::new(app(&settings(chat_url(&server))));
    browser.get("/widget").await;
    browser.send("hello").await;
    let before = body_json(browser.get("/widget/messages").await).await;

    let response = browser.post_form("/widget/reset", "").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let after = body_json(browser.get("/widget/messages").await).await;
    assert!(after["messages"].as_array().unwrap().is_empty());
    assert_ne!(before["sessionId"], after["sessionId"]);
}

#[tokio::test]
async fn greeting_is_shown_for_an_empty_conversation_only() {
    let server = mock_api().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "ack" })))
        .mount(&server)
        .await;

    let mut config = settings(chat_url(&server));
    config.widget.initial_message = Some("Welcome! Ask me anything.".into());
    let mut browser = Browser::new(app(&config));
    browser.get("/widget").await;
    browser.post_form("/widget/ui", "action=open").await;

    let page = body_text(browser.get("/widget").await).await;
    assert!(page.contains("Welcome! Ask me anything."));

    browser.send("hello").await;
    let fragment = body_text(browser.get_fragment("/widget/messages").await).await;
    assert!(!fragment.contains("Welcome!"));
    assert!(fragment.contains("hello"));
}

#[tokio::test]
async fn plain_form_post_redirects_back_to_the_widget() {
    let server = mock_api().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "ack" })))
        .mount(&server)
        .await;

    let mut browser = Browser::new(app(&settings(chat_url(&server))));
    browser.get("/widget").await;

    let request = browser.send_request("hello", false);
    let response = browser.request(request).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/widget");
}

#[tokio::test]
async fn metrics_count_exchanges_and_blocked_input() {
    let server = mock_api().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "ack" })))
        .mount(&server)
        .await;

    let mut browser = Browser::new(app(&settings(chat_url(&server))));
    browser.send("hello").await;
    browser.send("<script>x</script>").await;

    let response = browser.get("/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;

    assert!(text.contains("chat_exchanges_total{outcome=\"succeeded\"} 1"));
    assert!(text.contains("security_events_total"));
    assert!(text.contains("http_requests_total"));
}

#[tokio::test]
async fn sends_over_the_rate_limit_get_too_many_requests() {
    let server = mock_api().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "ack" })))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = settings(chat_url(&server));
    config.widget.rate_limit_requests = 2;
    let mut browser = Browser::new(app(&config));
    browser.get("/widget").await;

    assert_eq!(browser.send("one").await.status(), StatusCode::OK);
    assert_eq!(browser.send("two").await.status(), StatusCode::OK);

    let limited = browser.send("three").await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = limited.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=30).contains(&retry_after));
    assert!(body_text(limited).await.contains("too quickly"));

    let listing = body_json(browser.get("/widget/messages").await).await;
    assert_eq!(listing["messages"].as_array().unwrap().len(), 4);

    let text = body_text(browser.get("/metrics").await).await;
    assert!(text.contains("security_events_total{kind=\"rate_limit_exceeded\"} 1"));
}
