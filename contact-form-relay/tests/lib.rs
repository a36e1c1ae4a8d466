use async_trait::async_trait;
use contact_form_relay::{
    config::{DeploymentProfile, RelayConfig},
    handler::ContactFormHandler,
    mailer::{MailSendError, MailSender},
    message::OutboundMessage,
    secrets::SecretError,
    submission::BodyParsingStrategy,
};
use googletest::prelude::*;
use lambda_http::{
    http::{HeaderValue, Method},
    Body, Request, Response,
};
use serde::Serialize;
use std::sync::Mutex;

const OK_BODY: &str = r#"{"ok":true}"#;

#[derive(Default)]
struct SpyMailSender {
    sent: Mutex<Vec<OutboundMessage>>,
    failure: Option<&'static str>,
}

impl SpyMailSender {
    fn failing_with(detail: &'static str) -> Self {
        Self {
            failure: Some(detail),
            ..Default::default()
        }
    }

    fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSender for SpyMailSender {
    async fn send(&self, message: &OutboundMessage) -> std::result::Result<(), MailSendError> {
        self.sent.lock().unwrap().push(message.clone());
        match self.failure {
            Some(detail) => Err(MailSendError::Credentials(SecretError::Missing(
                detail.into(),
            ))),
            None => Ok(()),
        }
    }
}

fn config() -> RelayConfig {
    RelayConfig::resolve(&DeploymentProfile::SENDGRID, |_| None).unwrap()
}

fn handler() -> ContactFormHandler<SpyMailSender> {
    ContactFormHandler::new(config(), SpyMailSender::default())
}

#[googletest::test]
#[tokio::test]
async fn relays_well_formed_submission() {
    let subject = handler();
    let event = EventPayload::arbitrary().into_event();

    let response = subject.handle(event).await.unwrap();

    expect_that!(response.status().as_u16(), eq(200));
    expect_that!(response.body(), points_to(matches_pattern!(Body::Text(eq(OK_BODY)))));
    expect_that!(
        response.headers().get("Content-Type"),
        some(eq("application/json"))
    );
    expect_that!(
        subject.mailer().sent(),
        elements_are![matches_pattern!(OutboundMessage {
            from: eq("Sociabl Website <no-reply@sociablpty.com>"),
            to: eq("admin@sociablpty.com"),
            reply_to: eq("jane@x.com"),
            subject: eq("[Sociabl] New contact form submission"),
            body_text: all!(
                contains_substring("Jane"),
                contains_substring("jane@x.com"),
                contains_substring("Hi\nthere")
            ),
            body_html: all!(
                contains_substring("Jane"),
                contains_substring("Hi<br>there"),
                not(contains_substring("Hi\nthere"))
            ),
        })]
    );
}

#[googletest::test]
#[tokio::test]
async fn escapes_markup_in_html_body() {
    let subject = handler();
    let event = EventPayload::arbitrary().with_name("<script>").into_event();

    subject.handle(event).await.unwrap();

    expect_that!(
        subject.mailer().sent(),
        elements_are![matches_pattern!(OutboundMessage {
            body_html: contains_substring("&lt;script&gt;")
                .and(not(contains_substring("<script>"))),
        })]
    );
}

#[googletest::test]
#[tokio::test]
async fn answers_preflight_with_empty_body() {
    let subject = handler();
    let event = EventPayload::arbitrary()
        .with_company("ACME")
        .into_event_with_method(Method::OPTIONS);

    let response = subject.handle(event).await.unwrap();

    expect_that!(response.status().as_u16(), eq(200));
    expect_that!(ResponseShape::of(&response).body, empty());
    expect_that!(subject.mailer().sent(), empty());
}

#[googletest::test]
#[tokio::test]
async fn rejects_other_methods() {
    for method in [Method::GET, Method::PUT, Method::DELETE, Method::PATCH, Method::HEAD] {
        let subject = handler();
        let event = EventPayload::arbitrary().into_event_with_method(method);

        let response = subject.handle(event).await.unwrap();

        expect_that!(response.status().as_u16(), eq(405));
        expect_that!(
            response.body(),
            points_to(matches_pattern!(Body::Text(eq(
                r#"{"error":"Method not allowed"}"#
            ))))
        );
        expect_that!(subject.mailer().sent(), empty());
    }
}

#[googletest::test]
#[tokio::test]
async fn silently_discards_submission_with_honeypot() {
    let subject = handler();
    let event = EventPayload::arbitrary().with_company("ACME").into_event();

    let response = subject.handle(event).await.unwrap();

    expect_that!(response.status().as_u16(), eq(200));
    expect_that!(response.body(), points_to(matches_pattern!(Body::Text(eq(OK_BODY)))));
    expect_that!(subject.mailer().sent(), empty());
}

#[googletest::test]
#[tokio::test]
async fn discards_honeypot_before_checking_required_fields() {
    let subject = handler();
    let event = EventPayload::empty().with_company("ACME").into_event();

    let response = subject.handle(event).await.unwrap();

    expect_that!(response.status().as_u16(), eq(200));
    expect_that!(subject.mailer().sent(), empty());
}

#[tokio::test]
async fn honeypot_response_is_indistinguishable_from_success() -> Result<()> {
    let discarded = handler()
        .handle(EventPayload::arbitrary().with_company("ACME").into_event())
        .await
        .unwrap();
    let relayed = handler()
        .handle(EventPayload::arbitrary().into_event())
        .await
        .unwrap();

    verify_that!(ResponseShape::of(&discarded), eq(ResponseShape::of(&relayed)))
}

#[googletest::test]
#[tokio::test]
async fn relays_when_honeypot_is_empty() {
    let subject = handler();
    let event = EventPayload::arbitrary().with_company("").into_event();

    let response = subject.handle(event).await.unwrap();

    expect_that!(response.status().as_u16(), eq(200));
    expect_that!(subject.mailer().sent(), len(eq(1)));
}

#[googletest::test]
#[tokio::test]
async fn silently_discards_submission_with_non_string_honeypot() {
    for body in [
        r#"{"name":"Bot","email":"b@x.com","message":"spam","company":true}"#,
        r#"{"name":"Bot","email":"b@x.com","message":"spam","company":1}"#,
        r#"{"name":"Bot","email":"b@x.com","message":"spam","company":["ACME"]}"#,
    ] {
        let subject = handler();
        let event = raw_event(Method::POST, Some("application/json"), body);

        let response = subject.handle(event).await.unwrap();

        expect_that!(response.status().as_u16(), eq(200));
        expect_that!(response.body(), points_to(matches_pattern!(Body::Text(eq(OK_BODY)))));
        expect_that!(subject.mailer().sent(), empty());
    }
}

#[googletest::test]
#[tokio::test]
async fn rejects_missing_or_empty_required_fields() {
    let payloads = [
        EventPayload::arbitrary().without_name(),
        EventPayload::arbitrary().without_email(),
        EventPayload::arbitrary().without_message(),
        EventPayload::arbitrary().with_name(""),
        EventPayload::arbitrary().with_email(""),
        EventPayload::arbitrary().with_message(""),
        EventPayload::empty(),
    ];
    for payload in payloads {
        let subject = handler();

        let response = subject.handle(payload.into_event()).await.unwrap();

        expect_that!(response.status().as_u16(), eq(400));
        expect_that!(
            response.body(),
            points_to(matches_pattern!(Body::Text(eq(
                r#"{"error":"Missing required fields."}"#
            ))))
        );
        expect_that!(subject.mailer().sent(), empty());
    }
}

#[googletest::test]
#[tokio::test]
async fn rejects_malformed_json() {
    let subject = handler();
    let event = raw_event(Method::POST, Some("application/json"), "{\"name\": \"Jane\"");

    let response = subject.handle(event).await.unwrap();

    expect_that!(response.status().as_u16(), eq(400));
    expect_that!(
        response.body(),
        points_to(matches_pattern!(Body::Text(eq(r#"{"error":"Invalid JSON"}"#))))
    );
    expect_that!(subject.mailer().sent(), empty());
}

#[googletest::test]
#[tokio::test]
async fn rejects_whitespace_body_declared_as_json() {
    let subject = handler();
    let event = raw_event(Method::POST, Some("application/json"), "  \n");

    let response = subject.handle(event).await.unwrap();

    expect_that!(response.status().as_u16(), eq(400));
    expect_that!(
        response.body(),
        points_to(matches_pattern!(Body::Text(eq(r#"{"error":"Invalid JSON"}"#))))
    );
    expect_that!(subject.mailer().sent(), empty());
}

#[googletest::test]
#[tokio::test]
async fn rejects_malformed_form_body() {
    let subject = handler();
    let event = raw_event(
        Method::POST,
        Some("application/x-www-form-urlencoded"),
        "name=Jane&name=John&email=jane%40x.com&message=Hi",
    );

    let response = subject.handle(event).await.unwrap();

    expect_that!(response.status().as_u16(), eq(400));
    expect_that!(
        response.body(),
        points_to(matches_pattern!(Body::Text(eq(r#"{"error":"Invalid body"}"#))))
    );
    expect_that!(subject.mailer().sent(), empty());
}

#[googletest::test]
#[tokio::test]
async fn relays_form_encoded_submission() {
    let subject = handler();
    let event = raw_event(
        Method::POST,
        Some("application/x-www-form-urlencoded"),
        "name=Jane&email=jane%40x.com&message=Hi%0Athere",
    );

    let response = subject.handle(event).await.unwrap();

    expect_that!(response.status().as_u16(), eq(200));
    expect_that!(
        subject.mailer().sent(),
        elements_are![matches_pattern!(OutboundMessage {
            reply_to: eq("jane@x.com"),
            body_text: contains_substring("Hi\nthere"),
        })]
    );
}

#[googletest::test]
#[tokio::test]
async fn relays_form_encoded_submission_without_content_type() {
    let subject = handler();
    let event = raw_event(Method::POST, None, "name=Jane&email=jane%40x.com&message=Hi");

    let response = subject.handle(event).await.unwrap();

    expect_that!(response.status().as_u16(), eq(200));
    expect_that!(subject.mailer().sent(), len(eq(1)));
}

#[googletest::test]
#[tokio::test]
async fn json_only_deployment_rejects_form_body() {
    let config = RelayConfig {
        body_parsing: BodyParsingStrategy::Json,
        ..config()
    };
    let subject = ContactFormHandler::new(config, SpyMailSender::default());
    let event = raw_event(
        Method::POST,
        Some("application/x-www-form-urlencoded"),
        "name=Jane&email=jane%40x.com&message=Hi",
    );

    let response = subject.handle(event).await.unwrap();

    expect_that!(response.status().as_u16(), eq(400));
    expect_that!(
        response.body(),
        points_to(matches_pattern!(Body::Text(eq(r#"{"error":"Invalid JSON"}"#))))
    );
    expect_that!(subject.mailer().sent(), empty());
}

#[googletest::test]
#[tokio::test]
async fn returns_generic_error_when_relay_fails() {
    let subject = ContactFormHandler::new(
        config(),
        SpyMailSender::failing_with("SMTP_PASSWORD=hunter2 at smtp.internal"),
    );
    let event = EventPayload::arbitrary().into_event();

    let response = subject.handle(event).await.unwrap();

    expect_that!(response.status().as_u16(), eq(500));
    expect_that!(
        response.body(),
        points_to(matches_pattern!(Body::Text(eq(
            r#"{"error":"Email failed to send."}"#
        ))))
    );
    expect_that!(subject.mailer().sent(), len(eq(1)));
}

#[tokio::test]
async fn relays_identical_submissions_each_time() -> Result<()> {
    let subject = handler();

    subject
        .handle(EventPayload::arbitrary().into_event())
        .await
        .unwrap();
    subject
        .handle(EventPayload::arbitrary().into_event())
        .await
        .unwrap();

    verify_that!(subject.mailer().sent(), len(eq(2)))
}

#[derive(Debug, PartialEq)]
struct ResponseShape {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl ResponseShape {
    fn of(response: &Response<Body>) -> Self {
        let body: &[u8] = response.body().as_ref();
        Self {
            status: response.status().as_u16(),
            headers: response
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.to_string(),
                        value.to_str().unwrap_or_default().to_string(),
                    )
                })
                .collect(),
            body: body.to_vec(),
        }
    }
}

#[derive(Serialize)]
struct EventPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    company: Option<String>,
}

impl EventPayload {
    fn arbitrary() -> Self {
        Self {
            name: Some("Jane".into()),
            email: Some("jane@x.com".into()),
            message: Some("Hi\nthere".into()),
            company: None,
        }
    }

    fn empty() -> Self {
        Self {
            name: None,
            email: None,
            message: None,
            company: None,
        }
    }

    fn with_name(self, name: impl AsRef<str>) -> Self {
        Self {
            name: Some(name.as_ref().into()),
            ..self
        }
    }

    fn with_email(self, email: impl AsRef<str>) -> Self {
        Self {
            email: Some(email.as_ref().into()),
            ..self
        }
    }

    fn with_message(self, message: impl AsRef<str>) -> Self {
        Self {
            message: Some(message.as_ref().into()),
            ..self
        }
    }

    fn with_company(self, company: impl AsRef<str>) -> Self {
        Self {
            company: Some(company.as_ref().into()),
            ..self
        }
    }

    fn without_name(self) -> Self {
        Self { name: None, ..self }
    }

    fn without_email(self) -> Self {
        Self {
            email: None,
            ..self
        }
    }

    fn without_message(self) -> Self {
        Self {
            message: None,
            ..self
        }
    }

    fn into_event(self) -> Request {
        self.into_event_with_method(Method::POST)
    }

    fn into_event_with_method(self, method: Method) -> Request {
        raw_event(method, Some("application/json"), &self.into_json())
    }

    fn into_json(self) -> String {
        serde_json::to_string(&self).unwrap()
    }
}

fn raw_event(method: Method, content_type: Option<&'static str>, body: &str) -> Request {
    let mut event = Request::new(Body::Text(body.into()));
    *event.method_mut() = method;
    if let Some(content_type) = content_type {
        event
            .headers_mut()
            .append("Content-Type", HeaderValue::from_static(content_type));
    }
    event
}
