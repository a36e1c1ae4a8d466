use lambda_http::{ext::PayloadError, Request, RequestPayloadExt};
use serde::{
    de::{self, MapAccess, Visitor},
    Deserialize, Deserializer,
};
use serde_json::{Map, Value};
use std::fmt;
use tracing::debug;

/// How the request body is decoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BodyParsingStrategy {
    /// Decode according to the declared content type. Without a recognised content type, try JSON
    /// and fall back to form decoding.
    #[default]
    Negotiate,
    /// Always decode as JSON, whatever the declared content type.
    Json,
}

impl BodyParsingStrategy {
    pub fn named(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "negotiate" => Some(Self::Negotiate),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// The fields of a contact form as they arrive, before any validation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ContactFormSubmission {
    pub name: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
    /// Honeypot. The form hides this field, so only bots fill it in.
    pub company: Option<String>,
}

impl ContactFormSubmission {
    pub fn from_request(
        event: &Request,
        strategy: BodyParsingStrategy,
    ) -> Result<Self, SubmissionError> {
        let body: &[u8] = event.body().as_ref();
        if body.is_empty() {
            return Ok(Self::default());
        }
        if strategy == BodyParsingStrategy::Json {
            return Self::parse_json(body);
        }
        match event.payload::<Self>() {
            Ok(Some(submission)) => Ok(submission),
            Err(PayloadError::Json(error)) => Err(SubmissionError::InvalidJson(error)),
            Err(PayloadError::WwwFormUrlEncoded(error)) => {
                Err(SubmissionError::InvalidBody(error))
            }
            // No content type lambda_http recognises, such as a missing header or a `+json` type.
            Ok(None) => Self::parse_json(body).or_else(|error| {
                debug!("Body is not JSON ({error}), decoding as form");
                Self::parse_form(body)
            }),
        }
    }

    fn parse_json(body: &[u8]) -> Result<Self, SubmissionError> {
        serde_json::from_slice(body).map_err(SubmissionError::InvalidJson)
    }

    fn parse_form(body: &[u8]) -> Result<Self, SubmissionError> {
        serde_urlencoded::from_bytes(body).map_err(SubmissionError::InvalidBody)
    }

    pub fn is_spam(&self) -> bool {
        self.company.as_deref().is_some_and(|company| !company.is_empty())
    }

    pub fn validate(&self) -> Result<ValidatedSubmission<'_>, SubmissionError> {
        let name = required(&self.name);
        let email = required(&self.email);
        let message = required(&self.message);
        let (Some(name), Some(email), Some(message)) = (name, email, message) else {
            let missing = [("name", name), ("email", email), ("message", message)]
                .into_iter()
                .filter(|(_, value)| value.is_none())
                .map(|(field, _)| field)
                .collect();
            return Err(SubmissionError::MissingFields(missing));
        };
        Ok(ValidatedSubmission {
            name,
            email,
            message,
        })
    }
}

fn required(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|value| !value.is_empty())
}

/// A submission with every required field present and non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedSubmission<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub message: &'a str,
}

const FIELDS: &[&str] = &["name", "email", "message", "company"];

/// Only objects are accepted. A filled-in honeypot is honoured even when other fields are
/// malformed.
impl<'de> Deserialize<'de> for ContactFormSubmission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_struct("ContactFormSubmission", FIELDS, SubmissionVisitor)
    }
}

struct SubmissionVisitor;

impl<'de> Visitor<'de> for SubmissionVisitor {
    type Value = ContactFormSubmission;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a contact form object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut fields = Map::new();
        while let Some(key) = map.next_key::<String>()? {
            if fields.contains_key(&key) {
                return Err(de::Error::custom(format_args!("duplicate field `{key}`")));
            }
            let value = map.next_value::<Value>()?;
            fields.insert(key, value);
        }

        let company = fields.remove("company").and_then(honeypot_text);
        let submission = ContactFormSubmission {
            company,
            ..Default::default()
        };
        if submission.is_spam() {
            return Ok(submission);
        }
        Ok(ContactFormSubmission {
            name: text_field(&mut fields, "name")?,
            email: text_field(&mut fields, "email")?,
            message: text_field(&mut fields, "message")?,
            ..submission
        })
    }
}

fn text_field<E: de::Error>(
    fields: &mut Map<String, Value>,
    name: &str,
) -> Result<Option<String>, E> {
    match fields.remove(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(other) => Err(E::custom(format_args!(
            "field `{name}` must be a string, found {other}"
        ))),
    }
}

/// Values a browser script treats as false read as an empty honeypot. Any other value fills it.
fn honeypot_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        Value::Bool(false) => Some(String::new()),
        Value::Number(number) if number.as_f64() == Some(0.0) => Some(String::new()),
        other => Some(other.to_string()),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("Invalid body: {0}")]
    InvalidBody(#[source] serde_urlencoded::de::Error),
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
}
