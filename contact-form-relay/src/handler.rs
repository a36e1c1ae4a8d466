use crate::{
    config::RelayConfig,
    mailer::{MailSendError, MailSender},
    message::{OutboundMessage, RenderError},
    submission::{ContactFormSubmission, SubmissionError},
};
use lambda_http::{
    http::{
        header::{HeaderValue, CONTENT_TYPE},
        Method, StatusCode,
    },
    Body, Error, Request, Response,
};
use serde_json::{json, Value};
use tracing::{error, info, warn};

/// Turns one contact form request into at most one relayed email.
pub struct ContactFormHandler<MailSenderT: MailSender> {
    config: RelayConfig,
    mailer: MailSenderT,
}

impl<MailSenderT: MailSender> ContactFormHandler<MailSenderT> {
    pub fn new(config: RelayConfig, mailer: MailSenderT) -> Self {
        Self { config, mailer }
    }

    pub fn mailer(&self) -> &MailSenderT {
        &self.mailer
    }

    /// Never fails: every problem with the request or the relay maps to a response.
    pub async fn handle(&self, event: Request) -> Result<Response<Body>, Error> {
        if event.method() == Method::OPTIONS {
            return Ok(preflight_response());
        }
        match self.process_submission(&event).await {
            Ok(disposition) => {
                disposition.log();
                Ok(success_response())
            }
            Err(error) => {
                error.log();
                Ok(error.into_response())
            }
        }
    }

    async fn process_submission(&self, event: &Request) -> Result<Disposition, ContactFormError> {
        if event.method() != Method::POST {
            return Err(ContactFormError::MethodNotAllowed(event.method().clone()));
        }
        let submission = ContactFormSubmission::from_request(event, self.config.body_parsing)?;
        if submission.is_spam() {
            return Ok(Disposition::Discarded);
        }
        let validated_submission = submission.validate()?;
        let message = OutboundMessage::compose(&self.config, &validated_submission)?;
        self.mailer.send(&message).await?;
        Ok(Disposition::Relayed)
    }
}

/// What became of a submission which was answered with success.
enum Disposition {
    Relayed,
    /// The honeypot field was filled in. The sender gets the same answer as a genuine submitter.
    Discarded,
}

impl Disposition {
    fn log(&self) {
        match self {
            Disposition::Relayed => info!("Relayed contact form submission"),
            Disposition::Discarded => info!("Discarded contact form submission with honeypot set"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContactFormError {
    #[error("Method {0} not allowed")]
    MethodNotAllowed(Method),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Relay(#[from] MailSendError),
}

impl ContactFormError {
    fn log(&self) {
        match self {
            ContactFormError::MethodNotAllowed(_) | ContactFormError::Submission(_) => {
                warn!("Client error in contact form submission: {self}");
            }
            ContactFormError::Render(_) | ContactFormError::Relay(_) => {
                error!("Email error: {self}");
            }
        }
    }

    /// The body never carries the error's own description, which may contain relay diagnostics.
    pub fn into_response(self) -> Response<Body> {
        match self {
            ContactFormError::MethodNotAllowed(_) => {
                error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
            }
            ContactFormError::Submission(SubmissionError::InvalidJson(_)) => {
                error_response(StatusCode::BAD_REQUEST, "Invalid JSON")
            }
            ContactFormError::Submission(SubmissionError::InvalidBody(_)) => {
                error_response(StatusCode::BAD_REQUEST, "Invalid body")
            }
            ContactFormError::Submission(SubmissionError::MissingFields(_)) => {
                error_response(StatusCode::BAD_REQUEST, "Missing required fields.")
            }
            ContactFormError::Render(_) | ContactFormError::Relay(_) => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Email failed to send.")
            }
        }
    }
}

fn preflight_response() -> Response<Body> {
    Response::new(Body::Empty)
}

fn success_response() -> Response<Body> {
    json_response(StatusCode::OK, json!({ "ok": true }))
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    json_response(status, json!({ "error": message }))
}

fn json_response(status: StatusCode, body: Value) -> Response<Body> {
    let mut response = Response::new(Body::Text(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
