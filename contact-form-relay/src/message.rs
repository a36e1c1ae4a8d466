use crate::{config::RelayConfig, submission::ValidatedSubmission};
use serde::Serialize;
use serde_json::Value;
use tinytemplate::{error::Error, format_unescaped, TinyTemplate};

const HTML_TEMPLATE_NAME: &str = "contact-message-html";
const HTML_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/contact-message.html"
));

/// The email relayed for one accepted submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub from: String,
    pub to: String,
    pub reply_to: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
}

impl OutboundMessage {
    pub fn compose(
        config: &RelayConfig,
        submission: &ValidatedSubmission,
    ) -> Result<Self, RenderError> {
        Ok(Self {
            from: config.from.clone(),
            to: config.to.clone(),
            reply_to: submission.email.into(),
            subject: config.subject.clone(),
            body_text: render_text(submission),
            body_html: render_html(submission)?,
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Error rendering HTML body: {0}")]
pub struct RenderError(#[from] Error);

#[derive(Serialize)]
struct Context<'a> {
    name: &'a str,
    email: &'a str,
    message: &'a str,
}

fn render_text(submission: &ValidatedSubmission) -> String {
    format!(
        "Name: {}\nEmail: {}\n\n{}",
        submission.name, submission.email, submission.message
    )
}

fn render_html(submission: &ValidatedSubmission) -> Result<String, Error> {
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&escape_formatter);
    tt.add_formatter("line_breaks", render_line_breaks);
    tt.add_template(HTML_TEMPLATE_NAME, HTML_TEMPLATE)?;
    tt.render(
        HTML_TEMPLATE_NAME,
        &Context {
            name: submission.name,
            email: submission.email,
            message: submission.message,
        },
    )
}

/// Replaces the characters which are significant in HTML markup or attribute values with their
/// entities.
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn escape_formatter(value: &Value, output: &mut String) -> Result<(), Error> {
    let mut raw = String::new();
    format_unescaped(value, &mut raw)?;
    output.push_str(&escape_html(&raw));
    Ok(())
}

fn render_line_breaks(value: &Value, output: &mut String) -> Result<(), Error> {
    let mut raw = String::new();
    format_unescaped(value, &mut raw)?;
    output.push_str(&escape_html(&raw).replace('\n', "<br>"));
    Ok(())
}
