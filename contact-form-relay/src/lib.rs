//! Relays contact form submissions from a website to an operator mailbox through an SMTP relay.
//!
//! [`handler::ContactFormHandler`] accepts the HTTP request, filters spam, validates the
//! submission and hands an [`message::OutboundMessage`] to a [`mailer::MailSender`].

pub mod config;
pub mod handler;
pub mod mailer;
pub mod message;
pub mod secrets;
pub mod submission;
