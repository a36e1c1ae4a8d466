use log::debug;
use mailin_embedded::{response, Handler, Response, Server, SslConfig};
use std::{net::IpAddr, thread};
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    Mutex,
};

pub const SMTP_PORT: u16 = 4567;
pub const POISONED_SMTP_PORT: u16 = 4568;

const SERVER_NAME: &str = "relay.test";

/// One message accepted by [`FakeSmtpServer`], with the envelope it was delivered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMail {
    pub envelope_from: String,
    pub envelope_to: Vec<String>,
    /// The raw message, headers included.
    pub content: String,
}

#[derive(Clone)]
struct RecordingHandler {
    in_progress: Option<(String, Vec<String>, Vec<u8>)>,
    delivered: UnboundedSender<ReceivedMail>,
}

impl Handler for RecordingHandler {
    fn data_start(&mut self, _domain: &str, from: &str, _is8bit: bool, to: &[String]) -> Response {
        self.in_progress = Some((from.to_owned(), to.to_vec(), Vec::new()));
        response::OK
    }

    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        if let Some((_, _, content)) = &mut self.in_progress {
            content.extend_from_slice(buf);
        }
        Ok(())
    }

    fn data_end(&mut self) -> Response {
        let Some((envelope_from, envelope_to, content)) = self.in_progress.take() else {
            return response::INTERNAL_ERROR;
        };
        let mail = ReceivedMail {
            envelope_from,
            envelope_to,
            content: String::from_utf8_lossy(&content).into_owned(),
        };
        debug!("Received mail from {} to {:?}", mail.envelope_from, mail.envelope_to);
        // The receiving side only goes away when the whole test binary does.
        let _ = self.delivered.send(mail);
        response::OK
    }

    fn auth_plain(
        &mut self,
        _authorization_id: &str,
        authentication_id: &str,
        _password: &str,
    ) -> Response {
        debug!("Accepting credentials of {authentication_id}");
        response::AUTH_OK
    }
}

/// An SMTP server on [`SMTP_PORT`] which accepts every message and queues each one, in order of
/// arrival, for the test to inspect.
pub struct FakeSmtpServer {
    server: std::sync::Mutex<Option<Server<RecordingHandler>>>,
    delivered: Mutex<UnboundedReceiver<ReceivedMail>>,
}

impl FakeSmtpServer {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let server = configured_server(
            RecordingHandler {
                in_progress: None,
                delivered: sender,
            },
            SMTP_PORT,
        );
        Self {
            server: std::sync::Mutex::new(Some(server)),
            delivered: Mutex::new(receiver),
        }
    }

    /// Starts serving on a background thread. Subsequent calls do nothing.
    pub fn start(&self) {
        if let Some(server) = self.server.lock().unwrap().take() {
            thread::spawn(move || {
                let _ = server.serve();
            });
        }
    }

    /// Waits for the next message not yet taken by an earlier call.
    pub async fn next_mail(&self) -> Option<ReceivedMail> {
        self.delivered.lock().await.recv().await
    }

    /// Forgets every message delivered so far.
    pub async fn clear(&self) {
        let mut delivered = self.delivered.lock().await;
        while delivered.try_recv().is_ok() {}
    }
}

impl Default for FakeSmtpServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Refuses to open a session at all.
#[derive(Clone)]
struct PoisonedHandler;

impl Handler for PoisonedHandler {
    fn helo(&mut self, _ip: IpAddr, _domain: &str) -> Response {
        response::INTERNAL_ERROR
    }

    fn mail(&mut self, _ip: IpAddr, _domain: &str, _from: &str) -> Response {
        response::INTERNAL_ERROR
    }
}

/// Starts an SMTP server on [`POISONED_SMTP_PORT`] which rejects every session.
pub fn start_poisoned_smtp_server() {
    let server = configured_server(PoisonedHandler, POISONED_SMTP_PORT);
    thread::spawn(move || {
        let _ = server.serve();
    });
}

fn configured_server<H: Handler + Clone + Send>(handler: H, port: u16) -> Server<H> {
    let mut server = Server::new(handler);
    server
        .with_name(SERVER_NAME)
        .with_ssl(SslConfig::None)
        .unwrap()
        .with_addr(format!("127.0.0.1:{port}"))
        .unwrap();
    server
}
