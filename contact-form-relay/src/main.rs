use contact_form_relay::{
    config::RelayConfig,
    handler::ContactFormHandler,
    mailer::SmtpMailSender,
    secrets::{AwsSecretsManagerSecretRepository, SecretRepository},
};
use lambda_http::{run, service_fn, Error};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let config = RelayConfig::from_env()?;
    info!("Starting contact form relay with {config:?}");
    let secrets_repository = AwsSecretsManagerSecretRepository::open().await;
    let mailer = SmtpMailSender::new(config.clone(), secrets_repository);
    let handler = ContactFormHandler::new(config, mailer);
    run(service_fn(|event| handler.handle(event))).await
}
