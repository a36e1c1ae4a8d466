use async_trait::async_trait;
use aws_config::BehaviorVersion;
use serde::de::DeserializeOwned;

#[async_trait]
pub trait SecretRepository: Send + Sync {
    async fn open() -> Self;

    async fn get_secret<T: DeserializeOwned>(&self, name: &str) -> Result<T, SecretError>;
}

pub struct AwsSecretsManagerSecretRepository(aws_sdk_secretsmanager::Client);

#[async_trait]
impl SecretRepository for AwsSecretsManagerSecretRepository {
    async fn open() -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Ok(url) = std::env::var("AWS_ENDPOINT_URL") {
            loader = loader.endpoint_url(url);
        }
        let config = loader.load().await;
        Self(aws_sdk_secretsmanager::Client::new(&config))
    }

    async fn get_secret<T: DeserializeOwned>(&self, name: &str) -> Result<T, SecretError> {
        let secret = self
            .0
            .get_secret_value()
            .secret_id(name)
            .send()
            .await
            .map_err(|error| SecretError::Unavailable {
                name: name.into(),
                source: error.into(),
            })?;
        let Some(secret_value) = secret.secret_string() else {
            return Err(SecretError::Missing(name.into()));
        };
        parse_secret(name, secret_value)
    }
}

fn parse_secret<T: DeserializeOwned>(name: &str, value: &str) -> Result<T, SecretError> {
    serde_json::from_str(value).map_err(|source| SecretError::Malformed {
        name: name.into(),
        source,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Unable to retrieve secret {name}: {source}")]
    Unavailable {
        name: String,
        #[source]
        source: aws_sdk_secretsmanager::Error,
    },
    #[error("Missing secret {0}")]
    Missing(String),
    #[error("Malformed secret {name}: {source}")]
    Malformed {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}
