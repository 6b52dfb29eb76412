//! Configuration types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::delivery::SmtpSettings;
use crate::error::ConfigError;
use crate::pipeline::RelayAddresses;
use crate::worker::WorkerSettings;

/// Acknowledgement body used when no template file is configured.
pub const DEFAULT_ACK_BODY: &str = "Hello,

Thank you for reaching out. Your message has been received and will be read personally.
You can expect a reply soon.

Best regards";

/// Relay configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub addresses: RelayAddresses,
    /// Root of the filesystem object store and the log directory.
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    /// Parameter holding the object key of the spam ruleset.
    pub spam_rules_param: String,
    /// Ruleset object key written to `spam_rules_param` at startup.
    pub spam_rules_key: Option<String>,
    pub ack_template: Option<PathBuf>,
    pub alert_webhook_url: Option<String>,
    pub http_port: u16,
    pub smtp: SmtpSettings,
    pub worker: WorkerSettings,
}

impl RelayConfig {
    /// Load from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required =
            |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()));

        let public_email = required("RELAY_PUBLIC_EMAIL")?;
        let addresses = RelayAddresses {
            public_email: public_email.clone(),
            private_email: required("RELAY_PRIVATE_EMAIL")?,
            domain_name: required("RELAY_DOMAIN_NAME")?,
        };

        let data_dir = PathBuf::from(get("RELAY_DATA_DIR").unwrap_or_else(|| "./data".into()));
        let db_path = get("RELAY_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("relay.db"));

        let smtp = SmtpSettings {
            host: required("SMTP_HOST")?,
            port: parse_or(&get, "SMTP_PORT", 587)?,
            username: get("SMTP_USERNAME"),
            password: get("SMTP_PASSWORD").map(SecretString::from),
            from_address: public_email,
        };

        let worker = WorkerSettings {
            poll_interval: Duration::from_secs(parse_or(&get, "RELAY_WORKER_POLL_SECS", 2)?),
            visibility_timeout: Duration::from_secs(parse_or(
                &get,
                "RELAY_VISIBILITY_TIMEOUT_SECS",
                300,
            )?),
            max_receives: parse_or(&get, "RELAY_MAX_RECEIVES", 5)?,
        };

        Ok(Self {
            addresses,
            data_dir,
            db_path,
            spam_rules_param: get("RELAY_SPAM_RULES_PARAM")
                .unwrap_or_else(|| "spam-keywords".into()),
            spam_rules_key: get("RELAY_SPAM_RULES_KEY"),
            ack_template: get("RELAY_ACK_TEMPLATE").map(PathBuf::from),
            alert_webhook_url: get("RELAY_ALERT_WEBHOOK_URL"),
            http_port: parse_or(&get, "RELAY_HTTP_PORT", 8080)?,
            smtp,
            worker,
        })
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn blob_root(&self) -> PathBuf {
        self.data_dir.join("objects")
    }

    /// The acknowledgement body: the template file if configured, else the
    /// built-in text.
    pub async fn ack_body(&self) -> Result<String, ConfigError> {
        match &self.ack_template {
            Some(path) => load_template(path).await,
            None => Ok(DEFAULT_ACK_BODY.to_string()),
        }
    }
}

async fn load_template(path: &Path) -> Result<String, ConfigError> {
    let body = tokio::fs::read_to_string(path).await?;
    Ok(body.trim_end().to_string())
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}
