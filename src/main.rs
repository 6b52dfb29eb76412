use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter, Targets};
use tracing_subscriber::prelude::*;

use contact_relay::config::RelayConfig;
use contact_relay::delivery::{Deliverer, DeliveryKind, MailTransport, SmtpMailer};
use contact_relay::extract::AttachmentTextHandler;
use contact_relay::notify::{LogNotifier, Notifier, WebhookNotifier};
use contact_relay::pipeline::types::queues;
use contact_relay::pipeline::{InboundProcessor, ReplyProcessor, RulesetCache, SpamClassifier};
use contact_relay::server::{RelayState, relay_routes};
use contact_relay::storage::{BlobStore, FsBlobStore};
use contact_relay::store::{Conversations, LibSqlBackend, ParameterStore, WorkQueue};
use contact_relay::worker::{
    AttachmentQueueHandler, DeliveryHandler, QueueHandler, spawn_queue_worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = RelayConfig::from_env()?;

    // ── Logging ─────────────────────────────────────────────────────────
    // Spam events also go to <data_dir>/logs/spam.log.YYYY-MM-DD.
    std::fs::create_dir_all(config.log_dir())
        .with_context(|| format!("creating {}", config.log_dir().display()))?;
    let spam_appender = tracing_appender::rolling::daily(config.log_dir(), "spam.log");
    let (spam_writer, _spam_guard) = tracing_appender::non_blocking(spam_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer().with_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(spam_writer)
                .with_ansi(false)
                .with_target(false)
                .with_filter(Targets::new().with_target("spam", LevelFilter::INFO)),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        public = %config.addresses.public_email,
        domain = %config.addresses.domain_name,
        "Contact relay starting"
    );

    // ── Storage ─────────────────────────────────────────────────────────
    let db = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening database at {}", config.db_path.display()))?,
    );
    info!(path = %config.db_path.display(), "Database ready");

    let fs_blobs = FsBlobStore::new(config.blob_root());
    fs_blobs.ensure_root().await?;
    let blobs: Arc<dyn BlobStore> = Arc::new(fs_blobs);

    if let Some(key) = &config.spam_rules_key {
        db.put_parameter(&config.spam_rules_param, key).await?;
        info!(param = %config.spam_rules_param, key = %key, "Spam ruleset location set");
    }

    // ── Collaborators ───────────────────────────────────────────────────
    let notifier: Arc<dyn Notifier> = match &config.alert_webhook_url {
        Some(url) => Arc::new(
            WebhookNotifier::new(url.clone()).context("building alert webhook client")?,
        ),
        None => {
            warn!("RELAY_ALERT_WEBHOOK_URL not set, alerts will only be logged");
            Arc::new(LogNotifier)
        }
    };
    let transport: Arc<dyn MailTransport> =
        Arc::new(SmtpMailer::new(&config.smtp).context("building SMTP transport")?);
    let queue: Arc<dyn WorkQueue> = db.clone();
    let conversations = Conversations::new(db.clone());

    let rules = Arc::new(RulesetCache::new(
        db.clone(),
        blobs.clone(),
        config.spam_rules_param.clone(),
    ));
    let classifier = Arc::new(SpamClassifier::new(
        config.addresses.public_email.clone(),
        rules,
    ));
    let ack_body = config.ack_body().await?;

    // ── Workers ─────────────────────────────────────────────────────────
    let deliverer = Deliverer::new(transport, notifier.clone());
    let delivery = |kind| -> Arc<dyn QueueHandler> {
        Arc::new(DeliveryHandler::new(deliverer.clone(), kind))
    };
    let attachments: Arc<dyn QueueHandler> = Arc::new(AttachmentQueueHandler::new(Arc::new(
        AttachmentTextHandler::new(blobs.clone()),
    )));
    let handlers = [
        (queues::ACKNOWLEDGEMENTS, delivery(DeliveryKind::Forward)),
        (queues::FORWARDS, delivery(DeliveryKind::Forward)),
        (queues::REPLIES, delivery(DeliveryKind::Reply)),
        (queues::ATTACHMENTS, attachments),
    ];
    let workers: Vec<_> = handlers
        .into_iter()
        .map(|(name, handler)| spawn_queue_worker(queue.clone(), name, handler, config.worker))
        .collect();

    // ── HTTP ingress ────────────────────────────────────────────────────
    let state = RelayState {
        inbound: Arc::new(InboundProcessor::new(
            config.addresses.clone(),
            ack_body,
            blobs.clone(),
            queue.clone(),
            conversations.clone(),
            classifier,
            notifier.clone(),
        )),
        reply: Arc::new(ReplyProcessor::new(blobs, queue, conversations, notifier)),
    };

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("binding port {}", config.http_port))?;
    info!(port = config.http_port, "Relay ingress listening");

    axum::serve(listener, relay_routes(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    info!("Shutting down workers");
    let handles: Vec<_> = workers
        .into_iter()
        .map(|(handle, shutdown)| {
            shutdown.store(true, Ordering::Relaxed);
            handle
        })
        .collect();
    futures::future::join_all(handles).await;

    Ok(())
}
