use std::path::PathBuf;
use std::sync::{ Arc, RwLock };

use tokio::sync::OnceCell;
use tracing::{ info, warn };

use crate::mail::MailTransport;
use crate::storage::{ db, models };
use crate::sync::classify::{ self, BayesClassifier };
use crate::sync::SyncEngine;
use crate::utils::config::Config;

pub struct Runtime {
    pub config: Arc<Config>,
    pub db: OnceCell<db::Database>,
    pub transport: Arc<dyn MailTransport>,
    pub sync: SyncEngine,
    // Swappable strategy slot: installing a retrained model is a single
    // Arc replacement, readers are never blocked across a cycle.
    classifier: RwLock<Option<Arc<BayesClassifier>>>,
}

impl Runtime {
    pub fn new(config: Arc<Config>, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            config,
            db: OnceCell::const_new(),
            transport,
            sync: SyncEngine::new(),
            classifier: RwLock::new(None),
        }
    }

    /// Readiness gate for classification: None until a model is
    /// installed, in which case callers label with `Unclassified`
    /// instead of waiting.
    pub fn classifier(&self) -> Option<Arc<BayesClassifier>> {
        self.classifier
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn install_classifier(&self, classifier: Arc<BayesClassifier>) {
        *self.classifier.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(
            classifier
        );
    }

    async fn init_db(&self) -> anyhow::Result<()> {
        let db_config = db::DatabaseConfig {
            path: self.config.get_value("database", "path").unwrap_or("mailsift.db").to_string(),

            pool_size: self.config
                .get_value("database", "pool_size")
                .map(|p| p.parse())
                .transpose()?,

            connect_timeout: self.config
                .get_value("database", "connect_timeout")
                .map(|p| p.parse())
                .transpose()?,
        };

        let db = db::Database
            ::new(db_config).await
            .map_err(|e| anyhow::anyhow!("DB init failed: {}", e))?;
        db.ping().await?;

        // Both schemas must exist before the first sync cycle can run
        models::account::ensure_schema(db.pool()).await?;
        models::email::ensure_schema(db.pool()).await?;

        self.db.set(db).map_err(|_| anyhow::anyhow!("Database already initialized"))?;

        info!("Database initialized");
        Ok(())
    }

    async fn init_classifier(&self) -> anyhow::Result<()> {
        let path = PathBuf::from(
            self.config.get_value("classifier", "model_path").unwrap_or("classifier_model.json")
        );

        // Training touches the filesystem and burns CPU, keep it off the
        // async workers
        let classifier = tokio::task
            ::spawn_blocking(move || classify::load_or_train(&path)).await??;

        self.install_classifier(Arc::new(classifier));
        Ok(())
    }

    pub async fn run(
        self: Arc<Self>,
        tasks: &mut Vec<tokio::task::JoinHandle<()>>
    ) -> anyhow::Result<()> {
        self.init_db().await?;

        // A missing classifier is not fatal: ingestion proceeds with
        // Unclassified labels until a model is installed
        if let Err(e) = self.init_classifier().await {
            warn!("Classifier init failed, messages will be Unclassified: {}", e);
        }

        {
            let rt = Arc::clone(&self);
            tasks.push(
                tokio::spawn(async move {
                    crate::sync::run_sync_worker(rt).await;
                })
            );
        }

        {
            let rt = Arc::clone(&self);
            tasks.push(
                tokio::spawn(async move {
                    if let Err(e) = crate::api::run_api(rt).await {
                        tracing::error!("API server stopped: {}", e);
                    }
                })
            );
        }

        Ok(())
    }
}
