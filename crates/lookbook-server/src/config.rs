use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Args, Parser};
use lookbook_contracts::events::EventLog;
use lookbook_contracts::geometry::BoxUnits;
use lookbook_contracts::models::{ModelRegistry, ModelSelector, TaskModelOverrides, TaskModels};
use lookbook_engine::fanout::DEFAULT_THUMBNAIL_CONCURRENCY;
use lookbook_engine::{DryrunGateway, GeminiGateway, GenerativeGateway, DEFAULT_REQUEST_TIMEOUT};

use crate::state::{AppState, EventSink};

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Gateway and model choices shared by `serve` and `detect`.
#[derive(Debug, Clone, Args)]
pub struct GatewayArgs {
    /// Answer from canned data instead of calling Gemini.
    #[arg(long)]
    pub dryrun: bool,
    #[arg(long)]
    pub detect_model: Option<String>,
    #[arg(long)]
    pub thumbnail_model: Option<String>,
    #[arg(long)]
    pub search_model: Option<String>,
    #[arg(long)]
    pub try_on_model: Option<String>,
    /// Upstream request timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
    pub request_timeout: u64,
    #[arg(long, default_value_t = DEFAULT_THUMBNAIL_CONCURRENCY)]
    pub thumbnail_concurrency: usize,
    /// How to read detection boxes: auto, normalized or pixel.
    #[arg(long, default_value_t = BoxUnits::Auto)]
    pub box_units: BoxUnits,
}

#[derive(Debug, Clone, Parser)]
pub struct ServeArgs {
    #[arg(long, default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,
    /// Append request events to this JSONL file.
    #[arg(long)]
    pub events: Option<PathBuf>,
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,
    #[command(flatten)]
    pub gateway: GatewayArgs,
}

impl GatewayArgs {
    fn provider(&self) -> &'static str {
        if self.dryrun {
            "dryrun"
        } else {
            "gemini"
        }
    }

    fn overrides(&self) -> TaskModelOverrides {
        TaskModelOverrides {
            detect: self.detect_model.clone(),
            thumbnail: self.thumbnail_model.clone(),
            product_search: self.search_model.clone(),
            try_on: self.try_on_model.clone(),
        }
    }

    /// Build the gateway. Must run outside the async runtime: the Gemini
    /// gateway owns a blocking HTTP client.
    pub fn build_gateway(&self) -> Result<Arc<dyn GenerativeGateway>> {
        if self.dryrun {
            return Ok(Arc::new(DryrunGateway));
        }
        let gateway = GeminiGateway::from_env(Duration::from_secs(self.request_timeout.max(1)))?;
        if !gateway.is_configured() {
            tracing::warn!(
                "GEMINI_API_KEY / GOOGLE_API_KEY not set; AI endpoints will answer 500"
            );
        }
        Ok(Arc::new(gateway))
    }

    /// Resolve the model for every task against the active provider.
    pub fn resolve_models(&self) -> Result<TaskModels> {
        let registry = ModelRegistry::for_provider(self.provider());
        tracing::debug!(
            provider = self.provider(),
            models = ?registry.list().map(|model| model.name.as_str()).collect::<Vec<_>>(),
            "model registry"
        );
        let selector = ModelSelector::new(Some(registry));
        let (models, warnings) =
            TaskModels::resolve(&selector, &self.overrides()).map_err(|err| anyhow!(err))?;
        for warning in warnings {
            tracing::warn!("{warning}");
        }
        Ok(models)
    }
}

impl ServeArgs {
    pub fn build_state(&self) -> Result<AppState> {
        let models = self.gateway.resolve_models()?;
        let gateway = self.gateway.build_gateway()?;
        tracing::info!(
            gateway = gateway.name(),
            detect = %models.detect,
            thumbnail = %models.thumbnail,
            product_search = %models.product_search,
            try_on = %models.try_on,
            "models resolved"
        );
        // The writer thread exits once the last sink clone is dropped.
        let events = match self.events.clone() {
            Some(path) => Some(EventSink::spawn(EventLog::new(path))?.0),
            None => None,
        };
        Ok(AppState {
            gateway,
            models: Arc::new(models),
            events,
            thumbnail_concurrency: self.gateway.thumbnail_concurrency.max(1),
            box_units: self.gateway.box_units,
            max_upload_bytes: self.max_upload_bytes,
        })
    }
}
