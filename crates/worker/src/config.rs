use std::collections::HashMap;
use std::path::PathBuf;

use genwatch_core::job::WorkflowKind;
use genwatch_resolver::ResolverConfig;

/// Default ETA (seconds) for processing responses that carry none.
const DEFAULT_ETA_SECS: f64 = 60.0;

/// Errors raised while reading worker configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Base URL of the generation API.
    pub api_url: String,
    /// API key merged into request bodies, if the deployment needs one.
    pub api_key: Option<String>,
    /// Which workflow the request is submitted to.
    pub kind: WorkflowKind,
    /// JSON file holding the request body.
    pub request_path: PathBuf,
    /// ETA assumed when the backend does not send one.
    pub default_eta_secs: f64,
    /// Overrides the per-kind hard-ceiling multiplier.
    pub ceiling_multiplier: Option<f64>,
    /// Where to write the artifact; nothing is downloaded when unset.
    pub output_path: Option<PathBuf>,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var               | Required | Default            |
    /// |-----------------------|----------|--------------------|
    /// | `GENERATION_API_URL`  | yes      | --                 |
    /// | `GENERATION_API_KEY`  | no       | --                 |
    /// | `WORKFLOW_KIND`       | no       | `text_to_3d`       |
    /// | `REQUEST_PATH`        | no       | `request.json`     |
    /// | `DEFAULT_ETA_SECS`    | no       | `60`               |
    /// | `CEILING_MULTIPLIER`  | no       | per workflow kind  |
    /// | `OUTPUT_PATH`         | no       | --                 |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset.
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_url = get("GENERATION_API_URL").ok_or(ConfigError::Missing("GENERATION_API_URL"))?;
        let api_key = get("GENERATION_API_KEY");

        let kind = match get("WORKFLOW_KIND") {
            Some(value) => value.parse().map_err(|e: genwatch_core::error::CoreError| {
                ConfigError::Invalid {
                    var: "WORKFLOW_KIND",
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?,
            None => WorkflowKind::TextTo3d,
        };

        let request_path = get("REQUEST_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("request.json"));

        let default_eta_secs = match get("DEFAULT_ETA_SECS") {
            Some(value) => parse_positive("DEFAULT_ETA_SECS", value)?,
            None => DEFAULT_ETA_SECS,
        };

        let ceiling_multiplier = get("CEILING_MULTIPLIER")
            .map(|value| parse_positive("CEILING_MULTIPLIER", value))
            .transpose()?;

        let output_path = get("OUTPUT_PATH").map(PathBuf::from);

        Ok(Self {
            api_url,
            api_key,
            kind,
            request_path,
            default_eta_secs,
            ceiling_multiplier,
            output_path,
        })
    }

    /// Resolver configuration for the configured kind, with the ceiling
    /// override applied.
    pub fn resolver_configs(&self) -> HashMap<WorkflowKind, ResolverConfig> {
        let mut config = ResolverConfig::for_kind(self.kind);
        if let Some(multiplier) = self.ceiling_multiplier {
            config.ceiling_multiplier = multiplier;
        }
        HashMap::from([(self.kind, config)])
    }
}

fn parse_positive(var: &'static str, value: String) -> Result<f64, ConfigError> {
    match value.parse::<f64>() {
        Ok(n) if n.is_finite() && n > 0.0 => Ok(n),
        Ok(_) => Err(ConfigError::Invalid {
            var,
            value,
            reason: "must be a positive number".into(),
        }),
        Err(e) => Err(ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}
