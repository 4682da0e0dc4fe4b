use std::path::PathBuf;

use anyhow::{Context, Result};

const DEFAULT_BROWSER_API_BASE_URL: &str = "https://browser-api.browser.cash/v1/consumer";
const DEFAULT_AGENT_API_BASE_URL: &str = "https://agent-api.browser.cash";
const DEFAULT_CDP_HOST: &str = "gcp-usc1-1.milan-taurine.tera.space";

/// Application configuration loaded from environment variables.
/// Holds only secrets and endpoints; run tunables come from the CLI.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Automation backend
    pub browser_api_key: String,
    pub browser_api_base_url: String,
    pub cdp_host: String,

    // Classification backend
    pub agent_api_key: String,
    pub agent_api_base_url: String,

    // Output
    pub data_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            browser_api_key: required("BROWSER_API_KEY")?,
            browser_api_base_url: std::env::var("BROWSER_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BROWSER_API_BASE_URL.to_string()),
            cdp_host: std::env::var("CDP_HOST").unwrap_or_else(|_| DEFAULT_CDP_HOST.to_string()),
            agent_api_key: required("AGENT_API_KEY")?,
            agent_api_base_url: std::env::var("AGENT_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_AGENT_API_BASE_URL.to_string()),
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
        };

        config.log_keys();
        Ok(config)
    }

    /// Base URL of the DevTools proxy, derived from `CDP_HOST`.
    pub fn cdp_base_url(&self) -> String {
        if self.cdp_host.starts_with("http://") || self.cdp_host.starts_with("https://") {
            self.cdp_host.clone()
        } else {
            format!("https://{}", self.cdp_host)
        }
    }

    /// Default output document path inside the data directory.
    pub fn default_output_path(&self) -> PathBuf {
        self.data_dir.join("scraped_posts.json")
    }

    fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let n = val.char_indices().nth(5).map(|(i, _)| i).unwrap_or(val.len());
            format!("{}...({} chars)", &val[..n], val.len())
        }

        tracing::info!("Config loaded:");
        tracing::info!("  BROWSER_API_KEY: {}", preview(&self.browser_api_key));
        tracing::info!("  AGENT_API_KEY: {}", preview(&self.agent_api_key));
        tracing::info!("  BROWSER_API_BASE_URL: {}", self.browser_api_base_url);
        tracing::info!("  AGENT_API_BASE_URL: {}", self.agent_api_base_url);
        tracing::info!("  CDP_HOST: {}", self.cdp_host);
        tracing::info!("  DATA_DIR: {}", self.data_dir.display());
    }
}

fn required(key: &str) -> Result<String> {
    let value = std::env::var(key).with_context(|| format!("{key} environment variable is required"))?;
    if value.trim().is_empty() {
        anyhow::bail!("{key} environment variable is empty");
    }
    Ok(value)
}
