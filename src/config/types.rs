use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub wordpress: WordPressConfig,

    /// Clients seeded from the config file; registered (upserted) at boot.
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub webhook_security: WebhookSecurityConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Enable authentication for the API
    #[serde(default)]
    pub enabled: bool,

    /// API key for programmatic access (used with Authorization: Bearer header)
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebhookSecurityConfig {
    /// Enable webhook signature verification
    #[serde(default)]
    pub signature_verification: bool,

    /// Shared secret for HMAC-SHA256 signature verification
    #[serde(default)]
    pub signature_secret: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth: AuthConfig::default(),
            webhook_security: WebhookSecurityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "./altsmith.sqlite".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Number of concurrent workers in the pool
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Hours between unattended full sweeps (0 disables the timer)
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// In-run retry budget per job for transient failures
    #[serde(default = "default_job_retries")]
    pub job_retries: u32,

    /// Base delay for in-run retry backoff, in milliseconds
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Ceiling for in-run retry backoff, in milliseconds
    #[serde(default = "default_retry_cap_ms")]
    pub retry_cap_ms: u64,
}

fn default_workers() -> usize {
    4
}
fn default_interval_hours() -> u64 {
    24
}
fn default_job_retries() -> u32 {
    5
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_retry_cap_ms() -> u64 {
    30_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            interval_hours: default_interval_hours(),
            job_retries: default_job_retries(),
            retry_base_ms: default_retry_base_ms(),
            retry_cap_ms: default_retry_cap_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvidersConfig {
    /// Global provider fallback order; a client's `provider_order` overrides it
    #[serde(default = "default_provider_order")]
    pub order: Vec<String>,

    /// Default language for generated metadata (BCP 47 tag)
    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default)]
    pub mistral: MistralConfig,

    #[serde(default)]
    pub huggingface: HuggingFaceConfig,

    #[serde(default)]
    pub ollama: OllamaConfig,
}

fn default_provider_order() -> Vec<String> {
    vec![
        "mistral".to_string(),
        "huggingface".to_string(),
        "ollama".to_string(),
    ]
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            order: default_provider_order(),
            language: default_language(),
            mistral: MistralConfig::default(),
            huggingface: HuggingFaceConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MistralConfig {
    /// API key; the MISTRAL_API_KEY environment variable takes precedence
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_mistral_model")]
    pub model: String,

    /// Requests per minute allowed against the Mistral API
    #[serde(default = "default_provider_rpm")]
    pub requests_per_minute: u32,
}

fn default_mistral_model() -> String {
    "pixtral-12b-2409".to_string()
}

fn default_provider_rpm() -> u32 {
    30
}

impl Default for MistralConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_mistral_model(),
            requests_per_minute: default_provider_rpm(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HuggingFaceConfig {
    /// API key; the HF_API_KEY environment variable takes precedence
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_hf_model")]
    pub model: String,

    #[serde(default = "default_provider_rpm")]
    pub requests_per_minute: u32,
}

fn default_hf_model() -> String {
    "Salesforce/blip-image-captioning-large".to_string()
}

impl Default for HuggingFaceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_hf_model(),
            requests_per_minute: default_provider_rpm(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OllamaConfig {
    /// Base URL of the local inference server; OLLAMA_URL overrides it
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_ollama_model")]
    pub model: String,

    #[serde(default = "default_provider_rpm")]
    pub requests_per_minute: u32,
}

fn default_ollama_model() -> String {
    "llava:13b".to_string()
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: None,
            model: default_ollama_model(),
            requests_per_minute: default_provider_rpm(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WordPressConfig {
    /// Requests per minute allowed against each WordPress site
    #[serde(default = "default_wp_rpm")]
    pub requests_per_minute: u32,

    /// Per-request timeout, in seconds
    #[serde(default = "default_wp_timeout")]
    pub timeout_secs: u64,

    /// Media page size for library listing
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_wp_rpm() -> u32 {
    60
}
fn default_wp_timeout() -> u64 {
    30
}
fn default_page_size() -> u32 {
    100
}

impl Default for WordPressConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_wp_rpm(),
            timeout_secs: default_wp_timeout(),
            page_size: default_page_size(),
        }
    }
}

/// A client seeded from the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    pub id: String,

    pub base_url: String,

    pub username: String,

    pub app_password: String,

    #[serde(default)]
    pub language: Option<String>,

    /// Per-client provider fallback order
    #[serde(default)]
    pub provider_order: Option<Vec<String>>,
}
