mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    apply_env_overrides(&mut config);

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./config.toml",
        "./altsmith.toml",
        "~/.config/altsmith/config.toml",
        "/etc/altsmith/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    // Return default config if no file found
    let mut config = Config::default();
    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

/// Environment variables trump the config file, so secrets can stay out of it.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(key) = std::env::var("MISTRAL_API_KEY") {
        if !key.is_empty() {
            config.providers.mistral.api_key = Some(key);
        }
    }
    if let Ok(key) = std::env::var("HF_API_KEY") {
        if !key.is_empty() {
            config.providers.huggingface.api_key = Some(key);
        }
    }
    if let Ok(url) = std::env::var("OLLAMA_URL") {
        if !url.is_empty() {
            config.providers.ollama.url = Some(url);
        }
    }
    if let Ok(secret) = std::env::var("ALTSMITH_WEBHOOK_SECRET") {
        if !secret.is_empty() {
            config.server.webhook_security.signature_secret = Some(secret);
        }
    }
}

/// Provider names the router knows how to construct.
pub const KNOWN_PROVIDERS: [&str; 3] = ["mistral", "huggingface", "ollama"];

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.scheduler.workers == 0 {
        anyhow::bail!("Scheduler must have at least one worker");
    }

    if config.server.auth.enabled && config.server.auth.api_key.is_none() {
        anyhow::bail!("Auth is enabled but no API key is configured");
    }

    if config.server.webhook_security.signature_verification
        && config.server.webhook_security.signature_secret.is_none()
    {
        anyhow::bail!("Webhook signature verification is enabled but no secret is configured");
    }

    let known = KNOWN_PROVIDERS;
    for name in &config.providers.order {
        if !known.contains(&name.as_str()) {
            anyhow::bail!("Unknown provider '{}' in provider order", name);
        }
    }

    for client in &config.clients {
        altsmith_common::ClientId::parse(&client.id)
            .map_err(|e| anyhow::anyhow!("Client '{}': {}", client.id, e))?;
        if client.id == "all" {
            anyhow::bail!("Client ID 'all' is reserved");
        }
        if client.base_url.is_empty() || client.app_password.is_empty() {
            anyhow::bail!("Client '{}' needs base_url and app_password", client.id);
        }
        if let Some(order) = &client.provider_order {
            for name in order {
                if !known.contains(&name.as_str()) {
                    anyhow::bail!("Client '{}': unknown provider '{}'", client.id, name);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.scheduler.workers, 4);
        assert_eq!(config.scheduler.interval_hours, 24);
        assert_eq!(config.providers.order, vec!["mistral", "huggingface", "ollama"]);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [server.webhook_security]
            signature_verification = true
            signature_secret = "topsecret"

            [scheduler]
            workers = 2
            interval_hours = 12

            [providers]
            order = ["ollama"]
            language = "de"

            [providers.ollama]
            url = "http://localhost:11434"
            model = "llava:7b"

            [[clients]]
            id = "acme"
            base_url = "https://acme.example"
            username = "seo-bot"
            app_password = "xxxx yyyy"
            language = "de"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        validate_config(&config).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.scheduler.workers, 2);
        assert_eq!(config.providers.order, vec!["ollama"]);
        assert_eq!(
            config.providers.ollama.url.as_deref(),
            Some("http://localhost:11434")
        );
        assert_eq!(config.clients.len(), 1);
        assert_eq!(config.clients[0].language.as_deref(), Some("de"));
    }

    #[test]
    fn rejects_reserved_client_id() {
        let toml = r#"
            [[clients]]
            id = "all"
            base_url = "https://acme.example"
            username = "bot"
            app_password = "pw"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_unknown_provider() {
        let toml = r#"
            [providers]
            order = ["gpt9"]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_auth_without_key() {
        let toml = r#"
            [server.auth]
            enabled = true
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [server]
            port = 9100

            [database]
            path = "/tmp/altsmith-test.sqlite"
            "#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.database.path, "/tmp/altsmith-test.sqlite");
    }

    #[test]
    fn load_config_missing_file_errors() {
        let err = load_config(Path::new("/nonexistent/altsmith.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    #[serial_test::serial]
    fn env_overrides_provider_secrets() {
        std::env::set_var("MISTRAL_API_KEY", "env-mistral-key");
        std::env::set_var("OLLAMA_URL", "http://ollama.internal:11434");

        let mut config = Config::default();
        apply_env_overrides(&mut config);

        assert_eq!(
            config.providers.mistral.api_key.as_deref(),
            Some("env-mistral-key")
        );
        assert_eq!(
            config.providers.ollama.url.as_deref(),
            Some("http://ollama.internal:11434")
        );

        std::env::remove_var("MISTRAL_API_KEY");
        std::env::remove_var("OLLAMA_URL");
    }

    #[test]
    #[serial_test::serial]
    fn env_override_ignores_empty_values() {
        std::env::set_var("HF_API_KEY", "");

        let mut config = Config::default();
        apply_env_overrides(&mut config);
        assert!(config.providers.huggingface.api_key.is_none());

        std::env::remove_var("HF_API_KEY");
    }
}
