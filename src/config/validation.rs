use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_http_config(config)?;
    validate_provider(config)?;
    validate_generation(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_http_config(config: &AppConfig) -> Result<(), ConfigError> {
    let http = &config.http;
    if http.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "http.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if http.timeout == 0 {
        return Err(validation_err("http.timeout must be greater than 0"));
    }
    if http.connect_timeout == 0 {
        return Err(validation_err(
            "http.connect_timeout must be greater than 0",
        ));
    }
    Ok(())
}

const VALID_PROVIDERS: &[&str] = &["cloudflare"];

fn validate_provider(config: &AppConfig) -> Result<(), ConfigError> {
    let provider = &config.provider;
    if !VALID_PROVIDERS.contains(&provider.name.as_str()) {
        return Err(validation_err(format!(
            "unknown provider '{}'. Must be one of: {}",
            provider.name,
            VALID_PROVIDERS.join(", ")
        )));
    }
    let parsed = url::Url::parse(&provider.base_url)
        .map_err(|err| validation_err(format!("provider.base_url is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(
            "provider.base_url must start with http:// or https://",
        ));
    }
    if provider.api_key.trim().is_empty() {
        return Err(validation_err("provider.api_key cannot be empty"));
    }
    if provider.default_text_model.trim().is_empty() {
        return Err(validation_err("provider.default_text_model cannot be empty"));
    }
    if provider.default_image_model.trim().is_empty() {
        return Err(validation_err(
            "provider.default_image_model cannot be empty",
        ));
    }
    validate_proxy_url(provider.proxy.as_deref())
}

fn validate_proxy_url(proxy: Option<&str>) -> Result<(), ConfigError> {
    let Some(proxy) = proxy.map(str::trim) else {
        return Ok(());
    };
    if proxy.is_empty() {
        return Err(validation_err("provider.proxy cannot be empty when set"));
    }
    let parsed = url::Url::parse(proxy)
        .map_err(|err| validation_err(format!("provider.proxy is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(
            "provider.proxy must use http:// or https://",
        ));
    }
    Ok(())
}

fn validate_generation(config: &AppConfig) -> Result<(), ConfigError> {
    if config.generation.max_tokens == 0 {
        return Err(validation_err(
            "generation.max_tokens must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
