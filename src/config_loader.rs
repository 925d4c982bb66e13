use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use http::{HeaderName, HeaderValue, header};
use tracing::warn;
use url::Url;

use crate::error::ConfigError;
use crate::pool_registry::{PoolConfig, PoolRegistry, WeightedDomain};

/// Encoding of a pool config document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    /// YAML for `.yaml`/`.yml`, JSON for everything else
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                ConfigFormat::Yaml
            }
            _ => ConfigFormat::Json,
        }
    }
}

/// Loads and validates the pool registry from a config file
pub fn load_registry_from_file(path: impl AsRef<Path>) -> Result<Arc<PoolRegistry>, ConfigError> {
    let path = path.as_ref();
    let raw = fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse_registry(&raw, ConfigFormat::from_path(path))
}

/// Parses and validates a pool registry from raw bytes
pub fn parse_registry(raw: &[u8], format: ConfigFormat) -> Result<Arc<PoolRegistry>, ConfigError> {
    let pools: HashMap<String, PoolConfig> = match format {
        ConfigFormat::Json => serde_json::from_slice(raw)?,
        ConfigFormat::Yaml => serde_yaml::from_slice(raw)?,
    };

    for (pool_id, pool) in &pools {
        validate_pool(pool_id, pool)?;
    }

    Ok(PoolRegistry::new(pools))
}

/// Headers the redirect response sets itself
const RESERVED_HEADERS: [HeaderName; 3] = [
    header::LOCATION,
    header::CONTENT_LENGTH,
    header::CONTENT_TYPE,
];

fn validate_pool(pool_id: &str, pool: &PoolConfig) -> Result<(), ConfigError> {
    for list in pool.domain_lists() {
        let mut total: u64 = 0;
        for candidate in list {
            validate_domain(pool_id, candidate)?;
            total = total
                .checked_add(candidate.weight)
                .ok_or_else(|| ConfigError::WeightOverflow {
                    pool: pool_id.to_string(),
                })?;
        }

        if total == 0 {
            warn!("Pool {pool_id} has a domain list with no positive weight; matching requests will fail");
        }
    }

    for (name, value) in &pool.custom_headers {
        let valid = HeaderName::from_bytes(name.as_bytes())
            .is_ok_and(|name| !RESERVED_HEADERS.contains(&name))
            && HeaderValue::from_str(value).is_ok();
        if !valid {
            return Err(ConfigError::InvalidHeader {
                pool: pool_id.to_string(),
                name: name.clone(),
            });
        }
    }

    Ok(())
}

/// Domains must be a bare host, optionally with a port
fn validate_domain(pool_id: &str, candidate: &WeightedDomain) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidDomain {
        pool: pool_id.to_string(),
        domain: candidate.domain.clone(),
        reason: reason.to_string(),
    };

    if candidate.domain.is_empty() {
        return Err(invalid("empty domain"));
    }
    // Url::parse drops tabs and newlines instead of rejecting them
    if candidate
        .domain
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(invalid("domain must not contain whitespace or control characters"));
    }

    let url = Url::parse(&format!("https://{}/", candidate.domain))
        .map_err(|e| invalid(&e.to_string()))?;

    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("domain must not carry a path, query or fragment"));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(invalid("domain must not carry credentials"));
    }
    if HeaderValue::try_from(format!("https://{}/", candidate.domain)).is_err() {
        return Err(invalid("domain is not valid in a Location header"));
    }

    Ok(())
}
