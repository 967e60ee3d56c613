use std::fmt;
use std::path::Path;

use crate::error::ConfigError;

/// FieldClimate HMAC key pair
#[derive(Clone)]
pub struct ApiKeys {
    pub public_key: String,
    pub private_key: String,
}

impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeys")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Read a single key from a file, trimming surrounding whitespace.
pub fn read_key_file(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::KeyFile(path.to_path_buf(), e.to_string()))?;
    let key = content.trim();
    if key.is_empty() {
        return Err(ConfigError::KeyFile(
            path.to_path_buf(),
            "file is empty".to_string(),
        ));
    }
    Ok(key.to_string())
}

/// Load the public/private key pair from their key files
pub fn load_api_keys(public_key_path: &Path, private_key_path: &Path) -> Result<ApiKeys, ConfigError> {
    Ok(ApiKeys {
        public_key: read_key_file(public_key_path)?,
        private_key: read_key_file(private_key_path)?,
    })
}
