//! Configuration loading
//!
//! The four backend settings are read once, from the process environment
//! layered over optional env files:
//!
//! ```text
//! process env  >  .env.local  >  .env
//! ```
//!
//! Nothing touches the network until [`Config::load`] has succeeded.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Base URL of the management API, e.g. `https://fra.cloud.appwrite.io/v1`
pub const ENDPOINT_VAR: &str = "APPWRITE_ENDPOINT";
/// Project the API key belongs to
pub const PROJECT_ID_VAR: &str = "NEXT_PUBLIC_APPWRITE_PROJECT_ID";
/// Database holding the site's collections
pub const DATABASE_ID_VAR: &str = "NEXT_PUBLIC_APPWRITE_DATABASE_ID";
/// Privileged server key
pub const API_KEY_VAR: &str = "APPWRITE_API_KEY";

/// Env files read when none are given on the command line
pub const DEFAULT_ENV_FILES: &[&str] = &[".env.local", ".env"];

/// Layered view over the process environment and env files
#[derive(Debug, Default)]
pub struct Environment {
    process: HashMap<String, String>,
    files: HashMap<String, String>,
}

impl Environment {
    /// Capture the process environment and read the given env files.
    ///
    /// Files that do not exist are skipped. Earlier files take precedence
    /// over later ones; the process environment takes precedence over all.
    pub fn load(files: &[PathBuf]) -> Result<Self> {
        let mut env = Self {
            process: std::env::vars().collect(),
            files: HashMap::new(),
        };
        for path in files {
            env.read_file(path)?;
        }
        Ok(env)
    }

    /// Build an environment from explicit pairs, ignoring the process
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            process: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            files: HashMap::new(),
        }
    }

    /// Merge an env file without overriding values already present
    pub fn read_file(&mut self, path: &Path) -> Result<bool> {
        let entries = match dotenvy::from_path_iter(path) {
            Ok(entries) => entries,
            Err(e) if e.not_found() => return Ok(false),
            Err(source) => return Err(env_file_error(path, source)),
        };

        tracing::debug!("Loading env file {:?}", path);
        for entry in entries {
            let (key, value) = entry.map_err(|source| env_file_error(path, source))?;
            self.files.entry(key).or_insert(value);
        }
        Ok(true)
    }

    /// Look up a variable; blank values are treated as unset
    pub fn get(&self, name: &str) -> Option<&str> {
        self.process
            .get(name)
            .or_else(|| self.files.get(name))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

fn env_file_error(path: &Path, source: dotenvy::Error) -> Error {
    Error::EnvFile {
        path: path.to_path_buf(),
        source,
    }
}

/// Backend connection settings
#[derive(Clone)]
pub struct Config {
    pub endpoint: String,
    pub project_id: String,
    pub database_id: String,
    pub api_key: String,
}

impl Config {
    /// Resolve all required settings, failing with every missing name at once
    pub fn load(env: &Environment) -> Result<Self> {
        let mut missing = Vec::new();
        let mut require = |name: &str| match env.get(name) {
            Some(value) => value.to_string(),
            None => {
                missing.push(name.to_string());
                String::new()
            }
        };

        let config = Self {
            endpoint: require(ENDPOINT_VAR),
            project_id: require(PROJECT_ID_VAR),
            database_id: require(DATABASE_ID_VAR),
            api_key: require(API_KEY_VAR),
        };

        if !missing.is_empty() {
            return Err(Error::Configuration { missing });
        }

        Ok(config)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("endpoint", &self.endpoint)
            .field("project_id", &self.project_id)
            .field("database_id", &self.database_id)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Polls of a freshly created attribute before backfilling anyway
pub const DEFAULT_AVAILABILITY_POLLS: u32 = 10;
/// Delay between availability polls, in milliseconds
pub const DEFAULT_AVAILABILITY_INTERVAL_MS: u64 = 500;

/// Tuning for a reconciliation run
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// How many times to poll a freshly created attribute before backfilling
    pub availability_polls: u32,
    /// Delay between polls
    pub availability_interval: Duration,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            availability_polls: DEFAULT_AVAILABILITY_POLLS,
            availability_interval: Duration::from_millis(DEFAULT_AVAILABILITY_INTERVAL_MS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn full_env() -> Vec<(&'static str, &'static str)> {
        vec![
            (ENDPOINT_VAR, "https://backend.example/v1"),
            (PROJECT_ID_VAR, "portfolio"),
            (DATABASE_ID_VAR, "site"),
            (API_KEY_VAR, "secret"),
        ]
    }

    #[test]
    fn test_load_complete_config() {
        let config = Config::load(&Environment::from_pairs(full_env())).unwrap();
        assert_eq!(config.endpoint, "https://backend.example/v1");
        assert_eq!(config.database_id, "site");
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[test]
    fn test_missing_variables_are_enumerated() {
        let env = Environment::from_pairs(vec![
            (ENDPOINT_VAR, "https://backend.example/v1"),
            (DATABASE_ID_VAR, "site"),
        ]);
        match Config::load(&env) {
            Err(Error::Configuration { missing }) => {
                assert_eq!(missing, vec![PROJECT_ID_VAR, API_KEY_VAR]);
            }
            other => panic!("Expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut pairs = full_env();
        pairs[3] = (API_KEY_VAR, "   ");
        let err = Config::load(&Environment::from_pairs(pairs)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required environment variables: APPWRITE_API_KEY"
        );
    }

    fn write_env(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::File::create(&path)
            .unwrap()
            .write_all(content.as_bytes())
            .unwrap();
        path
    }

    #[test]
    fn test_env_file_syntax() {
        let tmp = TempDir::new().unwrap();
        let path = write_env(
            &tmp,
            ".env",
            "# backend\nexport APPWRITE_ENDPOINT=\"https://x/v1\"\nAPPWRITE_API_KEY=\"secret\" # prod key\nNEXT_PUBLIC_APPWRITE_PROJECT_ID='k=1'\nNEXT_PUBLIC_APPWRITE_DATABASE_ID=site # prod\n",
        );

        let mut env = Environment::default();
        assert!(env.read_file(&path).unwrap());

        assert_eq!(env.get(ENDPOINT_VAR), Some("https://x/v1"));
        assert_eq!(env.get(API_KEY_VAR), Some("secret"));
        assert_eq!(env.get(PROJECT_ID_VAR), Some("k=1"));
        assert_eq!(env.get(DATABASE_ID_VAR), Some("site"));
    }

    #[test]
    fn test_malformed_env_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = write_env(&tmp, ".env", "APPWRITE_API_KEY=two words\n");

        let mut env = Environment::default();
        assert!(matches!(
            env.read_file(&path),
            Err(Error::EnvFile { .. })
        ));
    }

    #[test]
    fn test_env_file_precedence() {
        let tmp = TempDir::new().unwrap();
        let local = write_env(&tmp, ".env.local", &format!("{}=local\n", DATABASE_ID_VAR));
        let shared = write_env(
            &tmp,
            ".env",
            &format!("{}=shared\n{}=from-file\n", DATABASE_ID_VAR, PROJECT_ID_VAR),
        );

        let mut env = Environment::from_pairs(vec![(PROJECT_ID_VAR, "from-process")]);
        assert!(env.read_file(&local).unwrap());
        assert!(env.read_file(&shared).unwrap());
        assert!(!env.read_file(&tmp.path().join("missing.env")).unwrap());

        assert_eq!(env.get(DATABASE_ID_VAR), Some("local"));
        assert_eq!(env.get(PROJECT_ID_VAR), Some("from-process"));
    }
}
