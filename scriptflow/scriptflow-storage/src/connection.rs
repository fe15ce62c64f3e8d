//! Connection configuration and setup for SurrealDB.

use scriptflow_core::config::DatabaseConfig;
use scriptflow_core::error::{Result, ScriptflowError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use tracing::{debug, info};

/// Connection mode for SurrealDB
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionMode {
    /// In-memory database (tests and throwaway runs)
    Memory,
    /// Embedded SurrealKV file storage
    File { path: PathBuf },
    /// Remote server
    Remote { endpoint: String },
}

/// Configuration for a SurrealDB connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub mode: ConnectionMode,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConnectionConfig {
    /// Create a new in-memory configuration
    pub fn memory() -> Self {
        Self {
            mode: ConnectionMode::Memory,
            namespace: "scriptflow".to_string(),
            database: "main".to_string(),
            username: None,
            password: None,
        }
    }

    /// Build from the `[database]` configuration section
    pub fn from_database_config(config: &DatabaseConfig) -> Result<Self> {
        let mode = match config.mode.as_str() {
            "memory" => ConnectionMode::Memory,
            "file" => ConnectionMode::File {
                path: config
                    .path
                    .clone()
                    .ok_or_else(|| ScriptflowError::config("File mode requires database.path"))?,
            },
            "remote" => ConnectionMode::Remote {
                endpoint: config
                    .url
                    .clone()
                    .ok_or_else(|| ScriptflowError::config("Remote mode requires database.url"))?,
            },
            other => {
                return Err(ScriptflowError::config(format!("Unknown database mode '{}'", other)));
            }
        };

        Ok(Self {
            mode,
            namespace: config.namespace.clone(),
            database: config.database.clone(),
            username: config.username.clone().filter(|u| !u.is_empty()),
            password: config.password.clone().filter(|p| !p.is_empty()),
        })
    }

    /// Get the connection string for SurrealDB
    pub fn connection_string(&self) -> Result<String> {
        match &self.mode {
            ConnectionMode::Memory => Ok("mem://".to_string()),
            ConnectionMode::File { path } => {
                let path_str = path
                    .to_str()
                    .ok_or_else(|| ScriptflowError::config("Invalid path for file storage"))?;
                Ok(format!("surrealkv://{}", path_str))
            }
            ConnectionMode::Remote { endpoint } => Ok(endpoint.clone()),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(ScriptflowError::config("Namespace cannot be empty"));
        }
        if self.database.is_empty() {
            return Err(ScriptflowError::config("Database name cannot be empty"));
        }
        Ok(())
    }

    /// Open a connection, select namespace/database and sign in when
    /// credentials are configured
    pub async fn connect(&self) -> Result<Surreal<Any>> {
        self.validate()?;
        let conn_str = self.connection_string()?;

        debug!("Connecting to SurrealDB: {}", conn_str);

        let db = surrealdb::engine::any::connect(conn_str)
            .await
            .map_err(|e| ScriptflowError::database(format!("Failed to connect: {}", e)))?;

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            db.signin(surrealdb::opt::auth::Root {
                username,
                password,
            })
            .await
            .map_err(|e| ScriptflowError::database(format!("Authentication failed: {}", e)))?;
        }

        db.use_ns(&self.namespace)
            .use_db(&self.database)
            .await
            .map_err(|e| {
                ScriptflowError::database(format!("Failed to use namespace/database: {}", e))
            })?;

        info!(
            "Connected to SurrealDB namespace '{}' database '{}'",
            self.namespace, self.database
        );
        Ok(db)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_config() {
        let config = ConnectionConfig::memory();
        assert_eq!(config.mode, ConnectionMode::Memory);
        assert_eq!(config.namespace, "scriptflow");
        assert_eq!(config.database, "main");
    }

    #[test]
    fn test_connection_string() {
        let config = ConnectionConfig::memory();
        assert_eq!(config.connection_string().unwrap(), "mem://");

        let config = ConnectionConfig {
            mode: ConnectionMode::File {
                path: PathBuf::from("/tmp/scriptflow.db"),
            },
            ..ConnectionConfig::memory()
        };
        assert_eq!(
            config.connection_string().unwrap(),
            "surrealkv:///tmp/scriptflow.db"
        );
    }

    #[test]
    fn test_from_database_config() {
        let mut section = DatabaseConfig::default();
        assert_eq!(
            ConnectionConfig::from_database_config(&section).unwrap().mode,
            ConnectionMode::Memory
        );

        section.mode = "remote".into();
        assert!(ConnectionConfig::from_database_config(&section).is_err());

        section.url = Some("ws://localhost:8000".into());
        section.username = Some(String::new());
        let config = ConnectionConfig::from_database_config(&section).unwrap();
        assert_eq!(
            config.mode,
            ConnectionMode::Remote {
                endpoint: "ws://localhost:8000".into()
            }
        );
        assert!(config.username.is_none());
    }

    #[test]
    fn test_validation() {
        let mut config = ConnectionConfig::memory();
        assert!(config.validate().is_ok());
        config.namespace = String::new();
        assert!(config.validate().is_err());
    }
}
