use std::path::{Path, PathBuf};

use crate::error::HrmOmeroError;
use crate::hrm::{self, HrmConfig};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/hrm.conf";
pub const DEFAULT_PORT: u16 = 4064;
const DEFAULT_LOG_DIR: &str = "/var/log/hrm";
const LOG_FILE_NAME: &str = "omero-connector.log";
const PASSWORD_ENV: &str = "OMERO_PASSWORD";

/// Connector settings taken from the HRM configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorSettings {
    pub host: String,
    pub port: u16,
    pub web_url: String,
    /// Debug log of the importer, passed as `--errs`.
    pub import_debug_log: Option<PathBuf>,
    pub log_level: Option<String>,
    /// `None` if file logging is disabled.
    pub log_file: Option<PathBuf>,
    pub userdir: Option<PathBuf>,
    pub omero_cli: Option<PathBuf>,
}

impl ConnectorSettings {
    /// Reads and checks the HRM config file at `path`.
    pub fn load(path: &Path) -> Result<Self, HrmOmeroError> {
        let config = hrm::parse_config(path)?;
        hrm::check_config(&config)?;
        Self::from_hrm_config(&config)
    }

    pub fn from_hrm_config(config: &HrmConfig) -> Result<Self, HrmOmeroError> {
        let entry = |key: &str| {
            config
                .get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
        };

        let host = entry("OMERO_HOSTNAME").unwrap_or("localhost").to_string();
        let port = match entry("OMERO_PORT") {
            Some(port) => port.parse().map_err(|_| HrmOmeroError::ConfigSyntax {
                path: PathBuf::from(DEFAULT_CONFIG_PATH),
                line: 0,
                message: format!("OMERO_PORT is not a port number: '{port}'"),
            })?,
            None => DEFAULT_PORT,
        };
        let web_url = entry("OMERO_WEB_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://{host}"));
        let log_file = match entry("OMERO_CONNECTOR_LOGFILE_DISABLED") {
            Some(_) => None,
            None => {
                let log_dir = entry("HRM_LOG").unwrap_or(DEFAULT_LOG_DIR);
                Some(Path::new(log_dir).join(LOG_FILE_NAME))
            }
        };

        Ok(Self {
            host,
            port,
            web_url,
            import_debug_log: entry("OMERO_DEBUG_LOG").map(PathBuf::from),
            log_level: entry("OMERO_CONNECTOR_LOGLEVEL").map(str::to_string),
            log_file,
            userdir: entry("OMERO_USERDIR").map(PathBuf::from),
            omero_cli: entry("OMERO_CLI").map(PathBuf::from),
        })
    }
}

/// The password from the environment, unless the deprecated command line
/// option was given.
pub fn resolve_password(cli_password: Option<String>) -> Result<String, HrmOmeroError> {
    resolve_password_from(cli_password, std::env::var(PASSWORD_ENV).ok())
}

pub fn resolve_password_from(
    cli_password: Option<String>,
    env_password: Option<String>,
) -> Result<String, HrmOmeroError> {
    let password = match cli_password.filter(|value| !value.is_empty()) {
        Some(password) => {
            tracing::warn!("Using the '--password' parameter is deprecated!");
            Some(password)
        }
        None => {
            tracing::debug!("Using password from environment.");
            env_password
        }
    };
    password
        .filter(|value| !value.is_empty())
        .ok_or(HrmOmeroError::MissingPassword)
}
