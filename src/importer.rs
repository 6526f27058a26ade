use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;

use crate::error::HrmOmeroError;

#[derive(Debug, Clone)]
pub struct ImportRequest<'a> {
    pub dataset_id: i64,
    pub file: &'a Path,
    pub debug_log: Option<&'a Path>,
    /// Where the importer writes its YAML summary.
    pub capture: &'a Path,
    pub session_key: Option<String>,
}

pub trait Importer: Send + Sync {
    fn import(&self, request: &ImportRequest<'_>) -> Result<(), HrmOmeroError>;

    /// Human-readable form of the call, for diagnostics after a failure.
    fn describe(&self, request: &ImportRequest<'_>) -> String {
        format!("dataset={} file={}", request.dataset_id, request.file.display())
    }
}

/// Runs `omero import` as a child process.
#[derive(Debug, Clone)]
pub struct OmeroCliImporter {
    program: PathBuf,
    host: String,
    port: u16,
    userdir: Option<PathBuf>,
}

impl OmeroCliImporter {
    pub fn new(program: Option<PathBuf>, host: &str, port: u16, userdir: Option<PathBuf>) -> Self {
        let program = program
            .or_else(|| find_in_path("omero"))
            .unwrap_or_else(|| PathBuf::from("omero"));
        Self {
            program,
            host: host.to_string(),
            port,
            userdir,
        }
    }

    pub fn import_args(&self, request: &ImportRequest<'_>) -> Vec<String> {
        let mut args = vec![
            "import".to_string(),
            "-s".to_string(),
            self.host.clone(),
            "-p".to_string(),
            self.port.to_string(),
        ];
        if let Some(key) = &request.session_key {
            args.push("-k".to_string());
            args.push(key.clone());
        }
        // the upgrade check needs outbound access and breaks on some TLS setups
        args.extend(["--skip".to_string(), "upgrade".to_string()]);
        if let Some(debug_log) = request.debug_log {
            args.extend([
                "--debug".to_string(),
                "ALL".to_string(),
                "--errs".to_string(),
                debug_log.to_string_lossy().to_string(),
            ]);
        }
        args.extend([
            "-d".to_string(),
            request.dataset_id.to_string(),
            "--file".to_string(),
            request.capture.to_string_lossy().to_string(),
            "--output".to_string(),
            "yaml".to_string(),
            request.file.to_string_lossy().to_string(),
        ]);
        args
    }

    fn userdir_display(&self) -> String {
        self.userdir
            .as_ref()
            .map(|dir| dir.display().to_string())
            .or_else(|| std::env::var("OMERO_USERDIR").ok())
            .unwrap_or_else(|| "<not-set>".to_string())
    }
}

impl Importer for OmeroCliImporter {
    fn import(&self, request: &ImportRequest<'_>) -> Result<(), HrmOmeroError> {
        let args = self.import_args(request);
        tracing::debug!(program = %self.program.display(), "import_args: {:?}", redact(&args));

        let mut cmd = Command::new(&self.program);
        cmd.args(&args);
        if let Some(userdir) = &self.userdir {
            cmd.env("OMERO_USERDIR", userdir);
        }
        let output = cmd
            .output()
            .map_err(|err| HrmOmeroError::Import(format!("{}: {err}", self.program.display())))?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_userdir_permission_error(&stderr, self.userdir.as_deref()) {
            return Err(HrmOmeroError::ImportPermission {
                userdir: self.userdir_display(),
            });
        }
        let message = if stderr.is_empty() {
            format!("command failed: {} ({})", self.program.display(), output.status)
        } else {
            last_lines(&stderr, 5)
        };
        Err(HrmOmeroError::Import(message))
    }

    fn describe(&self, request: &ImportRequest<'_>) -> String {
        format!("{:?}", redact(&self.import_args(request)))
    }
}

#[derive(Debug, Deserialize)]
struct ImportSummary {
    #[serde(rename = "Image", default)]
    image: Vec<i64>,
}

/// Reads the YAML summary written by `omero import --output yaml` and returns
/// the id of the single imported image.
pub fn extract_image_id(path: &Path) -> Option<i64> {
    match parse_image_id(path) {
        Ok(id) => {
            tracing::info!(outcome = "success", "Successfully parsed Image ID from YAML: {id}");
            Some(id)
        }
        Err(message) => {
            tracing::error!("Error parsing imported image ID from YAML output: {message}");
            None
        }
    }
}

fn parse_image_id(path: &Path) -> Result<i64, String> {
    let content = fs::read_to_string(path).map_err(|err| err.to_string())?;
    let parsed: Vec<ImportSummary> =
        serde_yaml::from_str(&content).map_err(|err| err.to_string())?;
    let first = parsed
        .first()
        .ok_or_else(|| "empty import summary".to_string())?;
    match first.image.as_slice() {
        [id] => Ok(*id),
        ids => {
            let message = format!("Unexpected YAML retrieved from OMERO, unable to parse: {ids:?}");
            tracing::warn!("{message}");
            Err(message)
        }
    }
}

/// Paths of the default user directory (`~/omero`) and its cache.
const DEFAULT_USERDIR_MARKERS: [&str; 5] = [
    "OMERO_USERDIR",
    "/omero/tmp",
    "/omero/sessions",
    "/omero/cache",
    "/.omero",
];

/// A permission failure on the user directory, as opposed to an unreadable
/// image or debug log.
fn is_userdir_permission_error(stderr: &str, userdir: Option<&Path>) -> bool {
    let configured = userdir.map(|dir| dir.to_string_lossy().to_string());
    stderr
        .lines()
        .filter(|line| line.contains("PermissionError") || line.contains("Permission denied"))
        .any(|line| {
            configured
                .as_deref()
                .is_some_and(|dir| !dir.is_empty() && line.contains(dir))
                || DEFAULT_USERDIR_MARKERS
                    .iter()
                    .any(|marker| line.contains(marker))
        })
}

fn last_lines(text: &str, count: usize) -> String {
    let lines = text.lines().collect::<Vec<_>>();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

fn redact(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for arg in args {
        if hide_next {
            out.push("********".to_string());
            hide_next = false;
            continue;
        }
        hide_next = arg == "-k";
        out.push(arg.clone());
    }
    out
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.exists())
}
