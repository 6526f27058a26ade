use std::path::PathBuf;

use crate::domain::OmeroId;
use crate::error::HrmOmeroError;
use crate::gateway::OmeroGateway;
use crate::importer::Importer;
use crate::output::{JsonOutput, Reporter};
use crate::transfer;
use crate::tree;

/// One connector invocation as requested by the HRM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    CheckCredentials,
    RetrieveChildren {
        id: String,
    },
    OmeroToHrm {
        image_id: String,
        dest: PathBuf,
    },
    HrmToOmero {
        dataset_id: String,
        file: PathBuf,
        name: Option<String>,
        annotation: Option<String>,
    },
}

impl Action {
    /// Name of the operation, as shown by a dry run.
    pub fn operation(&self) -> &'static str {
        match self {
            Action::CheckCredentials => "check_credentials",
            Action::RetrieveChildren { .. } => "print_children_json",
            Action::OmeroToHrm { .. } => "download",
            Action::HrmToOmero { .. } => "upload",
        }
    }

    pub fn parameters(&self) -> Vec<(&'static str, String)> {
        match self {
            Action::CheckCredentials => Vec::new(),
            Action::RetrieveChildren { id } => vec![("omero_id", id.clone())],
            Action::OmeroToHrm { image_id, dest } => vec![
                ("id_str", image_id.clone()),
                ("dest", dest.display().to_string()),
            ],
            Action::HrmToOmero {
                dataset_id, file, ..
            } => vec![
                ("id_str", dataset_id.clone()),
                ("image_file", file.display().to_string()),
            ],
        }
    }
}

pub fn bool_to_exitstatus(value: bool) -> u8 {
    if value { 0 } else { 1 }
}

pub struct App<G: OmeroGateway, I: Importer> {
    gateway: G,
    importer: I,
    user: String,
    import_debug_log: Option<PathBuf>,
}

impl<G: OmeroGateway, I: Importer> App<G, I> {
    pub fn new(gateway: G, importer: I, user: impl Into<String>) -> Self {
        Self {
            gateway,
            importer,
            user: user.into(),
            import_debug_log: None,
        }
    }

    pub fn with_import_debug_log(mut self, path: Option<PathBuf>) -> Self {
        self.import_debug_log = path;
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Runs `action` and closes the connection afterwards, whatever the outcome.
    pub fn run(
        &self,
        action: &Action,
        dry_run: bool,
        reporter: &dyn Reporter,
    ) -> Result<bool, HrmOmeroError> {
        let result = if dry_run {
            self.dry_run(action, reporter)
        } else {
            self.dispatch(action, reporter)
        };
        self.gateway.close();
        tracing::info!("Closed OMERO connection [user={}].", self.user);
        result
    }

    fn dry_run(&self, action: &Action, reporter: &dyn Reporter) -> Result<bool, HrmOmeroError> {
        // malformed ids are still rejected
        if let Some(id) = action_id(action) {
            id.parse::<OmeroId>()?;
        }
        reporter.info("*** dry-run, only showing action and parameters ***");
        reporter.info(&format!("function: {}", action.operation()));
        for (key, value) in action.parameters() {
            reporter.info(&format!("{key}: [{value}]"));
        }
        Ok(true)
    }

    fn dispatch(&self, action: &Action, reporter: &dyn Reporter) -> Result<bool, HrmOmeroError> {
        tracing::trace!("{}", action.operation());
        match action {
            Action::CheckCredentials => self.check_credentials(reporter),
            Action::RetrieveChildren { id } => {
                let id: OmeroId = id.parse()?;
                let children = tree::retrieve_children(&self.gateway, &id)?;
                JsonOutput::print_json(&children)
                    .map_err(|err| HrmOmeroError::Filesystem(err.to_string()))?;
                Ok(true)
            }
            Action::OmeroToHrm { image_id, dest } => {
                let id: OmeroId = image_id.parse()?;
                transfer::download(&self.gateway, &id, dest, reporter)
            }
            Action::HrmToOmero {
                dataset_id,
                file,
                name,
                annotation,
            } => {
                if name.is_some() || annotation.is_some() {
                    tracing::debug!("Ignoring deprecated '--name' / '--ann' parameters.");
                }
                let id: OmeroId = dataset_id.parse()?;
                transfer::upload(
                    &self.gateway,
                    &self.importer,
                    &id,
                    file,
                    self.import_debug_log.as_deref(),
                    reporter,
                )
            }
        }
    }

    /// Tries to log in and prints the outcome.
    pub fn check_credentials(&self, reporter: &dyn Reporter) -> Result<bool, HrmOmeroError> {
        tracing::debug!("Trying to connect to OMERO...");
        let connected = match self.gateway.connect() {
            Ok(connected) => connected,
            Err(err) => {
                tracing::error!("Connecting to OMERO failed: {err}");
                false
            }
        };
        if !connected {
            reporter.warn("ERROR logging into OMERO.");
            return Ok(false);
        }
        let uid = self.gateway.current_user()?.id;
        reporter.success(&format!("Success logging into OMERO with user ID {uid}"));
        Ok(true)
    }
}

fn action_id(action: &Action) -> Option<&str> {
    match action {
        Action::CheckCredentials => None,
        Action::RetrieveChildren { id } => Some(id),
        Action::OmeroToHrm { image_id, .. } => Some(image_id),
        Action::HrmToOmero { dataset_id, .. } => Some(dataset_id),
    }
}
