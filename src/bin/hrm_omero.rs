use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};

use hrm_omero::app::{Action, App, bool_to_exitstatus};
use hrm_omero::config::{self, ConnectorSettings, DEFAULT_CONFIG_PATH};
use hrm_omero::error::HrmOmeroError;
use hrm_omero::importer::OmeroCliImporter;
use hrm_omero::logging;
use hrm_omero::output::{ConsoleReporter, LogReporter, Reporter};
use hrm_omero::web::WebGateway;

#[derive(Parser)]
#[command(name = "hrm-omero")]
#[command(about = "Connector between the Huygens Remote Manager (HRM) and OMERO")]
#[command(version)]
struct Cli {
    /// Verbose messages (repeat for more details)
    #[arg(short, long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// The HRM configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print requested action and parameters without actually performing it
    #[arg(long)]
    dry_run: bool,

    /// OMERO username
    #[arg(short, long)]
    user: String,

    /// OMERO password (DEPRECATED, use the environment variable OMERO_PASSWORD instead)
    #[arg(short = 'w', long)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check if login credentials are valid
    #[command(name = "checkCredentials")]
    CheckCredentials,
    /// Get the children of a given node object (JSON)
    #[command(name = "retrieveChildren")]
    RetrieveChildren {
        /// ID of the parent object, e.g. "ROOT", "G:4:Experimenter:7"
        #[arg(long)]
        id: String,
    },
    /// Download an image from the OMERO server
    #[command(name = "OMEROtoHRM")]
    OmeroToHrm {
        /// The OMERO ID of the image to download, e.g. "G:4:Image:42"
        #[arg(short, long = "imageid")]
        imageid: String,
        /// The destination directory where to put the downloaded file
        #[arg(short, long)]
        dest: PathBuf,
    },
    /// Upload an image to the OMERO server
    #[command(name = "HRMtoOMERO")]
    HrmToOmero {
        /// The ID of the target dataset in OMERO, e.g. "G:7:Dataset:23"
        #[arg(short, long = "dset")]
        dset: String,
        /// The image file to upload, including the full path
        #[arg(short, long)]
        file: PathBuf,
        /// A label to use for the image in OMERO (ignored)
        #[arg(short, long)]
        name: Option<String>,
        /// Annotation text to be added to the image in OMERO (ignored)
        #[arg(short, long)]
        ann: Option<String>,
    },
}

impl From<Commands> for Action {
    fn from(command: Commands) -> Self {
        match command {
            Commands::CheckCredentials => Action::CheckCredentials,
            Commands::RetrieveChildren { id } => Action::RetrieveChildren { id },
            Commands::OmeroToHrm { imageid, dest } => Action::OmeroToHrm {
                image_id: imageid,
                dest,
            },
            Commands::HrmToOmero {
                dset,
                file,
                name,
                ann,
            } => Action::HrmToOmero {
                dataset_id: dset,
                file,
                name,
                annotation: ann,
            },
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(success) => ExitCode::from(bool_to_exitstatus(success)),
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<HrmOmeroError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &HrmOmeroError) -> u8 {
    if error.is_usage() {
        2
    } else if error.is_connectivity() {
        3
    } else {
        1
    }
}

fn run() -> miette::Result<bool> {
    let cli = Cli::parse();

    let settings = ConnectorSettings::load(&cli.config)?;
    let _log_guard = logging::init(cli.verbose, Some(&settings));
    if let Some(userdir) = &settings.userdir {
        tracing::debug!("Setting 'OMERO_USERDIR=\"{}\"'", userdir.display());
    }

    let password = config::resolve_password(cli.password.clone())?;
    let gateway = WebGateway::new(&settings.web_url, &settings.host, &cli.user, &password)?;
    let importer = OmeroCliImporter::new(
        settings.omero_cli.clone(),
        &settings.host,
        settings.port,
        settings.userdir.clone(),
    );
    let app = App::new(gateway, importer, cli.user.as_str())
        .with_import_debug_log(settings.import_debug_log.clone());

    let action = Action::from(cli.command);
    // stdout carries the JSON tree for `retrieveChildren`
    let reporter: &dyn Reporter = match (&action, cli.dry_run) {
        (Action::RetrieveChildren { .. }, false) => &LogReporter,
        _ => &ConsoleReporter,
    };
    Ok(app.run(&action, cli.dry_run, reporter)?)
}
