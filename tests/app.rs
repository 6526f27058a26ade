mod common;

use std::fs;

use assert_matches::assert_matches;

use common::{MockGateway, MockImporter};
use hrm_omero::app::{Action, App, bool_to_exitstatus};
use hrm_omero::error::HrmOmeroError;
use hrm_omero::output::RecordingReporter;

fn app(gateway: MockGateway) -> App<MockGateway, MockImporter> {
    App::new(gateway, MockImporter::succeeding_with(1), "demo01")
}

#[test]
fn exit_status_of_outcomes() {
    assert_eq!(bool_to_exitstatus(true), 0);
    assert_eq!(bool_to_exitstatus(false), 1);
}

#[test]
fn credentials_check_reports_the_user_id() {
    let app = app(MockGateway::default());
    let reporter = RecordingReporter::default();

    let ok = app
        .run(&Action::CheckCredentials, false, &reporter)
        .unwrap();

    assert!(ok);
    assert!(reporter.contains("Success logging into OMERO with user ID 7"));
    assert_eq!(app.gateway().calls().last().unwrap(), "close");
}

#[test]
fn refused_credentials() {
    let app = app(MockGateway {
        refuse_login: true,
        ..MockGateway::default()
    });
    let reporter = RecordingReporter::default();

    let ok = app
        .run(&Action::CheckCredentials, false, &reporter)
        .unwrap();

    assert!(!ok);
    assert!(reporter.contains("ERROR logging into OMERO."));
}

#[test]
fn dry_run_only_shows_the_action() {
    let app = app(MockGateway::default());
    let reporter = RecordingReporter::default();
    let action = Action::OmeroToHrm {
        image_id: "G:9:Image:1567250".to_string(),
        dest: "/data/user/src".into(),
    };

    let ok = app.run(&action, true, &reporter).unwrap();

    assert!(ok);
    assert!(reporter.contains("*** dry-run, only showing action and parameters ***"));
    assert!(reporter.contains("function: download"));
    assert!(reporter.contains("id_str: [G:9:Image:1567250]"));
    assert!(reporter.contains("dest: [/data/user/src]"));
    assert_eq!(app.gateway().calls(), vec!["close"]);
}

#[test]
fn dry_run_still_rejects_malformed_ids() {
    let app = app(MockGateway::default());
    let reporter = RecordingReporter::default();
    let action = Action::RetrieveChildren {
        id: "G:9:Image".to_string(),
    };

    let err = app.run(&action, true, &reporter).unwrap_err();

    assert!(err.is_usage());
    assert_eq!(app.gateway().calls(), vec!["close"]);
}

#[test]
fn connection_is_closed_after_failures() {
    let app = app(MockGateway {
        refuse_login: true,
        ..MockGateway::default()
    });
    let reporter = RecordingReporter::default();
    let temp = tempfile::tempdir().unwrap();
    let action = Action::OmeroToHrm {
        image_id: "G:9:Image:1567250".to_string(),
        dest: temp.path().to_path_buf(),
    };

    let err = app.run(&action, false, &reporter).unwrap_err();

    assert_matches!(err, HrmOmeroError::Connection(_));
    assert_eq!(app.gateway().calls(), vec!["connect", "close"]);
}

#[test]
fn upload_goes_through_the_importer() {
    let temp = tempfile::tempdir().unwrap();
    let file = temp.path().join("x_0123456789abc_hrm.ics");
    fs::write(&file, "ics").unwrap();
    let app = app(MockGateway::default());
    let reporter = RecordingReporter::default();
    let action = Action::HrmToOmero {
        dataset_id: "G:7:Dataset:23".to_string(),
        file,
        name: None,
        annotation: None,
    };

    let ok = app.run(&action, false, &reporter).unwrap();

    assert!(ok);
    assert!(reporter.contains("Imported OMERO image ID: 1"));
}
