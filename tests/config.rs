use std::fs;
use std::path::PathBuf;

use assert_matches::assert_matches;

use hrm_omero::config::ConnectorSettings;
use hrm_omero::error::HrmOmeroError;

#[test]
fn settings_from_an_hrm_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("hrm.conf");
    fs::write(
        &path,
        r#"
OMERO_PKG="/opt/OMERO/OMERO.server"
OMERO_HOSTNAME="omero.mynetwork.xy"
OMERO_PORT="4064"
OMERO_DEBUG_LOG="/var/log/hrm/omero-import.log"
HRM_LOG="/srv/hrm/log"
OMERO_CONNECTOR_LOGLEVEL="DEBUG"
"#,
    )
    .unwrap();

    let settings = ConnectorSettings::load(&path).unwrap();

    assert_eq!(settings.host, "omero.mynetwork.xy");
    assert_eq!(settings.port, 4064);
    assert_eq!(settings.web_url, "https://omero.mynetwork.xy");
    assert_eq!(
        settings.import_debug_log,
        Some(PathBuf::from("/var/log/hrm/omero-import.log"))
    );
    assert_eq!(
        settings.log_file,
        Some(PathBuf::from("/srv/hrm/log/omero-connector.log"))
    );
    assert_eq!(settings.log_level.as_deref(), Some("DEBUG"));
}

#[test]
fn incomplete_config_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("hrm.conf");
    fs::write(&path, "OMERO_PKG=\"/opt/OMERO/OMERO.server\"\n").unwrap();

    let err = ConnectorSettings::load(&path).unwrap_err();
    assert_matches!(err, HrmOmeroError::MissingConfigEntry(ref key) if key == "OMERO_HOSTNAME");
}
