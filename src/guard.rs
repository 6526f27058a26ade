use crate::domain::OmeroId;
use crate::error::HrmOmeroError;
use crate::gateway::OmeroGateway;

/// Runs `operation` on a freshly (re-)connected gateway whose session group
/// matches the group of `id`.
///
/// The connection is forced even if the gateway believes it is connected: the
/// flag is unreliable after an import. The connection stays open afterwards.
pub fn with_session<G, T, F>(gateway: &G, id: &OmeroId, operation: F) -> Result<T, HrmOmeroError>
where
    G: OmeroGateway + ?Sized,
    F: FnOnce(&G, &OmeroId) -> Result<T, HrmOmeroError>,
{
    match gateway.connect() {
        Ok(true) => {}
        Ok(false) => {
            return Err(HrmOmeroError::Connection(
                "server refused the login".to_string(),
            ));
        }
        Err(HrmOmeroError::Connection(message)) => {
            return Err(HrmOmeroError::Connection(message));
        }
        Err(err) => return Err(HrmOmeroError::Connection(err.to_string())),
    }
    tracing::info!(outcome = "success", "Successfully (re-)connected to OMERO!");

    let group = id.group();
    gateway
        .set_session_group(group)
        .map_err(|err| match err {
            HrmOmeroError::GroupSwitch { .. } => err,
            other => HrmOmeroError::GroupSwitch {
                group,
                message: other.to_string(),
            },
        })?;
    tracing::debug!("Set OMERO session group to [{group}].");

    operation(gateway, id)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::ObjectType;
    use crate::gateway::{FilesetFile, RemoteObject};

    #[derive(Default)]
    struct ScriptedGateway {
        refuse_login: bool,
        reject_group: bool,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedGateway {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl OmeroGateway for ScriptedGateway {
        fn connect(&self) -> Result<bool, HrmOmeroError> {
            self.record("connect".to_string());
            Ok(!self.refuse_login)
        }

        fn close(&self) {}

        fn set_session_group(&self, group: i64) -> Result<(), HrmOmeroError> {
            self.record(format!("group={group}"));
            if self.reject_group {
                return Err(HrmOmeroError::Remote("unknown group".to_string()));
            }
            Ok(())
        }

        fn set_query_group(&self, _group: i64) {}

        fn session_key(&self) -> Option<String> {
            None
        }

        fn current_user(&self) -> Result<RemoteObject, HrmOmeroError> {
            unimplemented!()
        }

        fn group_from_context(&self) -> Result<RemoteObject, HrmOmeroError> {
            unimplemented!()
        }

        fn get_object(
            &self,
            _object_type: ObjectType,
            _id: i64,
        ) -> Result<Option<RemoteObject>, HrmOmeroError> {
            Ok(None)
        }

        fn list_fileset_files(
            &self,
            _image: &RemoteObject,
        ) -> Result<Vec<FilesetFile>, HrmOmeroError> {
            Ok(Vec::new())
        }

        fn download_file(
            &self,
            _file: &FilesetFile,
            _destination: &Path,
        ) -> Result<(), HrmOmeroError> {
            Ok(())
        }

        fn thumbnail_bytes(&self, _image: &RemoteObject) -> Result<Vec<u8>, HrmOmeroError> {
            Ok(Vec::new())
        }

        fn groups_of_user(&self) -> Result<Vec<RemoteObject>, HrmOmeroError> {
            Ok(Vec::new())
        }

        fn colleagues(&self) -> Result<Vec<RemoteObject>, HrmOmeroError> {
            Ok(Vec::new())
        }

        fn list_projects(&self, _experimenter_id: i64) -> Result<Vec<RemoteObject>, HrmOmeroError> {
            Ok(Vec::new())
        }

        fn list_children(
            &self,
            _object: &RemoteObject,
        ) -> Result<Vec<RemoteObject>, HrmOmeroError> {
            Ok(Vec::new())
        }

        fn add_map_annotation(
            &self,
            _image: &RemoteObject,
            _namespace: &str,
            _entries: &[(String, String)],
        ) -> Result<(), HrmOmeroError> {
            Ok(())
        }
    }

    #[test]
    fn connects_then_switches_group_then_runs() {
        let gateway = ScriptedGateway::default();
        let id: OmeroId = "G:9:Image:1567250".parse().unwrap();

        let result = with_session(&gateway, &id, |gw, id| {
            gw.record(format!("op={id}"));
            Ok(42)
        })
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(
            gateway.calls(),
            vec!["connect", "group=9", "op=G:9:Image:1567250"]
        );
    }

    #[test]
    fn refused_login_is_a_connection_error() {
        let gateway = ScriptedGateway {
            refuse_login: true,
            ..Default::default()
        };
        let id: OmeroId = "G:1:Dataset:2".parse().unwrap();

        let err = with_session(&gateway, &id, |_, _| Ok(())).unwrap_err();
        assert_matches!(err, HrmOmeroError::Connection(_));
        assert_eq!(gateway.calls(), vec!["connect"]);
    }

    #[test]
    fn rejected_group_stops_before_the_operation() {
        let gateway = ScriptedGateway {
            reject_group: true,
            ..Default::default()
        };
        let id: OmeroId = "G:77:Project:5".parse().unwrap();

        let err = with_session(&gateway, &id, |gw, _| {
            gw.record("op".to_string());
            Ok(())
        })
        .unwrap_err();
        assert_matches!(err, HrmOmeroError::GroupSwitch { group: 77, .. });
        assert_eq!(gateway.calls(), vec!["connect", "group=77"]);
    }
}
