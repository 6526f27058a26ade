use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::domain::ObjectType;
use crate::error::HrmOmeroError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteObject {
    pub object_type: ObjectType,
    pub id: i64,
    pub name: String,
    /// Only set for experimenters.
    pub full_name: Option<String>,
    pub owner_id: Option<i64>,
    /// Login name of the owner.
    pub owner_name: Option<String>,
}

impl RemoteObject {
    pub fn new(object_type: ObjectType, id: i64, name: impl Into<String>) -> Self {
        Self {
            object_type,
            id,
            name: name.into(),
            full_name: None,
            owner_id: None,
            owner_name: None,
        }
    }

    pub fn with_owner(mut self, owner_id: i64, owner_name: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id);
        self.owner_name = Some(owner_name.into());
        self
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }
}

/// One physical file of an image's fileset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilesetFile {
    pub id: i64,
    pub name: String,
    /// Directory part of the file's original location, may be empty.
    pub path: String,
}

impl FilesetFile {
    /// Splits a full file path into the directory and name parts.
    pub fn from_full_path(id: i64, full_path: &str) -> Self {
        let full = Utf8Path::new(full_path);
        let name = full.file_name().unwrap_or(full_path).to_string();
        let path = full
            .parent()
            .map(|parent| parent.as_str().to_string())
            .unwrap_or_default();
        Self { id, name, path }
    }

    pub fn full_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.path).join(&self.name)
    }
}

/// The remote OMERO client the connector drives.
///
/// Implementations keep the session state (connection, active group) behind
/// `&self`; a single gateway is never shared by concurrent operations.
pub trait OmeroGateway: Send + Sync {
    /// Establishes the connection. Calling it on a live connection is a no-op.
    /// `Ok(false)` means the server refused the credentials.
    fn connect(&self) -> Result<bool, HrmOmeroError>;

    fn close(&self);

    /// Switches the session to the given group, also resetting the query group.
    fn set_session_group(&self, group: i64) -> Result<(), HrmOmeroError>;

    /// Sets the group scope of subsequent lookups only, `-1` for all groups.
    fn set_query_group(&self, group: i64);

    fn session_key(&self) -> Option<String>;

    fn current_user(&self) -> Result<RemoteObject, HrmOmeroError>;

    fn group_from_context(&self) -> Result<RemoteObject, HrmOmeroError>;

    fn get_object(
        &self,
        object_type: ObjectType,
        id: i64,
    ) -> Result<Option<RemoteObject>, HrmOmeroError>;

    fn list_fileset_files(&self, image: &RemoteObject) -> Result<Vec<FilesetFile>, HrmOmeroError>;

    fn download_file(&self, file: &FilesetFile, destination: &Path) -> Result<(), HrmOmeroError>;

    fn thumbnail_bytes(&self, image: &RemoteObject) -> Result<Vec<u8>, HrmOmeroError>;

    fn groups_of_user(&self) -> Result<Vec<RemoteObject>, HrmOmeroError>;

    /// Members of the current session group, without the current user.
    fn colleagues(&self) -> Result<Vec<RemoteObject>, HrmOmeroError>;

    fn list_projects(&self, experimenter_id: i64) -> Result<Vec<RemoteObject>, HrmOmeroError>;

    fn list_children(&self, object: &RemoteObject) -> Result<Vec<RemoteObject>, HrmOmeroError>;

    fn add_map_annotation(
        &self,
        image: &RemoteObject,
        namespace: &str,
        entries: &[(String, String)],
    ) -> Result<(), HrmOmeroError>;
}
