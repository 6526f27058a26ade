#![allow(dead_code)]

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::{DynamicImage, ImageFormat, RgbImage};

use hrm_omero::domain::ObjectType;
use hrm_omero::error::HrmOmeroError;
use hrm_omero::gateway::{FilesetFile, OmeroGateway, RemoteObject};
use hrm_omero::importer::{ImportRequest, Importer};

/// In-memory OMERO, every call is recorded.
#[derive(Default)]
pub struct MockGateway {
    pub refuse_login: bool,
    pub objects: Vec<RemoteObject>,
    pub fileset: Vec<FilesetFile>,
    /// Index into `fileset` whose transfer fails.
    pub failing_download: Option<usize>,
    pub thumbnail: Vec<u8>,
    pub user: Option<RemoteObject>,
    pub context_group: Option<RemoteObject>,
    pub groups: Vec<RemoteObject>,
    pub colleagues: Vec<RemoteObject>,
    pub projects: Vec<RemoteObject>,
    pub children: Vec<RemoteObject>,
    pub fail_annotation: bool,
    pub calls: Mutex<Vec<String>>,
    pub annotations: Mutex<Vec<(i64, String, Vec<(String, String)>)>>,
}

impl MockGateway {
    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn with_image(mut self, id: i64, name: &str) -> Self {
        self.objects
            .push(RemoteObject::new(ObjectType::Image, id, name).with_owner(7, "demo01"));
        self
    }

    pub fn with_dataset(mut self, id: i64, name: &str) -> Self {
        self.objects
            .push(RemoteObject::new(ObjectType::Dataset, id, name).with_owner(7, "demo01"));
        self
    }

    pub fn with_files(mut self, paths: &[&str]) -> Self {
        self.fileset = paths
            .iter()
            .enumerate()
            .map(|(idx, path)| FilesetFile::from_full_path(100 + idx as i64, path))
            .collect();
        self
    }

    pub fn with_thumbnail(mut self) -> Self {
        self.thumbnail = png_bytes();
        self
    }

    fn current(&self) -> RemoteObject {
        self.user.clone().unwrap_or_else(|| {
            RemoteObject::new(ObjectType::Experimenter, 7, "demo01").with_full_name("Demo User")
        })
    }
}

impl OmeroGateway for MockGateway {
    fn connect(&self) -> Result<bool, HrmOmeroError> {
        self.record("connect");
        Ok(!self.refuse_login)
    }

    fn close(&self) {
        self.record("close");
    }

    fn set_session_group(&self, group: i64) -> Result<(), HrmOmeroError> {
        self.record(format!("session_group={group}"));
        Ok(())
    }

    fn set_query_group(&self, group: i64) {
        self.record(format!("query_group={group}"));
    }

    fn session_key(&self) -> Option<String> {
        Some("mock-session".to_string())
    }

    fn current_user(&self) -> Result<RemoteObject, HrmOmeroError> {
        Ok(self.current())
    }

    fn group_from_context(&self) -> Result<RemoteObject, HrmOmeroError> {
        self.context_group
            .clone()
            .ok_or_else(|| HrmOmeroError::Remote("no group in context".to_string()))
    }

    fn get_object(
        &self,
        object_type: ObjectType,
        id: i64,
    ) -> Result<Option<RemoteObject>, HrmOmeroError> {
        self.record(format!("get_object={object_type}:{id}"));
        Ok(self
            .objects
            .iter()
            .find(|object| object.object_type == object_type && object.id == id)
            .cloned())
    }

    fn list_fileset_files(&self, image: &RemoteObject) -> Result<Vec<FilesetFile>, HrmOmeroError> {
        self.record(format!("fileset={}", image.id));
        Ok(self.fileset.clone())
    }

    fn download_file(&self, file: &FilesetFile, destination: &Path) -> Result<(), HrmOmeroError> {
        self.record(format!("download={}", file.id));
        let position = self.fileset.iter().position(|entry| entry.id == file.id);
        if position.is_some() && position == self.failing_download {
            return Err(HrmOmeroError::Remote("connection reset".to_string()));
        }
        fs::write(destination, format!("content of {}", file.name))
            .map_err(|err| HrmOmeroError::Filesystem(err.to_string()))
    }

    fn thumbnail_bytes(&self, image: &RemoteObject) -> Result<Vec<u8>, HrmOmeroError> {
        self.record(format!("thumbnail={}", image.id));
        Ok(self.thumbnail.clone())
    }

    fn groups_of_user(&self) -> Result<Vec<RemoteObject>, HrmOmeroError> {
        self.record("groups_of_user");
        Ok(self.groups.clone())
    }

    fn colleagues(&self) -> Result<Vec<RemoteObject>, HrmOmeroError> {
        self.record("colleagues");
        let user_id = self.current().id;
        Ok(self
            .colleagues
            .iter()
            .filter(|member| member.id != user_id)
            .cloned()
            .collect())
    }

    fn list_projects(&self, experimenter_id: i64) -> Result<Vec<RemoteObject>, HrmOmeroError> {
        self.record(format!("list_projects={experimenter_id}"));
        Ok(self.projects.clone())
    }

    fn list_children(&self, object: &RemoteObject) -> Result<Vec<RemoteObject>, HrmOmeroError> {
        self.record(format!("list_children={}:{}", object.object_type, object.id));
        Ok(self.children.clone())
    }

    fn add_map_annotation(
        &self,
        image: &RemoteObject,
        namespace: &str,
        entries: &[(String, String)],
    ) -> Result<(), HrmOmeroError> {
        self.record(format!("annotate={}", image.id));
        if self.fail_annotation {
            return Err(HrmOmeroError::Remote("annotation refused".to_string()));
        }
        self.annotations
            .lock()
            .unwrap()
            .push((image.id, namespace.to_string(), entries.to_vec()));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum ImportOutcome {
    /// Writes the given YAML to the capture file and succeeds.
    Succeed(String),
    Fail,
    PermissionDenied,
}

/// Importer double recording the capture file of every call.
pub struct MockImporter {
    pub outcome: ImportOutcome,
    pub captures: Mutex<Vec<PathBuf>>,
}

impl MockImporter {
    pub fn new(outcome: ImportOutcome) -> Self {
        Self {
            outcome,
            captures: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding_with(image_id: i64) -> Self {
        Self::new(ImportOutcome::Succeed(format!(
            "---\n- Image:\n  - {image_id}\n  Fileset: 4242\n"
        )))
    }

    pub fn calls(&self) -> usize {
        self.captures.lock().unwrap().len()
    }

    pub fn captures(&self) -> Vec<PathBuf> {
        self.captures.lock().unwrap().clone()
    }
}

impl Importer for MockImporter {
    fn import(&self, request: &ImportRequest<'_>) -> Result<(), HrmOmeroError> {
        self.captures
            .lock()
            .unwrap()
            .push(request.capture.to_path_buf());
        // the capture directory must exist while the import runs
        assert!(request.capture.parent().unwrap().is_dir());
        match &self.outcome {
            ImportOutcome::Succeed(yaml) => {
                fs::write(request.capture, yaml).unwrap();
                Ok(())
            }
            ImportOutcome::Fail => {
                fs::write(request.capture, "partial output").unwrap();
                Err(HrmOmeroError::Import("ImportCandidates failed".to_string()))
            }
            ImportOutcome::PermissionDenied => Err(HrmOmeroError::ImportPermission {
                userdir: "/nonexistent/omero".to_string(),
            }),
        }
    }
}

pub fn png_bytes() -> Vec<u8> {
    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, image::Rgb([200, 40, 40])))
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}

pub fn experimenter(id: i64, login: &str, full_name: &str) -> RemoteObject {
    RemoteObject::new(ObjectType::Experimenter, id, login).with_full_name(full_name)
}

pub fn group(id: i64, name: &str) -> RemoteObject {
    RemoteObject::new(ObjectType::ExperimenterGroup, id, name)
}
