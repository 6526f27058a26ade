use std::fs;
use std::path::{Path, PathBuf};

use camino::{Utf8Component, Utf8PathBuf};
use image::ImageFormat;

use crate::domain::{ALL_GROUPS, ObjectType, OmeroId};
use crate::error::HrmOmeroError;
use crate::gateway::{FilesetFile, OmeroGateway, RemoteObject};
use crate::guard::with_session;
use crate::hrm;
use crate::importer::{ImportRequest, Importer, extract_image_id};
use crate::output::Reporter;

pub const PREVIEW_DIR: &str = "hrm_previews";
pub const PREVIEW_SUFFIX: &str = ".preview_xy.jpg";
pub const ANNOTATION_NAMESPACE: &str = "Huygens Remote Manager";

const UNSUPPORTED_SUFFIXES: &[&str] = &[".h5", ".hdf5"];
const CAPTURE_FILE: &str = "omero-import-stdout";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDownload {
    pub file: FilesetFile,
    pub destination: PathBuf,
}

/// Where each fileset file will land, computed before anything is transferred.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadPlan {
    items: Vec<PlannedDownload>,
}

impl DownloadPlan {
    /// Maps every file below `destination_dir`, keeping the directory layout
    /// relative to the longest common directory of all files.
    pub fn new(files: Vec<FilesetFile>, destination_dir: &Path) -> Result<Self, HrmOmeroError> {
        let full_paths = files.iter().map(FilesetFile::full_path).collect::<Vec<_>>();
        let prefix = common_directory(&full_paths);

        let mut items = Vec::with_capacity(files.len());
        for (file, full_path) in files.into_iter().zip(full_paths) {
            let relative = full_path
                .strip_prefix(&prefix)
                .map(|rel| rel.to_path_buf())
                .unwrap_or_else(|_| Utf8PathBuf::from(&file.name));
            if relative
                .components()
                .any(|c| !matches!(c, Utf8Component::Normal(_) | Utf8Component::CurDir))
            {
                return Err(HrmOmeroError::Filesystem(format!(
                    "refusing fileset path outside the destination: {full_path}"
                )));
            }
            items.push(PlannedDownload {
                destination: destination_dir.join(relative.as_std_path()),
                file,
            });
        }
        Ok(Self { items })
    }

    pub fn items(&self) -> &[PlannedDownload] {
        &self.items
    }

    pub fn first_collision(&self) -> Option<&Path> {
        self.items
            .iter()
            .map(|item| item.destination.as_path())
            .find(|path| path.exists())
    }
}

/// Longest common directory of the parents of `paths`.
pub fn common_directory(paths: &[Utf8PathBuf]) -> Utf8PathBuf {
    let mut parents = paths.iter().map(|path| {
        path.parent()
            .map(|parent| parent.components().collect::<Vec<_>>())
            .unwrap_or_default()
    });
    let Some(mut common) = parents.next() else {
        return Utf8PathBuf::new();
    };
    for components in parents {
        let shared = common
            .iter()
            .zip(components.iter())
            .take_while(|(a, b)| a == b)
            .count();
        common.truncate(shared);
    }
    common.iter().collect()
}

/// A destination that is not an existing directory is replaced by its parent.
pub fn resolve_destination(destination: &Path) -> PathBuf {
    if destination.is_dir() {
        return destination.to_path_buf();
    }
    match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Downloads the original files of an image plus its thumbnail.
///
/// Not-found conditions, existing destination files and failed transfers are
/// reported and yield `Ok(false)`. Files written before a failure are kept.
pub fn download<G>(
    gateway: &G,
    id: &OmeroId,
    destination: &Path,
    reporter: &dyn Reporter,
) -> Result<bool, HrmOmeroError>
where
    G: OmeroGateway + ?Sized,
{
    if id.object_type() != ObjectType::Image {
        return Err(HrmOmeroError::UnsupportedObjectType {
            operation: "download",
            expected: "Image",
            found: id.to_string(),
        });
    }
    with_session(gateway, id, |gw, id| {
        download_image(gw, id, destination, reporter)
    })
}

fn download_image<G>(
    gateway: &G,
    id: &OmeroId,
    destination: &Path,
    reporter: &dyn Reporter,
) -> Result<bool, HrmOmeroError>
where
    G: OmeroGateway + ?Sized,
{
    let destination_dir = resolve_destination(destination);
    if destination_dir != destination {
        tracing::warn!(
            "Destination [{}] is not a directory, using [{}] instead.",
            destination.display(),
            destination_dir.display()
        );
    }

    // cross-group lookup, the tree only shows groups the user has access to
    gateway.set_query_group(ALL_GROUPS);
    let image_id = id.object_id();
    let Some(image) = gateway.get_object(ObjectType::Image, image_id)? else {
        reporter.error(&format!("ERROR: can't find image with ID {image_id}!"));
        return Ok(false);
    };

    let files = gateway.list_fileset_files(&image)?;
    if files.is_empty() {
        reporter.error(&format!(
            "ERROR: no original file(s) for image {image_id} found!"
        ));
        return Ok(false);
    }

    let plan = DownloadPlan::new(files, &destination_dir)?;
    if let Some(existing) = plan.first_collision() {
        reporter.error(&format!(
            "ERROR: target file '{}' already existing!",
            existing.display()
        ));
        return Ok(false);
    }

    for item in plan.items() {
        if let Some(parent) = item.destination.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                reporter.error(&format!(
                    "ERROR: creating directory '{}' failed: {err}",
                    parent.display()
                ));
                return Ok(false);
            }
        }
        if let Err(err) = gateway.download_file(&item.file, &item.destination) {
            reporter.error(&format!(
                "ERROR: downloading {} to '{}' failed: {err}",
                item.file.id,
                item.destination.display()
            ));
            return Ok(false);
        }
        reporter.info(&format!(
            "ID {} downloaded as '{}'",
            item.file.id,
            item.destination.display()
        ));
    }

    // for single files and e.g. ICS/IDS pairs the first file names the preview
    let first = &plan.items()[0].destination;
    write_thumbnail(gateway, &image, first, reporter)
}

pub fn preview_path(dest_hint: &Path) -> PathBuf {
    let base_dir = dest_hint.parent().unwrap_or_else(|| Path::new(""));
    let name = dest_hint
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    base_dir.join(PREVIEW_DIR).join(format!("{name}{PREVIEW_SUFFIX}"))
}

/// Stores the OMERO thumbnail of an image as the HRM preview of `dest_hint`.
pub fn fetch_thumbnail<G>(
    gateway: &G,
    image_id: i64,
    dest_hint: &Path,
    reporter: &dyn Reporter,
) -> Result<bool, HrmOmeroError>
where
    G: OmeroGateway + ?Sized,
{
    let Some(image) = gateway.get_object(ObjectType::Image, image_id)? else {
        reporter.error(&format!("ERROR: can't find image with ID {image_id}!"));
        return Ok(false);
    };
    write_thumbnail(gateway, &image, dest_hint, reporter)
}

fn write_thumbnail<G>(
    gateway: &G,
    image: &RemoteObject,
    dest_hint: &Path,
    reporter: &dyn Reporter,
) -> Result<bool, HrmOmeroError>
where
    G: OmeroGateway + ?Sized,
{
    let target = preview_path(dest_hint);
    let fail = |detail: String| {
        reporter.error(&format!(
            "ERROR downloading thumbnail to '{}': {detail}",
            target.display()
        ));
        Ok(false)
    };

    if let Some(preview_dir) = target.parent() {
        if !preview_dir.is_dir() {
            if let Err(err) = create_group_writable_dir(preview_dir) {
                return fail(err.to_string());
            }
        }
    }

    let bytes = match gateway.thumbnail_bytes(image) {
        Ok(bytes) => bytes,
        Err(err) => return fail(err.to_string()),
    };
    let thumbnail = match image::load_from_memory(&bytes) {
        Ok(decoded) => decoded,
        Err(err) => return fail(err.to_string()),
    };
    if let Err(err) = thumbnail.to_rgb8().save_with_format(&target, ImageFormat::Jpeg) {
        let _ = fs::remove_file(&target);
        return fail(err.to_string());
    }

    reporter.info(&format!("Thumbnail downloaded to '{}'.", target.display()));
    Ok(true)
}

fn create_group_writable_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut permissions = fs::metadata(dir)?.permissions();
        permissions.set_mode(permissions.mode() | 0o070);
        fs::set_permissions(dir, permissions)?;
    }
    Ok(())
}

/// Imports a local file into a dataset and annotates the new image with the
/// HRM parameter summary.
///
/// Fails with an error only for a non-dataset target, an unsupported file
/// format, connection problems and a non-writable OMERO user directory. Any
/// other import failure is reported and yields `Ok(false)`.
pub fn upload<G, I>(
    gateway: &G,
    importer: &I,
    id: &OmeroId,
    image_file: &Path,
    debug_log: Option<&Path>,
    reporter: &dyn Reporter,
) -> Result<bool, HrmOmeroError>
where
    G: OmeroGateway + ?Sized,
    I: Importer + ?Sized,
{
    if id.object_type() != ObjectType::Dataset {
        return Err(HrmOmeroError::UnsupportedObjectType {
            operation: "upload",
            expected: "Dataset",
            found: id.to_string(),
        });
    }
    ensure_supported_format(image_file)?;

    with_session(gateway, id, |gw, id| {
        import_file(gw, importer, id, image_file, debug_log, reporter)
    })
}

pub fn ensure_supported_format(image_file: &Path) -> Result<(), HrmOmeroError> {
    let name = image_file.to_string_lossy().to_lowercase();
    if UNSUPPORTED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
        return Err(HrmOmeroError::UnsupportedFormat(format!(
            "HDF5 files can't be imported ({})",
            image_file.display()
        )));
    }
    Ok(())
}

fn import_file<G, I>(
    gateway: &G,
    importer: &I,
    id: &OmeroId,
    image_file: &Path,
    debug_log: Option<&Path>,
    reporter: &dyn Reporter,
) -> Result<bool, HrmOmeroError>
where
    G: OmeroGateway + ?Sized,
    I: Importer + ?Sized,
{
    let summary = match hrm::parse_summary(&hrm::parameter_file_for(image_file)) {
        Ok(summary) => summary,
        Err(err) => {
            tracing::warn!("Ignoring parameter summary: {err}");
            None
        }
    };
    if let Some(summary) = &summary {
        tracing::debug!("Parameter summary of the upload:\n{}", summary.to_text());
    }

    let capture_dir = tempfile::Builder::new()
        .prefix("hrm-omero__")
        .tempdir()
        .map_err(|err| HrmOmeroError::Filesystem(err.to_string()))?;
    let capture = capture_dir.path().join(CAPTURE_FILE);
    tracing::debug!("Capturing stdout of the import into [{}]...", capture.display());

    let request = ImportRequest {
        dataset_id: id.object_id(),
        file: image_file,
        debug_log,
        capture: &capture,
        session_key: gateway.session_key(),
    };
    let result = importer.import(&request);
    let imported_id = match result {
        Ok(()) => extract_image_id(&capture),
        Err(_) => None,
    };
    let description = importer.describe(&request);
    if let Err(err) = capture_dir.close() {
        tracing::warn!("Unable to remove import capture directory: {err}");
    }

    match result {
        Ok(()) => {}
        // reported by the caller together with its help text
        Err(err @ HrmOmeroError::ImportPermission { .. }) => return Err(err),
        Err(err) => {
            reporter.error(&format!(
                "ERROR: uploading '{}' to {id} failed!",
                image_file.display()
            ));
            reporter.error(&format!("OMERO error message: >>>{err}<<<"));
            reporter.warn(&format!("import_args: {description}"));
            return Ok(false);
        }
    }

    let Some(image_id) =
        imported_id.and_then(|iid| OmeroId::new(id.group(), ObjectType::Image, iid).ok())
    else {
        reporter.warn(&format!(
            "Imported '{}', but the id of the new image is unknown, skipping annotation.",
            image_file.display()
        ));
        return Ok(true);
    };
    reporter.success(&format!("Imported OMERO image ID: {}", image_id.object_id()));

    if let Some(summary) = summary {
        let entries = summary.entries();
        match add_annotation_keyvalue(gateway, &image_id, &entries, reporter) {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Image {image_id} was imported without annotation."),
            Err(err) => tracing::warn!("Annotating {image_id} failed: {err}"),
        }
    }
    Ok(true)
}

/// Attaches key/value pairs as a map annotation to an image.
pub fn add_annotation_keyvalue<G>(
    gateway: &G,
    id: &OmeroId,
    entries: &[(String, String)],
    reporter: &dyn Reporter,
) -> Result<bool, HrmOmeroError>
where
    G: OmeroGateway + ?Sized,
{
    if entries.is_empty() {
        reporter.warn(&format!("No annotation entries given for {id}."));
        return Ok(false);
    }
    with_session(gateway, id, |gw, id| {
        let Some(target) = gw.get_object(id.object_type(), id.object_id())? else {
            reporter.warn(&format!("Unable to identify target object {id} in OMERO!"));
            return Ok(false);
        };
        if let Err(err) = gw.add_map_annotation(&target, ANNOTATION_NAMESPACE, entries) {
            reporter.warn(&format!("Adding annotation to {id} failed: {err}"));
            return Ok(false);
        }
        reporter.success(&format!("Added key-value annotation to {id}."));
        Ok(true)
    })
}
