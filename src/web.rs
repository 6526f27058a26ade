use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, REFERER, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tempfile::TempDir;
use zip::ZipArchive;

use crate::domain::{ALL_GROUPS, ObjectType};
use crate::error::HrmOmeroError;
use crate::gateway::{FilesetFile, OmeroGateway, RemoteObject};

const PAGE_SIZE: usize = 500;
const CSRF_HEADER: &str = "X-CSRFToken";
/// Every OMERO user is a member of this internal group.
const SYSTEM_USER_GROUP: &str = "user";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventContext {
    user_id: i64,
    user_name: String,
    group_id: i64,
    #[serde(default)]
    session_uuid: Option<String>,
    #[serde(default)]
    member_of_groups: Vec<i64>,
}

#[derive(Debug, Clone)]
struct ArchivedFile {
    image_id: i64,
    /// Path of the file inside the managed repository.
    repo_path: String,
    fileset_size: usize,
}

#[derive(Default)]
struct SessionState {
    csrf: Option<String>,
    context: Option<EventContext>,
    session_group: Option<i64>,
    query_group: i64,
    files: HashMap<i64, ArchivedFile>,
    next_file_id: i64,
    archives: HashMap<i64, PathBuf>,
    scratch: Option<TempDir>,
}

/// Gateway talking to an OMERO.web instance through its JSON API and the
/// webgateway / webclient endpoints.
pub struct WebGateway {
    client: Client,
    base_url: String,
    host: String,
    username: String,
    password: String,
    state: Mutex<SessionState>,
}

impl WebGateway {
    pub fn new(
        base_url: &str,
        host: &str,
        username: &str,
        password: &str,
    ) -> Result<Self, HrmOmeroError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("hrm-omero/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HrmOmeroError::Connection(err.to_string()))?,
        );
        // Django refuses CSRF-protected posts over https without a referer
        headers.insert(
            REFERER,
            HeaderValue::from_str(&format!("{base_url}/"))
                .map_err(|err| HrmOmeroError::Connection(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| HrmOmeroError::Connection(err.to_string()))?;
        Ok(Self {
            client,
            base_url,
            host: host.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            state: Mutex::new(SessionState {
                query_group: ALL_GROUPS,
                ..Default::default()
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn context(&self) -> Result<EventContext, HrmOmeroError> {
        self.state()
            .context
            .clone()
            .ok_or_else(|| HrmOmeroError::Connection("not connected to OMERO".to_string()))
    }

    fn active_group(&self) -> Result<i64, HrmOmeroError> {
        let session_group = self.state().session_group;
        match session_group {
            Some(group) => Ok(group),
            None => Ok(self.context()?.group_id),
        }
    }

    fn csrf_token(&self) -> Result<String, HrmOmeroError> {
        if let Some(token) = self.state().csrf.clone() {
            return Ok(token);
        }
        let body = self.get_json(&self.url("/api/v0/token/"), &[])?;
        let token = body
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| HrmOmeroError::Remote("no CSRF token in response".to_string()))?
            .to_string();
        self.state().csrf = Some(token.clone());
        Ok(token)
    }

    fn handle_status(response: Response) -> Result<Response, HrmOmeroError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "OMERO request failed".to_string());
        Err(HrmOmeroError::RemoteStatus { status, message })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, HrmOmeroError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!("OMERO answered {status}, retrying in {delay} ms");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(HrmOmeroError::Remote(err.to_string()));
                }
            }
        }
    }

    fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, HrmOmeroError> {
        let response = self.send_with_retries(|| self.client.get(url).query(query))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| HrmOmeroError::Remote(err.to_string()))
    }

    /// Like `get_json`, but a 404 is `None`.
    fn find_json(&self, url: &str) -> Result<Option<Value>, HrmOmeroError> {
        let response = self.send_with_retries(|| self.client.get(url))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::handle_status(response)?;
        response
            .json()
            .map(Some)
            .map_err(|err| HrmOmeroError::Remote(err.to_string()))
    }

    fn post_form(&self, path: &str, form: &[(&str, String)]) -> Result<Response, HrmOmeroError> {
        let token = self.csrf_token()?;
        let url = self.url(path);
        let response = self.send_with_retries(|| {
            self.client
                .post(&url)
                .header(CSRF_HEADER, token.as_str())
                .form(form)
        })?;
        Self::handle_status(response)
    }

    /// Collects all pages of a JSON API listing.
    fn list_data(
        &self,
        path: &str,
        mut query: Vec<(&str, String)>,
    ) -> Result<Vec<Value>, HrmOmeroError> {
        let query_group = self.state().query_group;
        if query_group != ALL_GROUPS {
            query.push(("group", query_group.to_string()));
        }
        query.push(("limit", PAGE_SIZE.to_string()));

        let url = self.url(path);
        let mut items = Vec::new();
        loop {
            let mut page_query = query.clone();
            page_query.push(("offset", items.len().to_string()));
            let body = self.get_json(&url, &page_query)?;
            let page = body
                .get("data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let total = body
                .get("meta")
                .and_then(|meta| meta.get("totalCount"))
                .and_then(Value::as_u64)
                .map(|count| count as usize);
            let page_len = page.len();
            items.extend(page);
            match total {
                Some(total) if items.len() < total && page_len > 0 => continue,
                _ => break,
            }
        }
        Ok(items)
    }

    fn list_objects(
        &self,
        object_type: ObjectType,
        path: &str,
        query: Vec<(&str, String)>,
    ) -> Result<Vec<RemoteObject>, HrmOmeroError> {
        Ok(self
            .list_data(path, query)?
            .iter()
            .filter_map(|value| remote_object_from_json(object_type, value))
            .collect())
    }

    fn login(&self) -> Result<bool, HrmOmeroError> {
        let servers = self.get_json(&self.url("/api/v0/servers/"), &[])?;
        let server_id = select_server(&servers, &self.host).ok_or_else(|| {
            HrmOmeroError::Connection("OMERO.web does not list any server".to_string())
        })?;
        tracing::trace!("Using OMERO.web server entry {server_id} for [{}].", self.host);

        let token = self.csrf_token()?;
        let url = self.url("/api/v0/login/");
        let form = [
            ("server", server_id.to_string()),
            ("username", self.username.clone()),
            ("password", self.password.clone()),
        ];
        let response = self.send_with_retries(|| {
            self.client
                .post(&url)
                .header(CSRF_HEADER, token.as_str())
                .form(&form)
        })?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
            let message = response.text().unwrap_or_default();
            tracing::error!("OMERO login refused for [{}]: {message}", self.username);
            return Ok(false);
        }
        let response = Self::handle_status(response)?;
        let body: Value = response
            .json()
            .map_err(|err| HrmOmeroError::Remote(err.to_string()))?;
        if body.get("success").and_then(Value::as_bool) != Some(true) {
            return Ok(false);
        }
        let context: EventContext = body
            .get("eventContext")
            .cloned()
            .ok_or_else(|| HrmOmeroError::Remote("login without event context".to_string()))
            .and_then(|value| {
                serde_json::from_value(value).map_err(|err| HrmOmeroError::Remote(err.to_string()))
            })?;
        tracing::debug!(
            "Logged into OMERO as [{}] (uid={}, gid={}).",
            context.user_name,
            context.user_id,
            context.group_id
        );

        let mut state = self.state();
        state.session_group = Some(context.group_id);
        state.context = Some(context);
        Ok(true)
    }

    fn session_alive(&self) -> bool {
        let url = self.url("/webclient/keepalive_ping/");
        match self.client.get(&url).send() {
            Ok(response) if response.status().is_success() => response
                .text()
                .map(|body| body.trim() == "OK")
                .unwrap_or(false),
            _ => false,
        }
    }

    fn scratch_dir(&self) -> Result<PathBuf, HrmOmeroError> {
        let mut state = self.state();
        if state.scratch.is_none() {
            let dir = tempfile::Builder::new()
                .prefix("hrm-omero-archive__")
                .tempdir()
                .map_err(|err| HrmOmeroError::Filesystem(err.to_string()))?;
            state.scratch = Some(dir);
        }
        state
            .scratch
            .as_ref()
            .map(|dir| dir.path().to_path_buf())
            .ok_or_else(|| HrmOmeroError::Filesystem("no scratch directory".to_string()))
    }

    fn archive_for(&self, image_id: i64) -> Result<PathBuf, HrmOmeroError> {
        if let Some(path) = self.state().archives.get(&image_id).cloned() {
            return Ok(path);
        }
        let path = self.scratch_dir()?.join(format!("image-{image_id}.zip"));
        self.stream_to(&archived_files_path(image_id), &path)?;
        self.state().archives.insert(image_id, path.clone());
        Ok(path)
    }

    fn stream_to(&self, path: &str, destination: &Path) -> Result<(), HrmOmeroError> {
        let url = self.url(path);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        let mut response = Self::handle_status(response)?;
        let mut file =
            File::create(destination).map_err(|err| HrmOmeroError::Filesystem(err.to_string()))?;
        io::copy(&mut response, &mut file)
            .map_err(|err| HrmOmeroError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

impl OmeroGateway for WebGateway {
    fn connect(&self) -> Result<bool, HrmOmeroError> {
        let has_session = self.state().context.is_some();
        if has_session && self.session_alive() {
            tracing::trace!("OMERO session still alive.");
            return Ok(true);
        }
        {
            let mut state = self.state();
            state.context = None;
            state.csrf = None;
        }
        self.login().map_err(|err| match err {
            HrmOmeroError::Connection(_) => err,
            other => HrmOmeroError::Connection(other.to_string()),
        })
    }

    fn close(&self) {
        if self.state().context.is_none() {
            return;
        }
        if let Err(err) = self.post_form("/webclient/logout/", &[]) {
            tracing::debug!("Logging out of OMERO failed: {err}");
        }
        let mut state = self.state();
        state.context = None;
        state.csrf = None;
        state.archives.clear();
        state.scratch = None;
        tracing::debug!("Closed OMERO connection.");
    }

    fn set_session_group(&self, group: i64) -> Result<(), HrmOmeroError> {
        if group == ALL_GROUPS {
            self.set_query_group(ALL_GROUPS);
            return Ok(());
        }
        let context = self.context()?;
        if !context.member_of_groups.is_empty() && !context.member_of_groups.contains(&group) {
            return Err(HrmOmeroError::GroupSwitch {
                group,
                message: format!("user [{}] is not a member", context.user_name),
            });
        }
        self.post_form("/webclient/active_group/", &[("active_group", group.to_string())])
            .map_err(|err| HrmOmeroError::GroupSwitch {
                group,
                message: err.to_string(),
            })?;
        let mut state = self.state();
        state.session_group = Some(group);
        state.query_group = group;
        Ok(())
    }

    fn set_query_group(&self, group: i64) {
        self.state().query_group = group;
    }

    fn session_key(&self) -> Option<String> {
        self.state()
            .context
            .as_ref()
            .and_then(|context| context.session_uuid.clone())
    }

    fn current_user(&self) -> Result<RemoteObject, HrmOmeroError> {
        let context = self.context()?;
        Ok(self
            .get_object(ObjectType::Experimenter, context.user_id)?
            .unwrap_or_else(|| {
                RemoteObject::new(ObjectType::Experimenter, context.user_id, context.user_name)
            }))
    }

    fn group_from_context(&self) -> Result<RemoteObject, HrmOmeroError> {
        let gid = self.active_group()?;
        self.get_object(ObjectType::ExperimenterGroup, gid)?
            .ok_or_else(|| HrmOmeroError::Remote(format!("group {gid} not found")))
    }

    fn get_object(
        &self,
        object_type: ObjectType,
        id: i64,
    ) -> Result<Option<RemoteObject>, HrmOmeroError> {
        let Some(kind) = api_kind(object_type) else {
            return Ok(None);
        };
        let body = self.find_json(&self.url(&format!("/api/v0/m/{kind}/{id}/")))?;
        Ok(body
            .as_ref()
            .and_then(|body| body.get("data"))
            .and_then(|data| remote_object_from_json(object_type, data)))
    }

    fn list_fileset_files(&self, image: &RemoteObject) -> Result<Vec<FilesetFile>, HrmOmeroError> {
        let body = self.get_json(
            &self.url(&format!("/webgateway/original_file_paths/{}/", image.id)),
            &[],
        )?;
        let repo_paths = body
            .get("repo")
            .and_then(Value::as_array)
            .map(|paths| {
                paths
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let mut state = self.state();
        let fileset_size = repo_paths.len();
        let mut files = Vec::with_capacity(fileset_size);
        for repo_path in repo_paths {
            state.next_file_id += 1;
            let file_id = state.next_file_id;
            state.files.insert(
                file_id,
                ArchivedFile {
                    image_id: image.id,
                    repo_path: repo_path.clone(),
                    fileset_size,
                },
            );
            files.push(FilesetFile::from_full_path(file_id, &repo_path));
        }
        Ok(files)
    }

    fn download_file(&self, file: &FilesetFile, destination: &Path) -> Result<(), HrmOmeroError> {
        let archived = self.state().files.get(&file.id).cloned().ok_or_else(|| {
            HrmOmeroError::Remote(format!("unknown fileset entry [{}]", file.full_path()))
        })?;
        if archived.fileset_size == 1 {
            return self.stream_to(&archived_files_path(archived.image_id), destination);
        }
        let archive = self.archive_for(archived.image_id)?;
        extract_entry(&archive, &archived.repo_path, destination)
    }

    fn thumbnail_bytes(&self, image: &RemoteObject) -> Result<Vec<u8>, HrmOmeroError> {
        let url = self.url(&format!("/webgateway/render_thumbnail/{}/", image.id));
        let response = self.send_with_retries(|| self.client.get(&url))?;
        let response = Self::handle_status(response)?;
        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| HrmOmeroError::Remote(err.to_string()))
    }

    fn groups_of_user(&self) -> Result<Vec<RemoteObject>, HrmOmeroError> {
        let context = self.context()?;
        let path = format!("/api/v0/m/experimenters/{}/experimentergroups/", context.user_id);
        let url = self.url(&path);
        let body = self.get_json(&url, &[("limit", PAGE_SIZE.to_string())])?;
        Ok(body
            .get("data")
            .and_then(Value::as_array)
            .map(|groups| {
                groups
                    .iter()
                    .filter_map(|value| remote_object_from_json(ObjectType::ExperimenterGroup, value))
                    .filter(|group| group.name != SYSTEM_USER_GROUP)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn colleagues(&self) -> Result<Vec<RemoteObject>, HrmOmeroError> {
        let context = self.context()?;
        let gid = self.active_group()?;
        let path = format!("/api/v0/m/experimentergroups/{gid}/experimenters/");
        let body = self.get_json(&self.url(&path), &[("limit", PAGE_SIZE.to_string())])?;
        Ok(body
            .get("data")
            .and_then(Value::as_array)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|value| remote_object_from_json(ObjectType::Experimenter, value))
                    .filter(|member| member.id != context.user_id)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_projects(&self, experimenter_id: i64) -> Result<Vec<RemoteObject>, HrmOmeroError> {
        self.list_objects(
            ObjectType::Project,
            "/api/v0/m/projects/",
            vec![("owner", experimenter_id.to_string())],
        )
    }

    fn list_children(&self, object: &RemoteObject) -> Result<Vec<RemoteObject>, HrmOmeroError> {
        match object.object_type {
            ObjectType::Project => self.list_objects(
                ObjectType::Dataset,
                &format!("/api/v0/m/projects/{}/datasets/", object.id),
                Vec::new(),
            ),
            ObjectType::Dataset => self.list_objects(
                ObjectType::Image,
                &format!("/api/v0/m/datasets/{}/images/", object.id),
                Vec::new(),
            ),
            ObjectType::Experimenter => self.list_projects(object.id),
            _ => Ok(Vec::new()),
        }
    }

    fn add_map_annotation(
        &self,
        image: &RemoteObject,
        namespace: &str,
        entries: &[(String, String)],
    ) -> Result<(), HrmOmeroError> {
        let pairs = entries
            .iter()
            .map(|(key, value)| [key.as_str(), value.as_str()])
            .collect::<Vec<_>>();
        let map = serde_json::to_string(&pairs)
            .map_err(|err| HrmOmeroError::Remote(err.to_string()))?;
        self.post_form(
            "/webclient/annotate_map/",
            &[
                ("image", image.id.to_string()),
                ("mapAnnotation", map),
                ("ns", namespace.to_string()),
            ],
        )?;
        Ok(())
    }
}

fn api_kind(object_type: ObjectType) -> Option<&'static str> {
    match object_type {
        ObjectType::Image => Some("images"),
        ObjectType::Dataset => Some("datasets"),
        ObjectType::Project => Some("projects"),
        ObjectType::Experimenter => Some("experimenters"),
        ObjectType::ExperimenterGroup => Some("experimentergroups"),
        ObjectType::BaseTree => None,
    }
}

fn archived_files_path(image_id: i64) -> String {
    format!("/webgateway/archived_files/download/{image_id}/")
}

fn select_server(servers: &Value, host: &str) -> Option<i64> {
    let entries = servers.get("data")?.as_array()?;
    let matching = entries
        .iter()
        .find(|entry| entry.get("host").and_then(Value::as_str) == Some(host));
    matching
        .or_else(|| entries.first())
        .and_then(|entry| entry.get("id"))
        .and_then(Value::as_i64)
}

fn remote_object_from_json(object_type: ObjectType, value: &Value) -> Option<RemoteObject> {
    let id = value.get("@id").and_then(Value::as_i64)?;
    let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);

    match object_type {
        ObjectType::Experimenter => {
            let login = text("UserName")?;
            let full_name = [text("FirstName"), text("LastName")]
                .into_iter()
                .flatten()
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            let object = RemoteObject::new(object_type, id, login);
            Some(if full_name.is_empty() {
                object
            } else {
                object.with_full_name(full_name)
            })
        }
        _ => {
            let name = text("Name").unwrap_or_default();
            let object = RemoteObject::new(object_type, id, name);
            let owner = value
                .get("omero:details")
                .and_then(|details| details.get("owner"));
            let owner_id = owner.and_then(|owner| owner.get("@id")).and_then(Value::as_i64);
            let owner_name = owner
                .and_then(|owner| owner.get("UserName"))
                .and_then(Value::as_str);
            Some(match (owner_id, owner_name) {
                (Some(owner_id), Some(owner_name)) => object.with_owner(owner_id, owner_name),
                _ => object,
            })
        }
    }
}

/// Extracts the archive entry matching `repo_path` to `destination`. Entries
/// are matched on the longest common path suffix, at least the file name.
fn extract_entry(archive: &Path, repo_path: &str, destination: &Path) -> Result<(), HrmOmeroError> {
    let file = File::open(archive).map_err(|err| {
        HrmOmeroError::Filesystem(format!("open zip {}: {err}", archive.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| HrmOmeroError::Filesystem(err.to_string()))?;

    let wanted = repo_path.split('/').rev().collect::<Vec<_>>();
    let mut best: Option<(usize, usize)> = None;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|err| HrmOmeroError::Filesystem(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry.enclosed_name() else {
            tracing::warn!("Skipping archive entry with unsafe path [{}].", entry.name());
            continue;
        };
        let parts = name
            .iter()
            .map(|part| part.to_string_lossy().to_string())
            .collect::<Vec<_>>();
        let matched = parts
            .iter()
            .rev()
            .zip(wanted.iter())
            .take_while(|(have, want)| have.as_str() == **want)
            .count();
        if matched > 0 && best.is_none_or(|(_, score)| matched > score) {
            best = Some((i, matched));
        }
    }

    let (index, _) = best.ok_or_else(|| {
        HrmOmeroError::Remote(format!("[{repo_path}] not found in the fileset archive"))
    })?;
    let mut entry = archive
        .by_index(index)
        .map_err(|err| HrmOmeroError::Filesystem(err.to_string()))?;
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|err| HrmOmeroError::Filesystem(err.to_string()))?;
    }
    let mut outfile =
        File::create(destination).map_err(|err| HrmOmeroError::Filesystem(err.to_string()))?;
    io::copy(&mut entry, &mut outfile).map_err(|err| HrmOmeroError::Filesystem(err.to_string()))?;
    Ok(())
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
