use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::{
    api::{
        self, Api, GenerateRequest, ImageUpload, RenameFolderRequest, SaveContentRequest,
        UploadResponse,
    },
    cache::MemoryStore,
    model::{Area, GeneratedContent, ProcessStatus, Section, SectionImage, UploadStatus, Venue},
    progress::{Level, ProgressReporter, SyncPhase},
    session::{Session, SessionOptions},
    upload::UploadPolicy,
};

mod selection;
mod sync;

#[derive(Clone)]
struct Reply<T> {
    delay: Duration,
    result: Result<T, String>,
}

/// Replies served in order; the last one repeats.
pub struct Script<T> {
    replies: Mutex<VecDeque<Reply<T>>>,
}

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T: Clone> Script<T> {
    pub fn reply(&self, delay: Duration, result: Result<T, &str>) {
        self.replies.lock().unwrap().push_back(Reply {
            delay,
            result: result.map_err(str::to_owned),
        });
    }

    pub fn ok(&self, value: T) {
        self.reply(Duration::ZERO, Ok(value));
    }

    pub fn fail(&self, message: &str) {
        self.reply(Duration::ZERO, Err(message));
    }

    async fn next(&self, cancel: &CancellationToken) -> Result<T, api::Error> {
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front()
            } else {
                replies.front().cloned()
            }
        };
        let Some(reply) = reply else {
            return Err(api::Error::transport("no scripted reply"));
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(api::Error::Cancelled),
            _ = tokio::time::sleep(reply.delay) => reply.result.map_err(api::Error::transport),
        }
    }
}

#[derive(Default)]
pub struct MockApi {
    pub venues: Script<Vec<Venue>>,
    pub sections: Script<Vec<Section>>,
    pub images: Script<Vec<SectionImage>>,
    pub areas: Script<Vec<Area>>,
    pub prompt: Script<String>,
    pub generated: Script<GeneratedContent>,
    pub saved: Script<String>,
    /// Upload file names that always fail.
    pub failing_uploads: Mutex<HashSet<String>>,
    pub folder_id: Mutex<Option<String>>,
    pub calls: Mutex<Vec<String>>,
}

impl MockApi {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
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
}

impl Api for MockApi {
    async fn venues(&self, cancel: &CancellationToken) -> Result<Vec<Venue>, api::Error> {
        self.record("venues".into());
        self.venues.next(cancel).await
    }

    async fn sections(
        &self,
        venue: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Section>, api::Error> {
        self.record(format!("sections:{venue}"));
        self.sections.next(cancel).await
    }

    async fn section_images(
        &self,
        venue: &str,
        section_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SectionImage>, api::Error> {
        self.record(format!("images:{venue}:{section_name}"));
        self.images.next(cancel).await
    }

    async fn section_data(
        &self,
        venue: &str,
        section_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Area>, api::Error> {
        self.record(format!("data:{venue}:{section_name}"));
        self.areas.next(cancel).await
    }

    async fn prompt(&self, cancel: &CancellationToken) -> Result<String, api::Error> {
        self.record("prompt".into());
        self.prompt.next(cancel).await
    }

    async fn update_prompt(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, api::Error> {
        self.record(format!("update-prompt:{prompt}"));
        self.saved.next(cancel).await
    }

    async fn upload_image(
        &self,
        upload: &ImageUpload,
        cancel: &CancellationToken,
    ) -> Result<UploadResponse, api::Error> {
        self.record(format!("upload:{}", upload.file_name));
        if cancel.is_cancelled() {
            return Err(api::Error::Cancelled);
        }
        if self
            .failing_uploads
            .lock()
            .unwrap()
            .contains(&upload.file_name)
        {
            return Err(api::Error::transport("connection reset"));
        }
        Ok(UploadResponse {
            message: "Image uploaded".into(),
            section_folder_id: self.folder_id.lock().unwrap().clone(),
        })
    }

    async fn save_content(
        &self,
        request: &SaveContentRequest,
        cancel: &CancellationToken,
    ) -> Result<String, api::Error> {
        self.record(format!("save:{}:{}", request.venue_name, request.section_name));
        self.saved.next(cancel).await
    }

    async fn generate_content(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<GeneratedContent, api::Error> {
        self.record(format!(
            "generate:{}:{}",
            request.files.len(),
            request.user_prompt
        ));
        self.generated.next(cancel).await
    }

    async fn rename_section_folder(
        &self,
        request: &RenameFolderRequest,
        cancel: &CancellationToken,
    ) -> Result<String, api::Error> {
        self.record(format!("rename:{}:{}", request.folder_id, request.new_name));
        self.saved.next(cancel).await
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    pub notices: Mutex<Vec<(Level, String)>>,
    pub phases: Mutex<Vec<SyncPhase>>,
    pub progress: Mutex<Vec<(usize, usize)>>,
}

impl RecordingReporter {
    pub fn has(&self, level: Level, message: &str) -> bool {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .any(|(l, m)| *l == level && m == message)
    }
}

impl ProgressReporter for RecordingReporter {
    fn set_phase(&self, phase: SyncPhase) {
        self.phases.lock().unwrap().push(phase);
    }

    fn track_images(&self, _names: Vec<String>) {}

    fn image_status(&self, _name: &str, _status: UploadStatus) {}

    fn batch_settled(&self, succeeded: usize, total: usize) {
        self.progress.lock().unwrap().push((succeeded, total));
    }

    fn notify(&self, level: Level, message: &str) {
        self.notices.lock().unwrap().push((level, message.into()));
    }

    fn finish(&self) {}
}

pub struct Harness {
    pub session: Session<MockApi, MemoryStore>,
    pub reporter: Arc<RecordingReporter>,
}

impl Harness {
    pub fn new() -> Self {
        let reporter = Arc::new(RecordingReporter::default());
        let options = SessionOptions {
            policy: UploadPolicy {
                batch_size: 3,
                max_retries: 2,
                backoff_base: Duration::from_millis(100),
                max_backoff: Duration::from_secs(1),
            },
            edit_debounce: Duration::from_millis(500),
            online: true,
        };
        let session = Session::new(
            MockApi::default(),
            MemoryStore::default(),
            reporter.clone(),
            options,
        );
        Self { session, reporter }
    }

    pub fn api(&self) -> &MockApi {
        self.session.api()
    }

    pub fn cache(&self) -> &MemoryStore {
        self.session.cache()
    }
}

pub async fn load_fixture<T: DeserializeOwned>(path: &str) -> T {
    let src = tokio::fs::read_to_string(path).await.unwrap();
    serde_json::from_str(&src).unwrap()
}

pub fn venue(value: &str, label: &str) -> Venue {
    Venue {
        value: value.into(),
        label: label.into(),
        is_new: None,
        status: None,
    }
}

pub fn section(value: &str, label: &str) -> Section {
    Section {
        value: value.into(),
        label: label.into(),
        is_new: None,
        status: None,
    }
}

pub fn incomplete(section: Section) -> Section {
    Section {
        status: Some(ProcessStatus::Incomplete),
        ..section
    }
}

pub fn image(id: &str, status: UploadStatus) -> SectionImage {
    SectionImage {
        name: format!("{id}.jpg"),
        mime_type: "image/jpeg".into(),
        last_modified: 0,
        size: 3,
        id: id.into(),
        blob: String::new(),
        path: format!("/photos/{id}.jpg"),
        status: Some(status),
        is_new: Some(true),
    }
}
