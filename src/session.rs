//! Survey session: selection, fetching, editing and syncing of one venue
//! section at a time.
//!
//! A `Session` owns the store, the request registry and the clients for one
//! lifetime scope. Every async continuation re-checks the registry before it
//! commits, so nothing lands after [`Session::teardown`].

use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    api::{self, Api, GenerateRequest, ImageUpload, RenameFolderRequest, SaveContentRequest},
    cache::{self, EntityKind, Scope},
    config::Config,
    debounce::Debouncer,
    model::{Area, CompletedForm, ProcessStatus, Section, SectionImage, UploadStatus, Venue},
    pipeline::FetchPipeline,
    progress::{Level, ProgressReporter, SyncPhase},
    reducer::{Action, AreaField, LoadingPatch, State, Store},
    request::{RequestHandle, RequestRegistry, UPLOAD_PREFIX},
    upload::{UploadItem, UploadPolicy, UploadReport, UploadSink, Uploader, upload_pending},
};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub policy: UploadPolicy,
    pub edit_debounce: Duration,
    pub online: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            policy: UploadPolicy::default(),
            edit_debounce: Duration::from_millis(500),
            online: true,
        }
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            policy: (&config.upload).into(),
            edit_debounce: config.edit_debounce(),
            online: config.online,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SectionEdit {
    sections: Vec<Section>,
    selected: Option<Section>,
}

pub struct Session<A, C> {
    api: A,
    cache: C,
    requests: RequestRegistry,
    store: Store,
    reporter: Arc<dyn ProgressReporter>,
    policy: UploadPolicy,
    online: AtomicBool,
    section_edits: Mutex<Debouncer<SectionEdit>>,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn completed_form(state: &State, venue: &Venue) -> CompletedForm {
    CompletedForm {
        areas: state.section_data.clone(),
        venue_name: venue.value.clone(),
        prompt: state.prompt.clone(),
    }
}

struct SectionUploader<'a, A> {
    api: &'a A,
    store: &'a Store,
    venue: &'a Venue,
    section: &'a Section,
}

impl<A: Api> Uploader for SectionUploader<'_, A> {
    type Error = api::Error;

    async fn upload(
        &self,
        item: &UploadItem,
        cancel: &CancellationToken,
    ) -> Result<(), api::Error> {
        if cancel.is_cancelled() {
            return Err(api::Error::Cancelled);
        }
        let completed_form = self.store.read(|state| completed_form(state, self.venue));
        let upload = ImageUpload {
            path: item.path.clone(),
            mime_type: item.mime_type.clone(),
            file_name: item.file_name(),
            section_name: self.section.label.clone(),
            venue_name: self.venue.label.clone(),
            completed_form,
        };
        let response = self.api.upload_image(&upload, cancel).await?;
        if let Some(folder_id) = response.section_folder_id
            && !cancel.is_cancelled()
        {
            self.store.dispatch(Action::UpdateSectionData(
                AreaField::SectionFolderId(Some(folder_id)),
            ));
        }
        Ok(())
    }
}

struct StoreSink<'a> {
    store: &'a Store,
    requests: &'a RequestRegistry,
    handle: &'a RequestHandle,
    reporter: &'a dyn ProgressReporter,
    names: Vec<String>,
}

impl StoreSink<'_> {
    fn name(&self, index: usize) -> &str {
        self.names.get(index).map_or("image", String::as_str)
    }
}

impl UploadSink for StoreSink<'_> {
    fn status(&self, index: usize, status: UploadStatus) {
        if !self.requests.is_live(self.handle) {
            return;
        }
        self.store
            .dispatch(Action::UpdateImageStatus { index, status });
        self.reporter.image_status(self.name(index), status);
    }

    fn batch_settled(&self, succeeded: usize, total: usize) {
        if !self.requests.is_live(self.handle) {
            return;
        }
        self.reporter.batch_settled(succeeded, total);
        self.reporter
            .notify(Level::Info, &format!("Uploaded {succeeded} of {total} images..."));
    }
}

impl<A: Api, C: cache::Client> Session<A, C> {
    pub fn new(api: A, cache: C, reporter: Arc<dyn ProgressReporter>, options: SessionOptions) -> Self {
        Self {
            api,
            cache,
            requests: RequestRegistry::new(),
            store: Store::default(),
            reporter,
            policy: options.policy,
            online: AtomicBool::new(options.online),
            section_edits: Mutex::new(Debouncer::new(options.edit_debounce)),
        }
    }

    fn pipeline(&self) -> FetchPipeline<'_, C> {
        FetchPipeline {
            cache: &self.cache,
            requests: &self.requests,
            store: &self.store,
            reporter: &*self.reporter,
            online: self.is_online(),
        }
    }

    fn section_edits(&self) -> MutexGuard<'_, Debouncer<SectionEdit>> {
        self.section_edits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> State {
        self.store.snapshot()
    }

    pub fn dispatch(&self, action: Action) {
        self.store.dispatch(action);
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn requests(&self) -> &RequestRegistry {
        &self.requests
    }

    pub fn reporter(&self) -> &dyn ProgressReporter {
        &*self.reporter
    }

    pub fn set_online(&self, online: bool) {
        info!(online, "connectivity changed");
        self.online.store(online, Ordering::Release);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    fn selection(&self) -> Option<(State, Venue, Section)> {
        let state = self.state();
        let venue = state.venue.clone()?;
        let section = state.section.clone()?;
        Some((state, venue, section))
    }

    pub async fn fetch_venues(&self) -> Option<Vec<Venue>> {
        let api = &self.api;
        self.pipeline()
            .fetch_entity(&Scope::Root, true, |token| async move {
                api.venues(&token).await
            })
            .await
    }

    async fn fetch_sections(&self, venue: &Venue) -> Option<Vec<Section>> {
        let api = &self.api;
        let venue_id = venue.value.clone();
        self.pipeline()
            .fetch_entity(
                &Scope::venue(&venue.value),
                !venue.is_incomplete(),
                |token| async move { api.sections(&venue_id, &token).await },
            )
            .await
    }

    /// Select `venue`, dropping everything fetched for the previous one.
    pub async fn select_venue(&self, venue: Option<Venue>) {
        let cancelled = self.requests.cancel_scoped();
        debug!(cancelled, venue = ?venue.as_ref().map(|v| &v.value), "select venue");
        self.store.dispatch(Action::SelectVenue(venue.clone()));
        let Some(venue) = venue else {
            return;
        };
        if !venue.is_new() {
            self.fetch_sections(&venue).await;
            return;
        }

        let section = Section {
            value: format!("new-{}", now_millis()),
            label: "1".into(),
            is_new: Some(true),
            status: Some(ProcessStatus::Incomplete),
        };
        self.store
            .dispatch(Action::SetSections(vec![section.clone()]));
        self.store
            .dispatch(Action::SelectSection(Some(section.clone())));
        if let Some(slot) = EntityKind::Sections.slot(&Scope::venue(&venue.value)) {
            cache::append_unique(&self.cache, &slot.offline, &[section]).await;
        }
        if let Some(slot) = EntityKind::Venues.slot(&Scope::Root) {
            cache::append_unique(&self.cache, &slot.offline, &[venue]).await;
        }
    }

    /// Select `section` of the current venue and load its images and content.
    pub async fn select_section(&self, section: Option<Section>) {
        self.requests
            .cancel_all(|id| id.starts_with("images-") || id.starts_with("data-"));
        self.store.dispatch(Action::SelectSection(section.clone()));
        self.store.dispatch(Action::SetLoading(LoadingPatch {
            images: Some(false),
            data: Some(false),
            ..Default::default()
        }));
        self.store.dispatch(Action::SetSectionImages(Vec::new()));
        self.store.dispatch(Action::SetSectionData(Vec::new()));
        let (Some(section), Some(venue)) = (section, self.state().venue) else {
            return;
        };
        if section.label.is_empty() || section.value.is_empty() {
            return;
        }

        let scope = Scope::section(&venue.value, &section.value);
        let should_fetch_online = !section.is_incomplete();
        let pipeline = self.pipeline();
        let api = &self.api;
        let images = pipeline.fetch_entity::<SectionImage, _, _>(&scope, should_fetch_online, |token| {
            let (venue, label) = (venue.value.clone(), section.label.clone());
            async move { api.section_images(&venue, &label, &token).await }
        });
        let data = pipeline.fetch_entity::<Area, _, _>(&scope, should_fetch_online, |token| {
            let (venue, label) = (venue.value.clone(), section.label.clone());
            async move { api.section_data(&venue, &label, &token).await }
        });
        futures::join!(images, data);
    }

    /// Upload every pending image of the selected section.
    pub async fn upload_images(&self) -> UploadReport {
        let Some((state, venue, section)) = self.selection() else {
            self.reporter.notify(Level::Warning, "Select a venue and section first");
            return UploadReport::default();
        };
        let items = UploadItem::pending(&state.section_images);
        if items.is_empty() {
            self.reporter.notify(Level::Info, "No pending images to upload");
            return UploadReport::default();
        }

        self.store.dispatch(Action::UpdateSectionData(AreaField::SectionId(Some(
            section.value.clone(),
        ))));
        self.store
            .dispatch(Action::SetLoading(LoadingPatch::upload_image(true)));
        self.reporter
            .notify(Level::Info, &format!("Uploading {} images...", items.len()));
        self.reporter.set_phase(SyncPhase::Uploading);
        let names = state
            .section_images
            .iter()
            .map(|image| image.name.clone())
            .collect::<Vec<_>>();
        self.reporter.track_images(
            items
                .iter()
                .filter_map(|item| names.get(item.index).cloned())
                .collect(),
        );

        let handle = self
            .requests
            .begin(format!("{UPLOAD_PREFIX}{}-{}", venue.value, section.value));
        let uploader = SectionUploader {
            api: &self.api,
            store: &self.store,
            venue: &venue,
            section: &section,
        };
        let sink = StoreSink {
            store: &self.store,
            requests: &self.requests,
            handle: &handle,
            reporter: &*self.reporter,
            names,
        };
        let report = upload_pending(&items, &self.policy, handle.token(), &uploader, &sink).await;

        self.requests.end(&handle);
        if !self.requests.is_alive() {
            return report;
        }
        let uploaded = report
            .succeeded_indices()
            .filter_map(|index| state.section_images.get(index))
            .map(|image| image.id.clone())
            .collect::<Vec<_>>();
        self.prune_synced(&venue, &section, &uploaded, report.all_succeeded())
            .await;
        if handle.is_cancelled() {
            debug!(venue = %venue.value, section = %section.value, "upload scope left before it finished");
            if !self.requests.any_active(|id| id.starts_with(UPLOAD_PREFIX)) {
                self.store
                    .dispatch(Action::SetLoading(LoadingPatch::upload_image(false)));
            }
            return report;
        }

        self.store
            .dispatch(Action::SetLoading(LoadingPatch::upload_image(false)));
        self.reporter.notify(Level::Info, "Image upload complete");
        if report.all_succeeded() {
            self.mark_processed(&section);
        }
        report
    }

    /// Drop synced records from the offline slots of `section`.
    async fn prune_synced(
        &self,
        venue: &Venue,
        section: &Section,
        uploaded: &[String],
        section_synced: bool,
    ) {
        let scope = Scope::section(&venue.value, &section.value);
        if let Some(slot) = EntityKind::Images.slot(&scope)
            && !uploaded.is_empty()
        {
            let mut images = cache::read_records::<_, SectionImage>(&self.cache, &slot.offline).await;
            images.retain(|image| !uploaded.contains(&image.id));
            cache::write_document(&self.cache, &slot.offline, &images).await;
        }
        if !section_synced {
            return;
        }

        if let Some(slot) = EntityKind::Data.slot(&scope) {
            cache::write_document(&self.cache, &slot.offline, &Vec::<Area>::new()).await;
        }
        if let Some(slot) = EntityKind::Sections.slot(&Scope::venue(&venue.value)) {
            let mut sections = cache::read_records::<_, Section>(&self.cache, &slot.offline).await;
            sections.retain(|offline| offline.value != section.value);
            cache::write_document(&self.cache, &slot.offline, &sections).await;
        }
        if let Some(slot) = EntityKind::Venues.slot(&Scope::Root) {
            let mut venues = cache::read_records::<_, Venue>(&self.cache, &slot.offline).await;
            if venues.iter().any(|offline| offline.value == venue.value) {
                venues.retain(|offline| offline.value != venue.value);
                cache::write_document(&self.cache, &slot.offline, &venues).await;
            }
        }

        info!(venue = %venue.value, section = %section.value, "cleared offline cache after successful uploads");
    }

    /// Flag `section` as processed in the section list and the selection.
    fn mark_processed(&self, section: &Section) {
        let processed = |record: &Section| Section {
            status: Some(ProcessStatus::Processed),
            ..record.clone()
        };
        let sections = self
            .state()
            .sections
            .iter()
            .map(|record| {
                if record.value == section.value {
                    processed(record)
                } else {
                    record.clone()
                }
            })
            .collect();
        self.store.dispatch(Action::SetSections(sections));
        if self
            .state()
            .section
            .is_some_and(|selected| selected.value == section.value)
        {
            self.store
                .dispatch(Action::SelectSection(Some(processed(section))));
        }
    }

    /// Replace the images of the selected section along with their
    /// annotations, and keep the unsynced ones in the offline slots.
    pub async fn save_images(
        &self,
        images: Vec<SectionImage>,
        shadow_corrections: Vec<bool>,
        hero_images: Vec<bool>,
    ) -> bool {
        self.store
            .dispatch(Action::SetLoading(LoadingPatch::save_image(true)));
        let state = self.state();
        let unsynced = images
            .iter()
            .filter(|image| {
                !state
                    .section_images
                    .iter()
                    .any(|existing| existing.id == image.id && !existing.is_pending())
            })
            .cloned()
            .collect::<Vec<_>>();
        self.store.dispatch(Action::SetImages {
            images,
            shadow_corrections,
            hero_images,
        });

        let mut saved = true;
        if let (Some(venue), Some(section)) = (&state.venue, &state.section) {
            let scope = Scope::section(&venue.value, &section.value);
            let area = self.state().section_data.into_iter().take(1).collect::<Vec<_>>();
            if let Some(slot) = EntityKind::Images.slot(&scope) {
                saved &= cache::write_document(&self.cache, &slot.offline, &unsynced).await;
            }
            if let Some(slot) = EntityKind::Data.slot(&scope) {
                saved &= cache::write_document(&self.cache, &slot.offline, &area).await;
            }
        }
        if saved {
            self.reporter.notify(Level::Info, "Images saved successfully");
        } else {
            self.reporter.notify(Level::Error, "Failed to save images");
        }
        self.store
            .dispatch(Action::SetLoading(LoadingPatch::save_image(false)));
        saved
    }

    /// Generate sensory content from the images of the selected section.
    pub async fn generate_content(&self) -> Option<Area> {
        let state = self.state();
        if state.section_images.is_empty() {
            self.reporter
                .notify(Level::Warning, "Please add images before generating content");
            return None;
        }
        self.store
            .dispatch(Action::SetLoading(LoadingPatch::content(true)));
        self.reporter.notify(Level::Info, "Generating content...");
        self.reporter.set_phase(SyncPhase::Generating);
        let handle = self.requests.begin("generate-content");

        let request = GenerateRequest {
            files: state.section_images.clone(),
            user_prompt: state
                .area()
                .and_then(|area| area.prompt_input.clone())
                .unwrap_or_default(),
        };
        let result = self.api.generate_content(&request, handle.token()).await;
        let mut generated = None;
        if self.requests.is_live(&handle) {
            match result {
                Ok(content) => {
                    let area = self
                        .state()
                        .area()
                        .cloned()
                        .unwrap_or_default()
                        .overlay(content.into());
                    self.store
                        .dispatch(Action::SetSectionData(vec![area.clone()]));
                    self.reporter.notify(Level::Info, "Content generated successfully");
                    generated = Some(area);
                }
                Err(api::Error::Cancelled) => {}
                Err(error) => {
                    error!(%error, "failed to generate content");
                    self.reporter
                        .notify(Level::Error, "Failed to generate content. Please try again.");
                }
            }
        }
        self.finish_request(&handle, LoadingPatch::content(false));
        generated
    }

    /// Submit the content of the selected section.
    pub async fn save_content(&self) -> bool {
        let Some((state, venue, section)) = self.selection() else {
            self.reporter.notify(Level::Warning, "Select a venue and section first");
            return false;
        };
        self.store
            .dispatch(Action::SetLoading(LoadingPatch::content(true)));
        self.reporter.set_phase(SyncPhase::Saving);
        let handle = self.requests.begin("save-content");

        let area = state.area().cloned().unwrap_or_default();
        let request = SaveContentRequest {
            venue_name: venue.label.clone(),
            section_name: section.label.clone(),
            prompt_input: area.prompt_input.clone().unwrap_or_default(),
            sensory_data: area,
            completed_form: completed_form(&state, &venue),
        };
        let result = self.api.save_content(&request, handle.token()).await;
        let mut saved = false;
        if self.requests.is_live(&handle) {
            match result {
                Ok(message) => {
                    self.reporter.notify(Level::Info, &message);
                    saved = true;
                }
                Err(api::Error::Cancelled) => {}
                Err(error) => {
                    error!(%error, "failed to save content");
                    // keep the edit for the next session
                    if let Some(slot) =
                        EntityKind::Data.slot(&Scope::section(&venue.value, &section.value))
                    {
                        cache::write_document(&self.cache, &slot.offline, &state.section_data)
                            .await;
                    }
                    self.reporter
                        .notify(Level::Error, "Failed to save content. Please try again.");
                }
            }
        }
        self.finish_request(&handle, LoadingPatch::content(false));
        saved
    }

    pub async fn fetch_prompt(&self) -> Option<String> {
        self.store
            .dispatch(Action::SetLoading(LoadingPatch::prompt(true)));
        let handle = self.requests.begin("prompt");
        let result = self.api.prompt(handle.token()).await;
        let mut prompt = None;
        if self.requests.is_live(&handle) {
            match result {
                Ok(fetched) => {
                    self.store.dispatch(Action::SetPrompt(fetched.clone()));
                    prompt = Some(fetched);
                }
                Err(api::Error::Cancelled) => {}
                Err(error) => error!(%error, "failed to fetch prompt"),
            }
        }
        self.finish_request(&handle, LoadingPatch::prompt(false));
        prompt
    }

    pub async fn update_prompt(&self, prompt: &str) -> bool {
        if self.state().prompt == prompt {
            self.reporter
                .notify(Level::Warning, "Please change prompt before updating prompt");
            return false;
        }
        self.store
            .dispatch(Action::SetLoading(LoadingPatch::prompt(true)));
        let handle = self.requests.begin("update-prompt");
        let result = self.api.update_prompt(prompt, handle.token()).await;
        let mut updated = false;
        if self.requests.is_live(&handle) {
            match result {
                Ok(message) => {
                    self.reporter.notify(Level::Info, &message);
                    self.store.dispatch(Action::SetPrompt(prompt.to_owned()));
                    updated = true;
                }
                Err(api::Error::Cancelled) => {}
                Err(error) => {
                    error!(%error, "failed to update prompt");
                    self.reporter.notify(Level::Error, "Failed to update prompt");
                }
            }
        }
        self.finish_request(&handle, LoadingPatch::prompt(false));
        updated
    }

    fn finish_request(&self, handle: &RequestHandle, loading: LoadingPatch) {
        if self.requests.is_alive() {
            self.store.dispatch(Action::SetLoading(loading));
        }
        self.requests.end(handle);
    }

    /// Queue an edit of the section list; only the last edit within the
    /// debounce window is committed by [`Session::flush_section_edits`].
    pub fn edit_sections(&self, sections: Vec<Section>, selected: Option<Section>) {
        self.section_edits()
            .call(SectionEdit { sections, selected });
    }

    /// Wait for the debounce window to pass and commit the pending edit.
    /// Returns whether an edit was committed.
    pub async fn flush_section_edits(&self) -> bool {
        loop {
            let Some(deadline) = self.section_edits().deadline() else {
                return false;
            };
            tokio::time::sleep_until(deadline).await;
            let edit = self.section_edits().poll();
            if let Some(edit) = edit {
                self.commit_section_edit(edit).await;
                return true;
            }
        }
    }

    async fn commit_section_edit(&self, edit: SectionEdit) {
        if !self.requests.is_alive() {
            return;
        }
        self.store
            .dispatch(Action::SetSections(edit.sections.clone()));
        if let Some(section) = &edit.selected {
            self.store
                .dispatch(Action::SelectSection(Some(section.clone())));
        }
        if let Some(venue) = self.state().venue
            && let Some(slot) = EntityKind::Sections.slot(&Scope::venue(&venue.value))
        {
            cache::write_document(&self.cache, &slot.offline, &edit.sections).await;
        }
        if let Some(section) = edit.selected
            && !section.is_local_only()
        {
            self.rename_folder(&section).await;
        }
    }

    async fn rename_folder(&self, section: &Section) {
        let state = self.state();
        let Some(venue) = state.venue.clone() else {
            return;
        };
        let handle = self.requests.begin("rename-folder");
        let request = RenameFolderRequest {
            new_name: section.label.clone(),
            folder_id: section.value.clone(),
            completed_form: completed_form(&state, &venue),
        };
        let result = self
            .api
            .rename_section_folder(&request, handle.token())
            .await;
        if self.requests.is_live(&handle) {
            match result {
                Ok(message) => self.reporter.notify(Level::Info, &message),
                Err(api::Error::Cancelled) => {}
                Err(error) => {
                    warn!(%error, folder_id = %section.value, "failed to rename section folder")
                }
            }
        }
        self.requests.end(&handle);
    }

    /// Cancel everything in flight and refuse further commits.
    pub fn teardown(&self) {
        self.requests.teardown();
        if self.section_edits().take().is_some() {
            debug!("pending section edit dropped");
        }
    }
}
