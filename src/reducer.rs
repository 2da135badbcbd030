//! In-memory document tree and its transition function
//!
//! `reduce` is the only place state changes. The per-image annotation lists
//! of the first area (`shadowCorrections`, `heroImages`) are index-aligned
//! with `section_images`; every branch that inserts, removes or reorders
//! images applies the same change to both lists.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{trace, warn};

use crate::model::{Area, Section, SectionImage, SensoryDetail, SensoryKind, UploadStatus, Venue};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Loading {
    pub venues: bool,
    pub sections: bool,
    pub images: bool,
    pub upload_image: bool,
    pub save_image: bool,
    pub data: bool,
    pub prompt: bool,
    pub content: bool,
}

/// Partial update of [`Loading`]; `None` leaves a flag untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadingPatch {
    pub venues: Option<bool>,
    pub sections: Option<bool>,
    pub images: Option<bool>,
    pub upload_image: Option<bool>,
    pub save_image: Option<bool>,
    pub data: Option<bool>,
    pub prompt: Option<bool>,
    pub content: Option<bool>,
}

impl LoadingPatch {
    pub fn venues(value: bool) -> Self {
        Self {
            venues: Some(value),
            ..Default::default()
        }
    }

    pub fn sections(value: bool) -> Self {
        Self {
            sections: Some(value),
            ..Default::default()
        }
    }

    pub fn images(value: bool) -> Self {
        Self {
            images: Some(value),
            ..Default::default()
        }
    }

    pub fn data(value: bool) -> Self {
        Self {
            data: Some(value),
            ..Default::default()
        }
    }

    pub fn upload_image(value: bool) -> Self {
        Self {
            upload_image: Some(value),
            ..Default::default()
        }
    }

    pub fn save_image(value: bool) -> Self {
        Self {
            save_image: Some(value),
            ..Default::default()
        }
    }

    pub fn prompt(value: bool) -> Self {
        Self {
            prompt: Some(value),
            ..Default::default()
        }
    }

    pub fn content(value: bool) -> Self {
        Self {
            content: Some(value),
            ..Default::default()
        }
    }
}

impl Loading {
    fn apply(&mut self, patch: LoadingPatch) {
        let slots = [
            (&mut self.venues, patch.venues),
            (&mut self.sections, patch.sections),
            (&mut self.images, patch.images),
            (&mut self.upload_image, patch.upload_image),
            (&mut self.save_image, patch.save_image),
            (&mut self.data, patch.data),
            (&mut self.prompt, patch.prompt),
            (&mut self.content, patch.content),
        ];
        for (slot, value) in slots {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct State {
    pub venue: Option<Venue>,
    pub section: Option<Section>,
    pub venues: Vec<Venue>,
    pub sections: Vec<Section>,
    pub section_images: Vec<SectionImage>,
    pub section_data: Vec<Area>,
    pub prompt: String,
    pub loading: Loading,
}

impl State {
    pub fn area(&self) -> Option<&Area> {
        self.section_data.first()
    }
}

/// One settable field of the first area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AreaField {
    Description(String),
    PromptInput(String),
    SectionId(Option<String>),
    SectionName(Option<String>),
    SectionFolderId(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SetVenues(Vec<Venue>),
    SetSections(Vec<Section>),
    SetSectionImages(Vec<SectionImage>),
    SetSectionData(Vec<Area>),
    SelectVenue(Option<Venue>),
    SelectSection(Option<Section>),
    SetLoading(LoadingPatch),
    AddItem(SensoryKind),
    UpdateItem {
        kind: SensoryKind,
        index: usize,
        value: String,
    },
    DeleteItem {
        kind: SensoryKind,
        index: usize,
    },
    UpdateSectionData(AreaField),
    SetPrompt(String),
    AppendImages(Vec<SectionImage>),
    SetImages {
        images: Vec<SectionImage>,
        shadow_corrections: Vec<bool>,
        hero_images: Vec<bool>,
    },
    UpdateImageStatus {
        index: usize,
        status: UploadStatus,
    },
    DeleteImage(usize),
    DeleteImageById(String),
    /// New order given as the image id at each position.
    ReorderImages(Vec<String>),
    ToggleShadowCorrection(usize),
    /// At most one hero image; selecting the current one clears it.
    SetHeroImage(usize),
}

fn first_area(data: &mut Vec<Area>) -> &mut Area {
    if data.is_empty() {
        data.push(Area::default());
    }
    &mut data[0]
}

/// Apply `f` to each annotation list of the first area that is present.
fn each_annotation(data: &mut [Area], mut f: impl FnMut(&mut Vec<bool>)) {
    if let Some(area) = data.first_mut() {
        for annotations in [&mut area.shadow_corrections, &mut area.hero_images]
            .into_iter()
            .flatten()
        {
            f(annotations);
        }
    }
}

fn remove_image(mut state: State, index: usize) -> State {
    if index >= state.section_images.len() {
        return state;
    }
    state.section_images.remove(index);
    each_annotation(&mut state.section_data, |annotations| {
        if index < annotations.len() {
            annotations.remove(index);
        }
    });
    state
}

/// Positions of the current images in the order of `keys`, if `keys` names
/// every image exactly once.
fn permutation(images: &[SectionImage], keys: &[String]) -> Option<Vec<usize>> {
    if keys.len() != images.len() {
        return None;
    }
    let mut positions = Vec::with_capacity(keys.len());
    for key in keys {
        let position = images.iter().position(|image| &image.id == key)?;
        if positions.contains(&position) {
            return None;
        }
        positions.push(position);
    }
    Some(positions)
}

fn reorder_images(mut state: State, index_to_key: Vec<String>) -> State {
    let Some(positions) = permutation(&state.section_images, &index_to_key) else {
        warn!(?index_to_key, "reorder does not name every image once, ignored");
        return state;
    };
    state.section_images = positions
        .iter()
        .map(|&position| state.section_images[position].clone())
        .collect();
    each_annotation(&mut state.section_data, |annotations| {
        *annotations = positions
            .iter()
            .map(|&position| annotations.get(position).copied().unwrap_or(false))
            .collect();
    });
    state
}

fn reset_section_scope(state: &mut State) {
    state.section_images = Vec::new();
    state.section_data = Vec::new();
    state.loading.images = false;
    state.loading.data = false;
}

pub fn reduce(mut state: State, action: Action) -> State {
    match action {
        Action::SetVenues(venues) => State { venues, ..state },
        Action::SetSections(sections) => State { sections, ..state },
        Action::SetSectionImages(section_images) => State {
            section_images,
            ..state
        },
        Action::SetSectionData(section_data) => State {
            section_data,
            ..state
        },
        Action::SelectVenue(venue) => {
            state.venue = venue;
            state.section = None;
            state.sections = Vec::new();
            state.loading.sections = false;
            reset_section_scope(&mut state);
            state
        }
        Action::SelectSection(section) => {
            let same = match (&state.section, &section) {
                (Some(current), Some(next)) => current.value == next.value,
                _ => false,
            };
            if !same {
                reset_section_scope(&mut state);
            }
            state.section = section;
            state
        }
        Action::SetLoading(patch) => {
            state.loading.apply(patch);
            state
        }
        Action::AddItem(kind) => {
            for area in &mut state.section_data {
                area.sensory_mut(kind).push(SensoryDetail::default());
            }
            state
        }
        Action::UpdateItem { kind, index, value } => {
            for area in &mut state.section_data {
                if let Some(item) = area.sensory_mut(kind).get_mut(index) {
                    item.value = value.clone();
                }
            }
            state
        }
        Action::DeleteItem { kind, index } => {
            for area in &mut state.section_data {
                let items = area.sensory_mut(kind);
                if index < items.len() {
                    items.remove(index);
                }
            }
            state
        }
        Action::UpdateSectionData(field) => {
            let area = first_area(&mut state.section_data);
            match field {
                AreaField::Description(value) => area.description = Some(value),
                AreaField::PromptInput(value) => area.prompt_input = Some(value),
                AreaField::SectionId(value) => area.section_id = value,
                AreaField::SectionName(value) => area.section_name = value,
                AreaField::SectionFolderId(value) => area.section_folder_id = value,
            }
            state
        }
        Action::SetPrompt(prompt) => State { prompt, ..state },
        Action::AppendImages(images) => {
            let added = images.len();
            state.section_images.extend(images.into_iter().map(|mut image| {
                image.status = Some(UploadStatus::Pending);
                image
            }));
            let total = state.section_images.len();
            each_annotation(&mut state.section_data, |annotations| {
                annotations.resize(total.max(annotations.len() + added), false);
            });
            state
        }
        Action::SetImages {
            images,
            shadow_corrections,
            hero_images,
        } => {
            let total = images.len();
            state.section_images = images;
            let area = first_area(&mut state.section_data);
            for (slot, mut annotations) in [
                (&mut area.shadow_corrections, shadow_corrections),
                (&mut area.hero_images, hero_images),
            ] {
                annotations.resize(total, false);
                *slot = Some(annotations);
            }
            state
        }
        Action::UpdateImageStatus { index, status } => {
            if let Some(image) = state.section_images.get_mut(index) {
                trace!(index, %status, "image status");
                image.status = Some(status);
            }
            state
        }
        Action::DeleteImage(index) => remove_image(state, index),
        Action::DeleteImageById(id) => {
            match state.section_images.iter().position(|image| image.id == id) {
                Some(index) => remove_image(state, index),
                None => state,
            }
        }
        Action::ReorderImages(index_to_key) => reorder_images(state, index_to_key),
        Action::ToggleShadowCorrection(index) => {
            let total = state.section_images.len();
            if index < total {
                let area = first_area(&mut state.section_data);
                let shadows = area.shadow_corrections.get_or_insert_with(Vec::new);
                if shadows.len() < total {
                    shadows.resize(total, false);
                }
                shadows[index] = !shadows[index];
            }
            state
        }
        Action::SetHeroImage(index) => {
            let total = state.section_images.len();
            if index < total {
                let area = first_area(&mut state.section_data);
                let heroes = area.hero_images.get_or_insert_with(Vec::new);
                if heroes.len() < total {
                    heroes.resize(total, false);
                }
                let selected = !heroes[index];
                heroes.iter_mut().for_each(|hero| *hero = false);
                heroes[index] = selected;
            }
            state
        }
    }
}

/// Owner of the current [`State`]. Actions are reduced synchronously, one at
/// a time.
#[derive(Default)]
pub struct Store {
    state: Mutex<State>,
}

impl Store {
    pub fn new(state: State) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn dispatch(&self, action: Action) {
        let mut state = self.lock();
        *state = reduce(std::mem::take(&mut *state), action);
    }

    pub fn snapshot(&self) -> State {
        self.lock().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        f(&self.lock())
    }
}
