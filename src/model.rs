//! Records exchanged with the remote API and persisted in the cache.
//!
//! Field names follow the camelCase wire format of the server.

use serde::{Deserialize, Serialize};

/// Processing state of a venue or section.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Pending,
    Incomplete,
    Processed,
}

/// Upload state of a single image.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Success,
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Success => "success",
            Self::Failed => "failed",
        })
    }
}

/// A record with a unique key inside its collection.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// A record that can be flagged as locally created.
pub trait Local {
    fn set_new(&mut self, is_new: bool);
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Venue {
    pub value: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_new: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProcessStatus>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub value: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_new: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProcessStatus>,
}

impl Venue {
    pub fn is_new(&self) -> bool {
        self.is_new.unwrap_or(false)
    }

    pub fn is_incomplete(&self) -> bool {
        self.status == Some(ProcessStatus::Incomplete)
    }
}

impl Section {
    pub fn is_new(&self) -> bool {
        self.is_new.unwrap_or(false)
    }

    pub fn is_incomplete(&self) -> bool {
        self.status == Some(ProcessStatus::Incomplete)
    }

    /// Sections created on the device carry a `new-` key until the server
    /// assigns a folder id.
    pub fn is_local_only(&self) -> bool {
        self.is_new() || self.value.starts_with("new-")
    }
}

#[derive(Serialize, Deserialize, derive_debug::Dbg, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SectionImage {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub mime_type: String,
    #[serde(default)]
    pub last_modified: i64,
    #[serde(default)]
    pub size: u64,
    pub id: String,
    #[dbg(skip)]
    #[serde(default)]
    pub blob: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<UploadStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_new: Option<bool>,
}

impl SectionImage {
    pub fn is_pending(&self) -> bool {
        self.status == Some(UploadStatus::Pending)
    }
}

impl Keyed for Venue {
    fn key(&self) -> &str {
        &self.value
    }
}

impl Keyed for Section {
    fn key(&self) -> &str {
        &self.value
    }
}

impl Keyed for SectionImage {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Local for Venue {
    fn set_new(&mut self, is_new: bool) {
        self.is_new = Some(is_new);
    }
}

impl Local for Section {
    fn set_new(&mut self, is_new: bool) {
        self.is_new = Some(is_new);
    }
}

impl Local for SectionImage {
    fn set_new(&mut self, is_new: bool) {
        self.is_new = Some(is_new);
    }
}

/// One of the four sensory categories of an area.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SensoryKind {
    Sounds,
    Smells,
    Feels,
    Sights,
}

impl std::str::FromStr for SensoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sounds" => Ok(Self::Sounds),
            "smells" => Ok(Self::Smells),
            "feels" => Ok(Self::Feels),
            "sights" => Ok(Self::Sights),
            other => Err(format!("unknown sensory category: {other}")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SensoryDetail {
    pub value: String,
}

impl From<String> for SensoryDetail {
    fn from(value: String) -> Self {
        Self { value }
    }
}

/// Content document of a section.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Area {
    #[serde(default)]
    pub sounds: Vec<SensoryDetail>,
    #[serde(default)]
    pub smells: Vec<SensoryDetail>,
    #[serde(default)]
    pub feels: Vec<SensoryDetail>,
    #[serde(default)]
    pub sights: Vec<SensoryDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow_corrections: Option<Vec<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hero_images: Option<Vec<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_folder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_input: Option<String>,
}

impl Area {
    pub fn sensory(&self, kind: SensoryKind) -> &Vec<SensoryDetail> {
        match kind {
            SensoryKind::Sounds => &self.sounds,
            SensoryKind::Smells => &self.smells,
            SensoryKind::Feels => &self.feels,
            SensoryKind::Sights => &self.sights,
        }
    }

    pub fn sensory_mut(&mut self, kind: SensoryKind) -> &mut Vec<SensoryDetail> {
        match kind {
            SensoryKind::Sounds => &mut self.sounds,
            SensoryKind::Smells => &mut self.smells,
            SensoryKind::Feels => &mut self.feels,
            SensoryKind::Sights => &mut self.sights,
        }
    }

    /// Lay `other` over `self`. Sensory lists always come from `other`;
    /// optional fields fall back to `self` when `other` leaves them unset.
    pub fn overlay(self, other: Area) -> Area {
        Area {
            sounds: other.sounds,
            smells: other.smells,
            feels: other.feels,
            sights: other.sights,
            section_name: other.section_name.or(self.section_name),
            shadow_corrections: other.shadow_corrections.or(self.shadow_corrections),
            hero_images: other.hero_images.or(self.hero_images),
            section_folder_id: other.section_folder_id.or(self.section_folder_id),
            section_id: other.section_id.or(self.section_id),
            description: other.description.or(self.description),
            prompt_input: other.prompt_input.or(self.prompt_input),
        }
    }
}

/// Snapshot of the whole form sent along with uploads.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedForm {
    pub areas: Vec<Area>,
    pub venue_name: String,
    #[serde(default)]
    pub prompt: String,
}

/// Sensory content produced by the generation endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedContent {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub feels: Vec<String>,
    #[serde(default)]
    pub sights: Vec<String>,
    #[serde(default)]
    pub smells: Vec<String>,
    #[serde(default)]
    pub sounds: Vec<String>,
}

impl From<GeneratedContent> for Area {
    fn from(content: GeneratedContent) -> Self {
        let details = |items: Vec<String>| items.into_iter().map(SensoryDetail::from).collect();
        Area {
            description: Some(content.description),
            feels: details(content.feels),
            sights: details(content.sights),
            smells: details(content.smells),
            sounds: details(content.sounds),
            ..Default::default()
        }
    }
}
