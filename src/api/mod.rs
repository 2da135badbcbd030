//! Remote survey API
//!
//! Every call takes the cancellation token of the request it belongs to and
//! resolves to [`Error::Cancelled`] once that token fires.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_with::{json::JsonString, serde_as};
use tokio_util::sync::CancellationToken;

use crate::model::{Area, CompletedForm, GeneratedContent, Section, SectionImage, Venue};

pub mod http;
pub mod image;

pub use http::HttpApi;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(BoxError),
    #[error("request cancelled")]
    Cancelled,
    #[error("rejected by server: {0}")]
    Rejected(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("failed to read image ({path}): {error}")]
    Io { error: std::io::Error, path: String },
    #[error("failed to process image ({name}): {error}")]
    Image {
        error: ::image::ImageError,
        name: String,
    },
}

impl Error {
    pub fn transport(error: impl Into<BoxError>) -> Self {
        Self::Transport(error.into())
    }
}

/// Form fields of one image upload.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageUpload {
    /// Local path or `data:` URI of the image.
    pub path: String,
    pub mime_type: String,
    /// File name of the multipart part, `{index + 1}.jpg`.
    pub file_name: String,
    pub section_name: String,
    pub venue_name: String,
    pub completed_form: CompletedForm,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub section_folder_id: Option<String>,
}

#[serde_as]
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SaveContentRequest {
    pub venue_name: String,
    pub section_name: String,
    pub prompt_input: String,
    #[serde_as(as = "JsonString")]
    pub sensory_data: Area,
    #[serde_as(as = "JsonString")]
    pub completed_form: CompletedForm,
}

#[serde_as]
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenameFolderRequest {
    pub new_name: String,
    pub folder_id: String,
    #[serde_as(as = "JsonString")]
    pub completed_form: CompletedForm,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub files: Vec<SectionImage>,
    pub user_prompt: String,
}

/// `formData` payload of the section data endpoint.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SectionData {
    #[serde(default)]
    pub areas: Vec<Area>,
    #[serde(default)]
    pub venue_name: String,
}

#[serde_as]
#[derive(Deserialize)]
pub(crate) struct GeneratedEnvelope {
    #[serde_as(as = "JsonString")]
    pub description: GeneratedContent,
}

/// Extract `field` from a `{message, <field>}` response envelope.
pub fn open_envelope<T: DeserializeOwned>(
    mut body: serde_json::Value,
    field: &str,
) -> Result<T, Error> {
    let message = body
        .get("message")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    if message != "success" {
        return Err(Error::Rejected(if message.is_empty() {
            "missing message".to_string()
        } else {
            message.to_string()
        }));
    }
    let payload = body
        .get_mut(field)
        .map(serde_json::Value::take)
        .ok_or_else(|| Error::Malformed(format!("missing {field}")))?;
    serde_json::from_value(payload).map_err(|error| Error::Malformed(format!("{field}: {error}")))
}

/// Decode the JSON string carried in `formData`.
pub fn decode_form_data(form_data: &str) -> Result<SectionData, Error> {
    serde_json::from_str(form_data).map_err(|error| Error::Malformed(format!("formData: {error}")))
}

/// Message of a plain `{message}` acknowledgement.
pub fn acknowledgement(body: &serde_json::Value) -> String {
    body.get("message")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub trait Api {
    fn venues(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<Venue>, Error>>;

    fn sections(
        &self,
        venue: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<Section>, Error>>;

    /// Images of a section; the server addresses sections by label.
    fn section_images(
        &self,
        venue: &str,
        section_name: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<SectionImage>, Error>>;

    fn section_data(
        &self,
        venue: &str,
        section_name: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<Area>, Error>>;

    fn prompt(&self, cancel: &CancellationToken) -> impl Future<Output = Result<String, Error>>;

    fn update_prompt(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<String, Error>>;

    fn upload_image(
        &self,
        upload: &ImageUpload,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<UploadResponse, Error>>;

    fn save_content(
        &self,
        request: &SaveContentRequest,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<String, Error>>;

    fn generate_content(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<GeneratedContent, Error>>;

    fn rename_section_folder(
        &self,
        request: &RenameFolderRequest,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<String, Error>>;
}
