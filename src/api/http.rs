use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{
    Api, Error, GenerateRequest, GeneratedEnvelope, ImageUpload, RenameFolderRequest,
    SaveContentRequest, UploadResponse, acknowledgement, decode_form_data, image, open_envelope,
};
use crate::{
    config::{ApiConfig, Endpoints},
    model::{Area, GeneratedContent, Section, SectionImage, Venue},
};

/// [`Api`] over HTTP with `reqwest`.
pub struct HttpApi {
    client: reqwest::Client,
    base_url: url::Url,
    endpoints: Endpoints,
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

impl HttpApi {
    pub fn new(config: &ApiConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(Error::transport)?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            endpoints: config.endpoints.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<url::Url, Error> {
        self.base_url.join(path).map_err(Error::transport)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<serde_json::Value, Error> {
        let response = request
            .send()
            .await
            .inspect_err(|error| error!(%error, "request failed"))
            .map_err(Error::transport)?;
        let status = response.status();
        let url = response.url().clone();
        debug!(%status, %url, "response received");
        let response = response
            .error_for_status()
            .inspect_err(|error| error!(%error, %status, %url, "server returned error status"))
            .map_err(Error::transport)?;
        let body = response.bytes().await.map_err(Error::transport)?;
        serde_json::from_slice(&body)
            .inspect_err(|error| error!(%error, %url, "response is not json"))
            .map_err(|error| Error::Malformed(error.to_string()))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        field: &str,
        cancel: &CancellationToken,
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!(%url, ?query, "GET");
        let body = cancellable(cancel, self.send(self.client.get(url).query(query))).await?;
        open_envelope(body, field)
    }

    async fn post_json(
        &self,
        path: &str,
        payload: &impl serde::Serialize,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, Error> {
        let url = self.url(path)?;
        debug!(%url, "POST");
        cancellable(cancel, self.send(self.client.post(url).json(payload))).await
    }

    async fn post_multipart(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, Error> {
        let url = self.url(path)?;
        debug!(%url, "POST multipart");
        cancellable(cancel, self.send(self.client.post(url).multipart(form))).await
    }
}

fn file_part(
    body: Vec<u8>,
    file_name: String,
    mime_type: &str,
    path: &str,
) -> Result<reqwest::multipart::Part, Error> {
    let mime = mime_type
        .parse::<mime::Mime>()
        .unwrap_or_else(|_| mime_guess::from_path(path).first_or_octet_stream());
    reqwest::multipart::Part::bytes(body)
        .file_name(file_name)
        .mime_str(mime.as_ref())
        .map_err(Error::transport)
}

impl Api for HttpApi {
    async fn venues(&self, cancel: &CancellationToken) -> Result<Vec<Venue>, Error> {
        self.get(&self.endpoints.venues, &[], "venues", cancel).await
    }

    async fn sections(
        &self,
        venue: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Section>, Error> {
        self.get(&self.endpoints.sections, &[("id", venue)], "sectionList", cancel)
            .await
    }

    async fn section_images(
        &self,
        venue: &str,
        section_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SectionImage>, Error> {
        self.get(
            &self.endpoints.section_images,
            &[("venueId", venue), ("sectionName", section_name)],
            "images",
            cancel,
        )
        .await
    }

    async fn section_data(
        &self,
        venue: &str,
        section_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Area>, Error> {
        let form_data: String = self
            .get(
                &self.endpoints.section_data,
                &[("venueId", venue), ("sectionName", section_name)],
                "formData",
                cancel,
            )
            .await?;
        Ok(decode_form_data(&form_data)?.areas)
    }

    async fn prompt(&self, cancel: &CancellationToken) -> Result<String, Error> {
        self.get(&self.endpoints.prompt, &[], "prompt", cancel).await
    }

    async fn update_prompt(&self, prompt: &str, cancel: &CancellationToken) -> Result<String, Error> {
        let body = self
            .post_json(
                &self.endpoints.update_prompt,
                &serde_json::json!({ "prompt": prompt }),
                cancel,
            )
            .await?;
        Ok(acknowledgement(&body))
    }

    async fn upload_image(
        &self,
        upload: &ImageUpload,
        cancel: &CancellationToken,
    ) -> Result<UploadResponse, Error> {
        let body = cancellable(cancel, image::load(&upload.path)).await?;
        let completed_form = serde_json::to_string(&upload.completed_form)
            .map_err(|error| Error::Malformed(error.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part(
                "image",
                file_part(body, upload.file_name.clone(), &upload.mime_type, &upload.path)?,
            )
            .text("sectionName", upload.section_name.clone())
            .text("venueName", upload.venue_name.clone())
            .text("completedForm", completed_form);
        let body = self
            .post_multipart(&self.endpoints.upload_image, form, cancel)
            .await?;
        serde_json::from_value(body).map_err(|error| Error::Malformed(error.to_string()))
    }

    async fn save_content(
        &self,
        request: &SaveContentRequest,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        let body = self
            .post_json(&self.endpoints.save_content, request, cancel)
            .await?;
        Ok(acknowledgement(&body))
    }

    async fn generate_content(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<GeneratedContent, Error> {
        let files = cancellable(cancel, image::compress_all(&request.files)).await?;
        let mut form = reqwest::multipart::Form::new();
        for file in files {
            let part = file_part(file.body, file.file_name, &file.mime_type, "")?;
            form = form.part("files", part);
        }
        let form = form.text("userPrompt", request.user_prompt.clone());
        let body = self
            .post_multipart(&self.endpoints.generate_content, form, cancel)
            .await?;
        let envelope: GeneratedEnvelope =
            serde_json::from_value(body).map_err(|error| Error::Malformed(error.to_string()))?;
        Ok(envelope.description)
    }

    async fn rename_section_folder(
        &self,
        request: &RenameFolderRequest,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        let body = self
            .post_json(&self.endpoints.rename_section_folder, request, cancel)
            .await?;
        Ok(acknowledgement(&body))
    }
}
