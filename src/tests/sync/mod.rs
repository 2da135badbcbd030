use std::time::Duration;

use super::{Harness, image, section, venue};
use crate::{
    cache::{self, Client as _},
    model::{Area, GeneratedContent, ProcessStatus, Section, SectionImage, UploadStatus, Venue},
    progress::Level,
    reducer::{Action, AreaField},
};

/// Venue `v1` created offline with section `s1` holding two unsynced images
/// and a draft.
async fn seed_offline_section(harness: &Harness) {
    let hall = venue("v1", "Hall");
    cache::write_document(harness.cache(), "offline_venues", &[hall]).await;
    cache::write_document(harness.cache(), "offline_sections_v1", &[section("s1", "Patio")])
        .await;
    cache::write_document(
        harness.cache(),
        "offline_images_v1_s1",
        &[
            image("a", UploadStatus::Pending),
            image("b", UploadStatus::Pending),
        ],
    )
    .await;
    cache::write_document(
        harness.cache(),
        "offline_data_v1_s1",
        &[Area {
            description: Some("draft".into()),
            shadow_corrections: Some(vec![false, true]),
            hero_images: Some(vec![true, false]),
            ..Default::default()
        }],
    )
    .await;
}

async fn open_patio(harness: &Harness) {
    harness.session.select_venue(Some(venue("v1", "Hall"))).await;
    harness
        .session
        .select_section(Some(section("s1", "Patio")))
        .await;
}

async fn offline_section(harness: &Harness) {
    seed_offline_section(harness).await;
    harness.api().sections.ok(Vec::new());
    harness.api().images.ok(Vec::new());
    harness.api().areas.ok(Vec::new());
    open_patio(harness).await;
}

#[tokio::test]
async fn empty_queue_uploads_nothing() {
    let harness = Harness::new();
    harness.api().sections.ok(vec![section("s1", "Patio")]);
    harness.api().images.ok(vec![image("a", UploadStatus::Success)]);
    harness.api().areas.ok(Vec::new());
    harness.session.select_venue(Some(venue("v1", "Hall"))).await;
    harness
        .session
        .select_section(Some(section("s1", "Patio")))
        .await;

    let report = harness.session.upload_images().await;

    assert!(report.is_empty());
    assert_eq!(harness.api().count("upload:"), 0);
    assert!(
        harness
            .reporter
            .has(Level::Info, "No pending images to upload")
    );
    assert!(!harness.session.state().loading.upload_image);
}

#[tokio::test]
async fn uploaded_section_leaves_offline_cache() {
    let harness = Harness::new();
    *harness.api().folder_id.lock().unwrap() = Some("folder-9".into());
    offline_section(&harness).await;
    assert_eq!(harness.session.state().section_images.len(), 2);

    let report = harness.session.upload_images().await;

    assert!(report.all_succeeded());
    assert_eq!(report.succeeded(), 2);
    assert_eq!(harness.api().count("upload:1.jpg"), 1);
    assert_eq!(harness.api().count("upload:2.jpg"), 1);

    let images: Vec<SectionImage> =
        cache::read_records(harness.cache(), "offline_images_v1_s1").await;
    assert!(images.is_empty());
    let data: Vec<Area> = cache::read_records(harness.cache(), "offline_data_v1_s1").await;
    assert!(data.is_empty());
    let sections: Vec<Section> = cache::read_records(harness.cache(), "offline_sections_v1").await;
    assert!(sections.is_empty());
    let venues: Vec<Venue> = cache::read_records(harness.cache(), "offline_venues").await;
    assert!(venues.is_empty());

    let state = harness.session.state();
    assert!(
        state
            .section_images
            .iter()
            .all(|image| image.status == Some(UploadStatus::Success))
    );
    assert_eq!(
        state.section.and_then(|section| section.status),
        Some(ProcessStatus::Processed)
    );
    assert_eq!(state.sections[0].status, Some(ProcessStatus::Processed));
    let area = state.section_data.first().unwrap();
    assert_eq!(area.section_folder_id.as_deref(), Some("folder-9"));
    assert_eq!(area.section_id.as_deref(), Some("s1"));
    assert!(!state.loading.upload_image);
    assert_eq!(
        harness.reporter.progress.lock().unwrap().last(),
        Some(&(2, 2))
    );
    assert!(
        harness
            .reporter
            .has(Level::Info, "Image upload complete")
    );
}

#[tokio::test(start_paused = true)]
async fn failed_upload_keeps_its_offline_record() {
    let harness = Harness::new();
    harness
        .api()
        .failing_uploads
        .lock()
        .unwrap()
        .insert("2.jpg".into());
    offline_section(&harness).await;

    let report = harness.session.upload_images().await;

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
    // first attempt plus two retries
    assert_eq!(harness.api().count("upload:2.jpg"), 3);

    let images: Vec<SectionImage> =
        cache::read_records(harness.cache(), "offline_images_v1_s1").await;
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].id, "b");
    let data: Vec<Area> = cache::read_records(harness.cache(), "offline_data_v1_s1").await;
    assert_eq!(data.len(), 1);
    let venues: Vec<Venue> = cache::read_records(harness.cache(), "offline_venues").await;
    assert_eq!(venues.len(), 1);

    let state = harness.session.state();
    assert_eq!(state.section_images[1].status, Some(UploadStatus::Failed));
    assert_eq!(state.section.and_then(|section| section.status), None);
}

#[tokio::test(start_paused = true)]
async fn leaving_section_stops_its_upload() {
    let harness = Harness::new();
    harness
        .api()
        .failing_uploads
        .lock()
        .unwrap()
        .insert("1.jpg".into());
    seed_offline_section(&harness).await;
    harness.api().sections.ok(Vec::new());
    harness.api().sections.ok(vec![section("s9", "Stage")]);
    harness.api().images.ok(Vec::new());
    harness.api().images.ok(vec![image("x", UploadStatus::Success)]);
    harness.api().areas.ok(Vec::new());
    *harness.api().folder_id.lock().unwrap() = Some("folder-9".into());
    open_patio(&harness).await;

    let session = &harness.session;
    let (report, ()) = tokio::join!(session.upload_images(), async {
        // inside the backoff of the first image
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.select_venue(Some(venue("v2", "Garden"))).await;
        session
            .select_section(Some(section("s9", "Stage")))
            .await;
    });

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.cancelled(), 1);
    assert_eq!(harness.api().count("upload:1.jpg"), 1);
    let state = session.state();
    let images = state
        .section_images
        .iter()
        .map(|image| (image.id.as_str(), image.status))
        .collect::<Vec<_>>();
    assert_eq!(images, [("x", Some(UploadStatus::Success))]);
    assert!(
        state
            .area()
            .is_none_or(|area| area.section_folder_id.is_none())
    );
    assert_eq!(state.section.and_then(|section| section.status), None);
    assert!(!state.loading.upload_image);
    assert!(!harness.reporter.has(Level::Info, "Image upload complete"));

    // the synced image still leaves the old offline slot
    let offline: Vec<SectionImage> =
        cache::read_records(harness.cache(), "offline_images_v1_s1").await;
    let ids = offline.iter().map(|image| image.id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, ["a"]);
}

#[tokio::test]
async fn saved_images_keep_unsynced_records_offline() {
    let harness = Harness::new();
    harness.api().sections.ok(vec![section("s1", "Patio")]);
    harness.api().images.ok(vec![image("a", UploadStatus::Success)]);
    harness.api().areas.ok(Vec::new());
    harness.session.select_venue(Some(venue("v1", "Hall"))).await;
    harness
        .session
        .select_section(Some(section("s1", "Patio")))
        .await;

    let saved = harness
        .session
        .save_images(
            vec![
                image("a", UploadStatus::Success),
                image("c", UploadStatus::Pending),
            ],
            vec![false, true],
            vec![true, false],
        )
        .await;

    assert!(saved);
    let offline: Vec<SectionImage> =
        cache::read_records(harness.cache(), "offline_images_v1_s1").await;
    assert_eq!(offline, vec![image("c", UploadStatus::Pending)]);
    let data: Vec<Area> = cache::read_records(harness.cache(), "offline_data_v1_s1").await;
    assert_eq!(data[0].shadow_corrections, Some(vec![false, true]));
    assert_eq!(data[0].hero_images, Some(vec![true, false]));
    let state = harness.session.state();
    assert_eq!(state.section_images.len(), 2);
    assert!(!state.loading.save_image);
    assert!(
        harness
            .reporter
            .has(Level::Info, "Images saved successfully")
    );
}

#[tokio::test]
async fn generated_content_keeps_local_fields() {
    let harness = Harness::new();
    offline_section(&harness).await;
    harness.session.dispatch(Action::UpdateSectionData(
        AreaField::PromptInput("focus on lighting".into()),
    ));
    harness.api().generated.ok(GeneratedContent {
        description: "quiet and warm".into(),
        sounds: vec!["low hum".into()],
        ..Default::default()
    });

    let area = harness.session.generate_content().await.unwrap();

    assert_eq!(area.description.as_deref(), Some("quiet and warm"));
    assert_eq!(area.sounds[0].value, "low hum");
    assert_eq!(area.prompt_input.as_deref(), Some("focus on lighting"));
    assert_eq!(area.shadow_corrections, Some(vec![false, true]));
    assert_eq!(harness.api().count("generate:2:focus on lighting"), 1);
    assert_eq!(harness.session.state().section_data, vec![area]);
    assert!(!harness.session.state().loading.content);
}

#[tokio::test]
async fn generation_needs_images() {
    let harness = Harness::new();

    assert!(harness.session.generate_content().await.is_none());

    assert_eq!(harness.api().count("generate:"), 0);
    assert!(harness.reporter.has(Level::Warning, "Please add images before generating content"));
}

#[tokio::test]
async fn failed_save_keeps_draft_offline() {
    let harness = Harness::new();
    offline_section(&harness).await;
    harness.session.dispatch(Action::UpdateSectionData(
        AreaField::Description("edited".into()),
    ));
    harness.api().saved.fail("gateway timeout");

    assert!(!harness.session.save_content().await);

    let data: Vec<Area> = cache::read_records(harness.cache(), "offline_data_v1_s1").await;
    assert_eq!(data[0].description.as_deref(), Some("edited"));
    assert!(harness.reporter.has(Level::Error, "Failed to save content. Please try again."));
    assert_eq!(harness.api().count("save:Hall:Patio"), 1);
}

#[tokio::test]
async fn prompt_update_requires_change() {
    let harness = Harness::new();
    harness.api().prompt.ok("describe the room".into());
    harness.api().saved.ok("Prompt updated".into());

    assert_eq!(
        harness.session.fetch_prompt().await.as_deref(),
        Some("describe the room")
    );
    assert!(!harness.session.update_prompt("describe the room").await);
    assert!(harness.reporter.has(Level::Warning, "Please change prompt before updating prompt"));

    assert!(harness.session.update_prompt("describe the smell").await);
    assert_eq!(harness.session.state().prompt, "describe the smell");
    assert_eq!(harness.api().count("update-prompt:describe the smell"), 1);
    assert!(!harness.session.state().loading.prompt);
}

#[tokio::test(start_paused = true)]
async fn section_rename_is_debounced() {
    let harness = Harness::new();
    harness.api().sections.ok(vec![section("s1", "Patio")]);
    harness.api().saved.ok("Folder renamed".into());
    harness.session.select_venue(Some(venue("v1", "Hall"))).await;

    for label in ["P", "Pa", "Patio Deck"] {
        let renamed = section("s1", label);
        harness
            .session
            .edit_sections(vec![renamed.clone()], Some(renamed));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(harness.session.flush_section_edits().await);

    assert_eq!(harness.api().count("rename:"), 1);
    assert_eq!(harness.api().count("rename:s1:Patio Deck"), 1);
    let state = harness.session.state();
    assert_eq!(state.sections, vec![section("s1", "Patio Deck")]);
    let offline: Vec<Section> = cache::read_records(harness.cache(), "offline_sections_v1").await;
    assert_eq!(offline, state.sections);
    assert!(!harness.session.flush_section_edits().await);
}

#[tokio::test(start_paused = true)]
async fn local_section_rename_stays_local() {
    let harness = Harness::new();
    let cafe = Venue {
        is_new: Some(true),
        ..venue("new-1", "Corner Cafe")
    };
    harness.session.select_venue(Some(cafe)).await;
    let mut local = harness.session.state().sections[0].clone();
    local.label = "Front Room".into();

    harness
        .session
        .edit_sections(vec![local.clone()], Some(local.clone()));
    assert!(harness.session.flush_section_edits().await);

    assert_eq!(harness.api().count("rename:"), 0);
    assert_eq!(harness.session.state().section, Some(local));
}

#[tokio::test(start_paused = true)]
async fn teardown_blocks_late_commits() {
    let harness = Harness::new();
    harness
        .api()
        .venues
        .reply(Duration::from_millis(200), Ok(vec![venue("v1", "Hall")]));
    harness
        .session
        .edit_sections(vec![section("s1", "Patio")], None);

    let session = &harness.session;
    let (venues, _) = tokio::join!(session.fetch_venues(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.teardown();
    });

    assert!(venues.is_none());
    let state = session.state();
    assert!(state.venues.is_empty());
    assert!(state.sections.is_empty());
    assert!(!session.flush_section_edits().await);
    assert!(!harness.cache().exists("venues").await.unwrap());
}
