use std::time::Duration;

use super::{Harness, image, incomplete, load_fixture, section, venue};
use crate::{
    cache::{self, Client as _},
    model::{Area, ProcessStatus, Section, SectionImage, UploadStatus, Venue},
    progress::Level,
};

#[tokio::test]
async fn offline_section_overrides_server_record() {
    let harness = Harness::new();
    let offline: Vec<Section> = load_fixture("src/tests/selection/offline_sections.json").await;
    cache::write_document(harness.cache(), "offline_sections_v1", &offline).await;
    harness
        .api()
        .sections
        .ok(load_fixture("src/tests/selection/sections.json").await);

    harness
        .session
        .select_venue(Some(venue("v1", "Harbour Hall")))
        .await;

    let state = harness.session.state();
    assert_eq!(
        state.sections,
        vec![
            Section {
                is_new: Some(false),
                ..section("s1", "Patio")
            },
            Section {
                status: Some(ProcessStatus::Processed),
                ..section("s2", "Main Bar")
            },
        ]
    );
    assert!(!state.loading.sections);
    // the server snapshot is cached untouched
    let online: Vec<Section> = cache::read_records(harness.cache(), "sections_v1").await;
    assert_eq!(online[0].label, "Patio (confirmed)");
}

#[tokio::test(start_paused = true)]
async fn latest_fetch_wins() {
    let harness = Harness::new();
    harness.api().venues.reply(
        Duration::from_millis(200),
        Ok(vec![venue("old", "Old Hall")]),
    );
    harness.api().venues.ok(vec![venue("new", "New Hall")]);

    let session = &harness.session;
    let (first, second) = tokio::join!(session.fetch_venues(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.fetch_venues().await
    });

    assert!(first.is_none());
    assert_eq!(second, Some(vec![venue("new", "New Hall")]));
    let state = session.state();
    assert_eq!(state.venues, vec![venue("new", "New Hall")]);
    assert!(!state.loading.venues);
    assert!(session.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn switching_venue_discards_stale_sections() {
    let harness = Harness::new();
    harness.api().sections.reply(
        Duration::from_millis(200),
        Ok(vec![section("a1", "Lobby")]),
    );
    harness.api().sections.ok(vec![section("b1", "Terrace")]);

    let session = &harness.session;
    tokio::join!(session.select_venue(Some(venue("a", "A"))), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.select_venue(Some(venue("b", "B"))).await;
    });

    let state = session.state();
    assert_eq!(state.venue, Some(venue("b", "B")));
    assert_eq!(state.sections, vec![section("b1", "Terrace")]);
    assert!(!harness.cache().exists("sections_a").await.unwrap());
    assert!(harness.cache().exists("sections_b").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn superseded_fetch_leaves_loading_to_successor() {
    let harness = Harness::new();
    harness.api().sections.reply(
        Duration::from_millis(200),
        Ok(vec![section("a1", "Lobby")]),
    );
    harness.api().sections.reply(
        Duration::from_millis(500),
        Ok(vec![section("b1", "Terrace")]),
    );

    let session = &harness.session;
    let (_, _, midway) = tokio::join!(
        session.select_venue(Some(venue("a", "A"))),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            session.select_venue(Some(venue("b", "B"))).await;
        },
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            (
                session.state().loading.sections,
                session.requests().is_active("sections-b"),
            )
        },
    );

    assert_eq!(midway, (true, true));
    let state = session.state();
    assert_eq!(state.sections, vec![section("b1", "Terrace")]);
    assert!(!state.loading.sections);
}

#[tokio::test]
async fn transport_failure_falls_back_to_cached_snapshot() {
    let harness = Harness::new();
    cache::write_document(harness.cache(), "sections_v1", &[section("s1", "Patio")]).await;
    harness.api().sections.fail("connection refused");

    harness
        .session
        .select_venue(Some(venue("v1", "Harbour Hall")))
        .await;

    let state = harness.session.state();
    assert_eq!(state.sections, vec![section("s1", "Patio")]);
    assert!(!state.loading.sections);
    assert!(
        harness
            .reporter
            .has(Level::Error, "Failed to load sections. Please try again.")
    );
}

#[tokio::test]
async fn new_venue_starts_with_local_section() {
    let harness = Harness::new();
    let cafe = Venue {
        is_new: Some(true),
        ..venue("new-1", "Corner Cafe")
    };

    harness.session.select_venue(Some(cafe.clone())).await;

    let state = harness.session.state();
    assert_eq!(state.sections.len(), 1);
    let first = &state.sections[0];
    assert_eq!(first.label, "1");
    assert!(first.value.starts_with("new-"));
    assert!(first.is_local_only());
    assert!(first.is_incomplete());
    assert_eq!(state.section.as_ref(), Some(first));
    assert_eq!(harness.api().count("sections:"), 0);

    let offline: Vec<Section> =
        cache::read_records(harness.cache(), "offline_sections_new-1").await;
    assert_eq!(offline, state.sections);
    let venues: Vec<Venue> = cache::read_records(harness.cache(), "offline_venues").await;
    assert_eq!(venues, vec![cafe]);
}

#[tokio::test]
async fn clearing_venue_resets_scope() {
    let harness = Harness::new();
    harness.api().sections.ok(vec![section("s1", "Patio")]);
    harness.api().images.ok(vec![image("a", UploadStatus::Success)]);
    harness.api().areas.ok(vec![Area::default()]);
    harness.session.select_venue(Some(venue("v1", "Hall"))).await;
    harness
        .session
        .select_section(Some(section("s1", "Patio")))
        .await;
    assert_eq!(harness.session.state().section_images.len(), 1);

    harness.session.select_venue(None).await;

    let state = harness.session.state();
    assert_eq!(state.venue, None);
    assert_eq!(state.section, None);
    assert!(state.sections.is_empty());
    assert!(state.section_images.is_empty());
    assert!(state.section_data.is_empty());
}

#[tokio::test]
async fn section_merges_server_and_offline_records() {
    let harness = Harness::new();
    harness.api().sections.ok(vec![section("s1", "Patio")]);
    harness.api().images.ok(vec![image("a", UploadStatus::Success)]);
    harness.api().areas.ok(vec![Area {
        description: Some("server".into()),
        section_folder_id: Some("folder-1".into()),
        ..Default::default()
    }]);
    cache::write_document(
        harness.cache(),
        "offline_images_v1_s1",
        &[image("b", UploadStatus::Pending)],
    )
    .await;
    cache::write_document(
        harness.cache(),
        "offline_data_v1_s1",
        &[Area {
            description: Some("draft".into()),
            ..Default::default()
        }],
    )
    .await;

    harness.session.select_venue(Some(venue("v1", "Hall"))).await;
    harness
        .session
        .select_section(Some(section("s1", "Patio")))
        .await;

    let state = harness.session.state();
    let ids = state
        .section_images
        .iter()
        .map(|image| image.id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, ["a", "b"]);
    assert_eq!(state.section_images[1].is_new, Some(false));
    let area = state.area().unwrap();
    assert_eq!(area.description.as_deref(), Some("draft"));
    assert_eq!(area.section_folder_id.as_deref(), Some("folder-1"));
    assert!(!state.loading.images);
    assert!(!state.loading.data);
    assert_eq!(harness.api().count("images:v1:Patio"), 1);
    assert_eq!(harness.api().count("data:v1:Patio"), 1);
}

#[tokio::test]
async fn incomplete_section_reads_cache_only() {
    let harness = Harness::new();
    harness.api().sections.ok(vec![incomplete(section("s1", "Patio"))]);
    cache::write_document(
        harness.cache(),
        "offline_images_v1_s1",
        &[image("b", UploadStatus::Pending)],
    )
    .await;

    harness.session.select_venue(Some(venue("v1", "Hall"))).await;
    harness
        .session
        .select_section(Some(incomplete(section("s1", "Patio"))))
        .await;

    let images: Vec<SectionImage> = harness.session.state().section_images;
    assert_eq!(images.len(), 1);
    assert_eq!(harness.api().count("images:"), 0);
    assert_eq!(harness.api().count("data:"), 0);
}

#[tokio::test]
async fn offline_mode_skips_network() {
    let harness = Harness::new();
    harness.session.set_online(false);
    cache::write_document(harness.cache(), "venues", &[venue("v1", "Hall")]).await;

    let venues = harness.session.fetch_venues().await;

    assert_eq!(venues, Some(vec![venue("v1", "Hall")]));
    assert!(harness.api().calls().is_empty());
}
