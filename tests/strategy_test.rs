//! Browser-driven extraction strategies against a scripted page.

mod common;

use std::time::Duration;

use common::{results_page, FakeLauncher, PREVIEW_SIZE};
use country_image_harvester::browser::{BrowserLauncher, BrowserSession, Page};
use country_image_harvester::config::Config;
use country_image_harvester::extract::{
    ClickThroughStrategy, ExtractionStrategy, ScrollPaginationStrategy,
};
use country_image_harvester::models::{ImageCandidate, StrategyKind};

const RESULTS_URL: &str = "https://search.test/images?q=Japan";

fn full_size(names: &[&str]) -> Vec<String> {
    names
        .iter()
        .map(|name| format!("https://upload.example.org/{name}.jpg"))
        .collect()
}

fn grid() -> Vec<String> {
    vec![
        "https://thumbs.example.org/1.jpg".to_string(),
        "https://thumbs.example.org/2.jpg".to_string(),
    ]
}

async fn loaded_session(launcher: &FakeLauncher) -> Box<dyn BrowserSession> {
    let mut session = launcher
        .launch(&Config::for_testing().session_config())
        .await
        .unwrap();
    session.navigate(RESULTS_URL).await.unwrap();
    session
}

async fn run(strategy: &dyn ExtractionStrategy, launcher: &FakeLauncher) -> Vec<ImageCandidate> {
    let session = loaded_session(launcher).await;
    let page = Page::new(session.as_ref(), RESULTS_URL);
    strategy.extract(&page).await.unwrap()
}

fn urls(candidates: &[ImageCandidate]) -> Vec<&str> {
    candidates.iter().map(|c| c.url.as_str()).collect()
}

#[tokio::test]
async fn test_click_through_reads_each_preview() {
    let launcher = FakeLauncher::new(|_| results_page(&grid()))
        .with_previews(full_size(&["Fuji", "Kyoto", "Osaka"]));
    let log = launcher.log();

    let found = run(&ClickThroughStrategy::new(10, Duration::ZERO), &launcher).await;

    assert_eq!(
        urls(&found),
        vec![
            "https://upload.example.org/Fuji.jpg",
            "https://upload.example.org/Kyoto.jpg",
            "https://upload.example.org/Osaka.jpg",
        ]
    );
    assert!(found.iter().all(|c| c.strategy == StrategyKind::ClickThrough));
    assert!(found
        .iter()
        .all(|c| c.declared_area() == Some(u64::from(PREVIEW_SIZE) * u64::from(PREVIEW_SIZE))));
    assert!(found.iter().all(|c| c.source_page_url == RESULTS_URL));
    assert_eq!(log.clicks(), 3);
}

#[tokio::test]
async fn test_click_through_respects_limit() {
    let launcher = FakeLauncher::new(|_| results_page(&grid()))
        .with_previews(full_size(&["Fuji", "Kyoto", "Osaka"]));
    let log = launcher.log();

    let found = run(&ClickThroughStrategy::new(2, Duration::ZERO), &launcher).await;

    assert_eq!(
        urls(&found),
        vec![
            "https://upload.example.org/Fuji.jpg",
            "https://upload.example.org/Kyoto.jpg",
        ]
    );
    assert_eq!(log.clicks(), 2);
}

#[tokio::test]
async fn test_click_through_without_thumbnails_finds_nothing() {
    let launcher = FakeLauncher::new(|_| results_page(&[]));
    let log = launcher.log();

    let found = run(&ClickThroughStrategy::new(10, Duration::ZERO), &launcher).await;

    assert!(found.is_empty());
    assert_eq!(log.clicks(), 0);
}

#[tokio::test]
async fn test_click_through_drops_placeholder_previews() {
    let launcher = FakeLauncher::new(|_| results_page(&grid())).with_previews(vec![
        "https://encrypted-tbn0.gstatic.com/images?q=tbn:abc".to_string(),
        "https://upload.example.org/Nara.jpg".to_string(),
    ]);

    let found = run(&ClickThroughStrategy::new(10, Duration::ZERO), &launcher).await;

    assert_eq!(urls(&found), vec!["https://upload.example.org/Nara.jpg"]);
}

#[tokio::test]
async fn test_scroll_stops_once_page_stops_growing() {
    let launcher = FakeLauncher::new(|_| results_page(&grid()))
        .with_scroll_heights(vec![1000, 2000, 3000, 3000, 4000]);
    let log = launcher.log();

    let found = run(&ScrollPaginationStrategy::new(10, Duration::ZERO), &launcher).await;

    assert_eq!(log.scrolls(), 4);
    assert_eq!(
        urls(&found),
        vec!["https://thumbs.example.org/1.jpg", "https://thumbs.example.org/2.jpg"]
    );
    assert!(found
        .iter()
        .all(|c| c.strategy == StrategyKind::ScrollPagination));
}

#[tokio::test]
async fn test_scroll_bounded_by_rounds() {
    let launcher = FakeLauncher::new(|_| results_page(&grid()))
        .with_scroll_heights(vec![1000, 2000, 3000, 4000, 5000, 6000]);
    let log = launcher.log();

    let found = run(&ScrollPaginationStrategy::new(3, Duration::ZERO), &launcher).await;

    assert_eq!(log.scrolls(), 3);
    assert_eq!(found.len(), 2);
}

#[tokio::test]
async fn test_scroll_with_zero_rounds_only_scrapes() {
    let launcher = FakeLauncher::new(|_| results_page(&grid()));
    let log = launcher.log();

    let found = run(&ScrollPaginationStrategy::new(0, Duration::ZERO), &launcher).await;

    assert_eq!(log.scrolls(), 0);
    assert_eq!(found.len(), 2);
}
