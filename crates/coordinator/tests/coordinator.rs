use preroll_cache::error::ErrorKind as CacheErrorKind;
use preroll_config::PreloadPolicy;
use preroll_coordinator::error::ErrorKind;
use preroll_coordinator::{PlaybackCoordinator, PlaybackEventReporter, PlaybackListener, PlayerSurface};
use preroll_fetch::{DownloaderHandle, MockDownloader};
use preroll_media::{MediaDescriptor, MediaId};
use preroll_prefetch::error::ErrorKind as PrefetchErrorKind;
use preroll_prefetch::{MockMedia, MockProbe, PrefetchState};
use preroll_schedule::PreloadMode;
use rstest::rstest;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{TempDir, tempdir};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Scheduled(String, usize, PreloadMode),
    Completed(String, usize, u64, bool),
    Canceled(String, usize, String),
    CacheHit(String, u64),
    CacheMiss(String, u64),
    Impression(String, usize),
    PlayStart(String, usize),
    Error(String, usize, String),
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}
impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn contains(&self, event: &Event) -> bool {
        self.events().contains(event)
    }

    fn count(&self, event: &Event) -> usize {
        self.events().iter().filter(|seen| *seen == event).count()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}
impl PlaybackEventReporter for Recorder {
    fn preload_scheduled(&self, id: &MediaId, index: usize, _distance: isize, mode: PreloadMode) {
        self.push(Event::Scheduled(id.to_string(), index, mode));
    }

    fn preload_completed(&self, id: &MediaId, index: usize, bytes: u64, _elapsed: Duration, from_cache: bool) {
        self.push(Event::Completed(id.to_string(), index, bytes, from_cache));
    }

    fn preload_canceled(&self, id: &MediaId, index: usize, reason: &str) {
        self.push(Event::Canceled(id.to_string(), index, reason.to_string()));
    }

    fn cache_hit(&self, id: &MediaId, bytes: u64) {
        self.push(Event::CacheHit(id.to_string(), bytes));
    }

    fn cache_miss(&self, id: &MediaId, bytes: u64) {
        self.push(Event::CacheMiss(id.to_string(), bytes));
    }

    fn feed_item_impression(&self, id: &MediaId, index: usize) {
        self.push(Event::Impression(id.to_string(), index));
    }

    fn play_start_request(&self, id: &MediaId, index: usize, _trigger: &str) {
        self.push(Event::PlayStart(id.to_string(), index));
    }

    fn playback_error(&self, id: &MediaId, index: usize, category: &str, _message: &str) {
        self.push(Event::Error(id.to_string(), index, category.to_string()));
    }
}

#[derive(Default)]
struct Screen {
    attached: Mutex<Vec<(String, Option<PathBuf>)>>,
}
impl Screen {
    fn attached(&self) -> Vec<String> {
        self.attached.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }

    fn cached(&self, id: &str) -> Option<PathBuf> {
        self.attached.lock().unwrap().iter().find(|(attached, _)| attached == id).and_then(|(_, cached)| cached.clone())
    }
}
impl PlayerSurface<MockMedia> for Screen {
    fn attach(&self, descriptor: &MediaDescriptor, media: Arc<MockMedia>, cached: Option<&Path>) {
        assert_eq!(&media.id, descriptor.id());
        self.attached.lock().unwrap().push((descriptor.id().to_string(), cached.map(Path::to_path_buf)));
    }
}

#[derive(Default)]
struct Ui {
    ready: Mutex<Vec<String>>,
    errors: Mutex<Vec<(String, ErrorKind)>>,
}
impl Ui {
    fn errors(&self) -> Vec<(String, ErrorKind)> {
        self.errors.lock().unwrap().clone()
    }
}
impl PlaybackListener for Ui {
    fn on_ready(&self, id: &MediaId) {
        self.ready.lock().unwrap().push(id.to_string());
    }

    fn on_error(&self, id: &MediaId, cause: &ErrorKind) {
        self.errors.lock().unwrap().push((id.to_string(), cause.clone()));
    }
}

struct Harness {
    coordinator: PlaybackCoordinator<MockProbe>,
    probe: Arc<MockProbe>,
    downloader: Arc<MockDownloader>,
    screen: Arc<Screen>,
    ui: Arc<Ui>,
    reporter: Arc<Recorder>,
    _dir: TempDir,
}

fn uri(name: &str) -> String {
    format!("mem://videos/{name}.mp4")
}

fn media(name: &str) -> MediaDescriptor {
    MediaDescriptor::new(name, uri(name))
}

fn feed(prefix: &str, len: usize) -> Vec<MediaDescriptor> {
    (0..len).map(|index| media(&format!("{prefix}{index}"))).collect()
}

fn policy() -> PreloadPolicy {
    PreloadPolicy { prepared_prev: 1, prepared_next: 1, disk_prefetch_next: 3, ..Default::default() }
}

fn harness(policy: PreloadPolicy) -> Harness {
    let dir = tempdir().unwrap();
    let probe = Arc::new(MockProbe::default());
    let downloader = Arc::new(MockDownloader::with_resources(
        ["v", "w"].iter().flat_map(|prefix| (0..10).map(move |index| (uri(&format!("{prefix}{index}")), vec![b'x'; 16]))),
    ));
    let screen = Arc::new(Screen::default());
    let ui = Arc::new(Ui::default());
    let reporter = Arc::new(Recorder::default());
    let handle: DownloaderHandle = downloader.clone();
    let coordinator = PlaybackCoordinator::builder(Arc::clone(&probe), handle, screen.clone())
        .policy(policy)
        .cache_directory(dir.path())
        .listener(ui.clone())
        .reporter(reporter.clone())
        .trace_events(true)
        .build()
        .unwrap();
    Harness { coordinator, probe, downloader, screen, ui, reporter, _dir: dir }
}

async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

fn indices(iter: impl Iterator<Item = usize>) -> Vec<usize> {
    iter.collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn first_append_activates_and_preloads_around_it() {
    let mut h = harness(policy());
    h.coordinator.append_feed(feed("v", 10));

    assert_eq!(h.coordinator.active_index(), Some(0));
    assert_eq!(indices(h.coordinator.prepared_indices()), vec![0, 1]);
    assert_eq!(indices(h.coordinator.download_indices()), vec![2, 3, 4]);
    assert!(h.reporter.contains(&Event::Impression("v0".into(), 0)));
    assert!(h.reporter.contains(&Event::PlayStart("v0".into(), 0)));
    assert!(h.reporter.contains(&Event::Scheduled("v1".into(), 1, PreloadMode::Prepared)));
    assert!(h.reporter.contains(&Event::Scheduled("v4".into(), 4, PreloadMode::Disk)));

    eventually(|| h.screen.attached() == vec!["v0".to_string()]).await;
    eventually(|| (2..5).all(|index| h.reporter.contains(&Event::Completed(format!("v{index}"), index, 16, false))))
        .await;
    assert!(h.reporter.contains(&Event::CacheMiss("v0".into(), 0)));
    assert_eq!(h.downloader.attempts(&uri("v5")), 0);
    assert!(h.coordinator.is_attached());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn moving_on_shifts_the_window_and_evicts_what_left() {
    let mut h = harness(policy());
    h.coordinator.append_feed(feed("v", 10));
    let v1 = media("v1").cache_key();
    eventually(|| h.coordinator.registry().state(&v1) == Some(PrefetchState::Ready)).await;
    eventually(|| h.screen.attached().len() == 1).await;

    h.coordinator.on_position_changed(5);
    assert_eq!(indices(h.coordinator.prepared_indices()), vec![4, 5, 6]);
    assert_eq!(indices(h.coordinator.download_indices()), vec![7, 8, 9]);
    for index in 0..4 {
        assert!(h.reporter.contains(&Event::Canceled(format!("v{index}"), index, "window_shift".into())));
    }
    assert_eq!(h.coordinator.registry().state(&media("v0").cache_key()), None);
    assert_eq!(h.coordinator.registry().state(&v1), None);

    eventually(|| h.screen.attached() == vec!["v0".to_string(), "v5".to_string()]).await;
    // Only v1 still owned its media; v0 went to the player.
    eventually(|| h.probe.released().len() == 1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scrolling_back_attaches_the_item_again() {
    let mut h = harness(policy());
    h.coordinator.append_feed(feed("v", 10));
    h.coordinator.on_position_changed(5);
    eventually(|| h.screen.attached().contains(&"v5".to_string())).await;
    h.coordinator.on_position_changed(6);
    eventually(|| h.screen.attached().contains(&"v6".to_string())).await;

    h.coordinator.on_position_changed(5);
    eventually(|| h.screen.attached().iter().filter(|id| *id == "v5").count() == 2).await;
    assert_eq!(h.screen.attached().last(), Some(&"v5".to_string()));
    assert!(h.coordinator.is_attached());
    assert_eq!(h.probe.prepare_count(&uri("v5")), 2);
    assert_eq!(indices(h.coordinator.prepared_indices()), vec![4, 5, 6]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_download_is_retried_on_the_next_pass() {
    let mut h = harness(policy());
    h.downloader.fail(uri("v3"));
    h.coordinator.append_feed(feed("v", 10));
    eventually(|| h.reporter.contains(&Event::Canceled("v3".into(), 3, "error".into()))).await;
    assert_eq!(h.coordinator.cache().cached_file_location(&media("v3")), None);

    h.downloader.recover(&uri("v3"));
    h.coordinator.on_position_changed(1);
    assert_eq!(indices(h.coordinator.download_indices()), vec![3, 4, 5]);
    eventually(|| h.coordinator.cache().cached_file_location(&media("v3")).is_some()).await;
    assert_eq!(h.downloader.attempts(&uri("v3")), 2);
    eventually(|| h.reporter.contains(&Event::Completed("v3".into(), 3, 16, false))).await;
}

#[tokio::test]
async fn active_item_attaches_once_it_becomes_ready() {
    let mut h = harness(policy());
    h.probe.pause();
    h.coordinator.append_feed(feed("v", 3));
    h.coordinator.dispatcher().flush().await;
    assert!(h.screen.attached().is_empty());
    assert!(!h.coordinator.is_attached());

    h.probe.resume();
    eventually(|| h.coordinator.is_attached()).await;
    h.coordinator.dispatcher().flush().await;
    assert_eq!(h.screen.attached(), vec!["v0".to_string()]);
    assert!(h.ui.ready.lock().unwrap().contains(&"v0".to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn without_secondary_player_neighbours_go_to_disk() {
    let mut h = harness(PreloadPolicy { use_prepared_next_player: false, ..policy() });
    h.coordinator.append_feed(feed("v", 10));
    assert_eq!(indices(h.coordinator.prepared_indices()), vec![0]);
    assert_eq!(indices(h.coordinator.download_indices()), vec![1, 2, 3, 4]);
    assert!(h.reporter.contains(&Event::Scheduled("v1".into(), 1, PreloadMode::Disk)));

    h.coordinator.on_position_changed(5);
    assert_eq!(indices(h.coordinator.prepared_indices()), vec![5]);
    assert_eq!(indices(h.coordinator.download_indices()), vec![4, 6, 7, 8, 9]);
    assert!(h.reporter.contains(&Event::Scheduled("v5".into(), 5, PreloadMode::Prepared)));
    assert!(h.reporter.contains(&Event::Scheduled("v6".into(), 6, PreloadMode::Disk)));
    eventually(|| h.screen.attached().contains(&"v5".to_string())).await;
    assert_eq!(h.probe.prepare_count(&uri("v6")), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scroll_hint_preloads_ahead_without_switching_player() {
    let mut h = harness(policy());
    h.coordinator.append_feed(feed("v", 10));
    eventually(|| h.coordinator.is_attached()).await;

    h.coordinator.set_scroll_hint(5);
    assert_eq!(h.coordinator.active_index(), Some(0));
    assert_eq!(indices(h.coordinator.prepared_indices()), vec![0, 4, 5, 6]);
    assert_eq!(indices(h.coordinator.download_indices()), vec![7, 8, 9]);
    assert!(h.coordinator.registry().state(&media("v0").cache_key()).is_some());

    h.coordinator.on_position_changed(5);
    eventually(|| h.screen.attached() == vec!["v0".to_string(), "v5".to_string()]).await;
    assert_eq!(h.probe.prepare_count(&uri("v5")), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn feed_update_keeps_the_playing_item() {
    let mut h = harness(policy());
    h.coordinator.append_feed(feed("v", 10));
    eventually(|| h.coordinator.is_attached()).await;

    let mut replacement = feed("w", 10);
    replacement[0] = media("v0");
    h.coordinator.set_feed(replacement);

    assert_eq!(h.coordinator.active_index(), Some(0));
    assert!(h.reporter.contains(&Event::Canceled("v1".into(), 1, "feed_update".into())));
    assert!(h.coordinator.registry().state(&media("v0").cache_key()).is_some());
    assert_eq!(h.coordinator.registry().state(&media("v1").cache_key()), None);
    assert_eq!(indices(h.coordinator.prepared_indices()), vec![0, 1]);
    assert_eq!(indices(h.coordinator.download_indices()), vec![2, 3, 4]);
    eventually(|| h.probe.prepare_count(&uri("w1")) == 1).await;
    h.coordinator.dispatcher().flush().await;
    assert_eq!(h.screen.attached(), vec!["v0".to_string()]);
    assert_eq!(h.probe.prepare_count(&uri("v0")), 1);
}

#[rstest]
#[case::shorter_feed(8, 3, 2)]
#[case::same_length(4, 10, 4)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn feed_update_clamps_and_reactivates(#[case] active: usize, #[case] len: usize, #[case] expected: usize) {
    let mut h = harness(policy());
    h.coordinator.append_feed(feed("v", 10));
    h.coordinator.on_position_changed(active);
    eventually(|| h.screen.attached().contains(&format!("v{active}"))).await;

    h.coordinator.set_feed(feed("w", len));
    assert_eq!(h.coordinator.active_index(), Some(expected));
    assert!(h.reporter.contains(&Event::Impression(format!("w{expected}"), expected)));
    eventually(|| h.screen.attached().contains(&format!("w{expected}"))).await;
    assert_eq!(h.coordinator.registry().state(&media(&format!("v{active}")).cache_key()), None);
}

#[tokio::test]
async fn emptying_the_feed_deactivates() {
    let mut h = harness(policy());
    h.coordinator.append_feed(feed("v", 5));
    h.coordinator.set_feed(Vec::new());
    assert_eq!(h.coordinator.active_index(), None);
    assert_eq!(indices(h.coordinator.prepared_indices()), Vec::<usize>::new());
    assert_eq!(indices(h.coordinator.download_indices()), Vec::<usize>::new());
    assert!(h.coordinator.registry().is_empty());

    h.coordinator.append_feed(feed("w", 2));
    assert_eq!(h.coordinator.active_index(), Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_cancels_downloads_until_foreground() {
    let mut h = harness(policy());
    h.downloader.hold();
    h.coordinator.append_feed(feed("v", 10));
    eventually(|| h.downloader.active() == 2).await;

    h.coordinator.on_app_background();
    assert_eq!(indices(h.coordinator.download_indices()), Vec::<usize>::new());
    assert!(h.reporter.contains(&Event::Canceled("v2".into(), 2, "background".into())));
    // Prepared players survive the background untouched.
    assert_eq!(indices(h.coordinator.prepared_indices()), vec![0, 1]);
    assert!(!h.reporter.contains(&Event::Canceled("v1".into(), 1, "background".into())));
    eventually(|| h.downloader.active() == 0).await;
    assert!(!h.coordinator.cache().is_in_flight(&media("v2")));

    // Position changes while backgrounded don't start anything.
    h.coordinator.on_position_changed(1);
    assert_eq!(indices(h.coordinator.download_indices()), Vec::<usize>::new());

    h.downloader.release();
    h.coordinator.on_app_foreground();
    assert_eq!(indices(h.coordinator.download_indices()), vec![3, 4, 5]);
    assert_eq!(h.reporter.count(&Event::Scheduled("v1".into(), 1, PreloadMode::Prepared)), 1);
    assert_eq!(h.reporter.count(&Event::Scheduled("v3".into(), 3, PreloadMode::Disk)), 2);
    eventually(|| (3..6).all(|index| h.coordinator.cache().cached_file_location(&media(&format!("v{index}"))).is_some()))
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn downloaded_item_is_a_cache_hit_when_played() {
    let mut h = harness(policy());
    h.coordinator.append_feed(feed("v", 10));
    eventually(|| h.coordinator.cache().cached_file_location(&media("v2")).is_some()).await;

    h.coordinator.on_position_changed(1);
    h.coordinator.on_position_changed(2);
    eventually(|| h.screen.attached().contains(&"v2".to_string())).await;
    assert!(h.reporter.contains(&Event::CacheHit("v2".into(), 16)));
    assert!(h.reporter.contains(&Event::CacheMiss("v0".into(), 0)));
    let cached = h.screen.cached("v2").unwrap();
    assert_eq!(cached, h.coordinator.cache().directory().join(format!("{}.mp4", media("v2").cache_key())));
}

#[tokio::test]
async fn unplayable_active_item_is_reported() {
    let mut h = harness(policy());
    h.probe.fail_probe(uri("v0"));
    h.coordinator.append_feed(feed("v", 3));

    eventually(|| !h.ui.errors().is_empty()).await;
    assert_eq!(h.ui.errors(), vec![(
        "v0".to_string(),
        ErrorKind::Prepare(PrefetchErrorKind::Unplayable(uri("v0")))
    )]);
    assert!(h.reporter.contains(&Event::Error("v0".into(), 0, "prepare".into())));
    assert!(h.screen.attached().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_download_is_reported_to_the_listener() {
    let mut h = harness(policy());
    h.downloader.fail(uri("v2"));
    h.coordinator.append_feed(feed("v", 10));

    eventually(|| !h.ui.errors().is_empty()).await;
    let errors = h.ui.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "v2");
    assert!(matches!(&errors[0].1, ErrorKind::Download(CacheErrorKind::Download { retryable: true, .. })));
    assert!(errors[0].1.is_retryable());
    assert!(h.reporter.contains(&Event::Canceled("v2".into(), 2, "error".into())));
    // Not the active item, so nothing is reported as a playback error.
    assert!(!h.reporter.events().iter().any(|event| matches!(event, Event::Error(..))));
}

#[tokio::test]
async fn invalid_active_item_is_rejected_once() {
    let mut h = harness(policy());
    let mut items = feed("v", 3);
    items[0] = MediaDescriptor::new("", uri("v0"));
    h.coordinator.append_feed(items);
    h.coordinator.dispatcher().flush().await;

    assert_eq!(h.ui.errors(), vec![(String::new(), ErrorKind::InvalidMedia)]);
    assert!(h.reporter.contains(&Event::Error(String::new(), 0, "invalid_media".into())));
    assert_eq!(indices(h.coordinator.prepared_indices()), vec![1]);

    h.coordinator.set_scroll_hint(1);
    h.coordinator.dispatcher().flush().await;
    assert_eq!(h.ui.errors().len(), 1);
    assert_eq!(h.probe.prepare_count(&uri("v0")), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn release_tears_everything_down() {
    let mut h = harness(policy());
    h.coordinator.append_feed(feed("v", 10));
    eventually(|| h.coordinator.is_attached()).await;

    h.coordinator.release();
    assert!(h.coordinator.is_released());
    assert!(h.coordinator.registry().is_empty());
    assert_eq!(indices(h.coordinator.prepared_indices()), Vec::<usize>::new());
    assert!(h.reporter.contains(&Event::Canceled("v1".into(), 1, "release".into())));

    h.coordinator.on_position_changed(4);
    h.coordinator.append_feed(feed("w", 2));
    assert_eq!(h.coordinator.active_index(), Some(0));
    assert_eq!(h.coordinator.feed().len(), 10);
}

#[tokio::test]
async fn dropping_releases_the_registry() {
    let mut h = harness(policy());
    h.coordinator.append_feed(feed("v", 4));
    let registry = h.coordinator.registry().clone();
    assert!(!registry.is_empty());

    let Harness { coordinator, .. } = h;
    drop(coordinator);
    assert!(registry.is_empty());
}

#[test]
fn building_needs_a_runtime() {
    let dir = tempdir().unwrap();
    let handle: DownloaderHandle = Arc::new(MockDownloader::default());
    let err = PlaybackCoordinator::builder(Arc::new(MockProbe::default()), handle, Arc::new(Screen::default()))
        .cache_directory(dir.path())
        .build()
        .err()
        .unwrap();
    assert_eq!(*err, ErrorKind::Runtime);
}

#[test]
fn building_rejects_invalid_config() {
    let handle: DownloaderHandle = Arc::new(MockDownloader::default());
    let err = PlaybackCoordinator::builder(Arc::new(MockProbe::default()), handle, Arc::new(Screen::default()))
        .cache_directory("relative/cache")
        .build()
        .err()
        .unwrap();
    assert_eq!(*err, ErrorKind::Config);
}
