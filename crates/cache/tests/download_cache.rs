use futures::future::join_all;
use preroll_cache::error::ErrorKind;
use preroll_cache::{CacheOptions, DownloadCache};
use preroll_fetch::{DownloaderHandle, MockDownloader};
use preroll_media::MediaDescriptor;
use rstest::rstest;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn media(name: &str) -> MediaDescriptor {
    MediaDescriptor::new(name, format!("mem://videos/{name}.mp4"))
}

fn downloader(names: &[&str], size: usize) -> Arc<MockDownloader> {
    Arc::new(MockDownloader::with_resources(
        names.iter().map(|name| (format!("mem://videos/{name}.mp4"), vec![b'x'; size])),
    ))
}

fn open(directory: &Path, max_bytes: u64, downloader: &Arc<MockDownloader>) -> DownloadCache {
    let handle: DownloaderHandle = downloader.clone();
    DownloadCache::open(CacheOptions::new(directory).with_max_bytes(max_bytes), handle).unwrap()
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

fn bytes_on_disk(directory: &Path) -> u64 {
    std::fs::read_dir(directory)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.metadata().ok())
        .filter(|metadata| metadata.is_file())
        .map(|metadata| metadata.len())
        .sum()
}

#[tokio::test]
async fn miss_then_hit() {
    let dir = tempdir().unwrap();
    let downloader = downloader(&["a"], 8);
    let cache = open(dir.path(), 0, &downloader);

    assert_eq!(cache.cached_file_location(&media("a")), None);
    let first = cache.prefetch(&media("a")).await.unwrap();
    assert!(!first.from_cache);
    assert_eq!(first.bytes, 8);
    assert_eq!(first.path, dir.path().join(format!("{}.mp4", media("a").cache_key())));
    assert_eq!(std::fs::read(&first.path).unwrap(), vec![b'x'; 8]);

    let second = cache.prefetch(&media("a")).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.path, first.path);
    assert_eq!(cache.cached_file_location(&media("a")), Some(first.path));
    assert_eq!(downloader.attempts("mem://videos/a.mp4"), 1);
}

#[rstest]
#[case(2)]
#[case(5)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_prefetches_share_one_download(#[case] callers: usize) {
    let dir = tempdir().unwrap();
    let downloader = downloader(&["a"], 4);
    let cache = open(dir.path(), 0, &downloader);

    downloader.hold();
    let pending: Vec<_> = (0..callers).map(|_| cache.prefetch(&media("a"))).collect();
    eventually(|| downloader.active() == 1).await;
    assert!(cache.is_in_flight(&media("a")));
    downloader.release();

    let results = join_all(pending).await;
    assert_eq!(results.len(), callers);
    for result in results {
        let fetched = result.unwrap();
        assert!(!fetched.from_cache);
        assert_eq!(fetched.bytes, 4);
    }
    assert_eq!(downloader.attempts("mem://videos/a.mp4"), 1);
    assert!(!cache.is_in_flight(&media("a")));
}

#[tokio::test]
async fn total_size_stays_within_budget() {
    let dir = tempdir().unwrap();
    let names = ["a", "b", "c", "d", "e", "f"];
    let downloader = downloader(&names, 4);
    let cache = open(dir.path(), 10, &downloader);

    for name in names {
        cache.prefetch(&media(name)).await.unwrap();
        assert!(cache.total_bytes() <= 10);
        assert!(bytes_on_disk(dir.path()) <= 10);
    }
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn least_recently_used_is_evicted_first() {
    let dir = tempdir().unwrap();
    let downloader = downloader(&["a", "b", "c"], 4);
    let cache = open(dir.path(), 10, &downloader);

    cache.prefetch(&media("a")).await.unwrap();
    cache.prefetch(&media("b")).await.unwrap();
    cache.prefetch(&media("c")).await.unwrap();

    assert_eq!(cache.cached_file_location(&media("a")), None);
    assert!(cache.cached_file_location(&media("b")).is_some());
    assert!(cache.cached_file_location(&media("c")).is_some());
}

#[tokio::test]
async fn access_refreshes_eviction_order() {
    let dir = tempdir().unwrap();
    let downloader = downloader(&["a", "b", "c"], 4);
    let cache = open(dir.path(), 10, &downloader);

    cache.prefetch(&media("a")).await.unwrap();
    cache.prefetch(&media("b")).await.unwrap();
    assert!(cache.cached_file_location(&media("a")).is_some());
    cache.prefetch(&media("c")).await.unwrap();

    assert!(cache.entry(&media("a").cache_key()).is_some());
    assert!(cache.entry(&media("b").cache_key()).is_none());
    assert!(cache.entry(&media("c").cache_key()).is_some());
}

#[tokio::test]
async fn failure_clears_marker_and_allows_retry() {
    let dir = tempdir().unwrap();
    let downloader = downloader(&["a"], 4);
    let cache = open(dir.path(), 0, &downloader);

    downloader.fail("mem://videos/a.mp4");
    let err = cache.prefetch(&media("a")).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Download { retryable: true, .. }));
    assert!(!cache.is_in_flight(&media("a")));
    assert_eq!(cache.cached_file_location(&media("a")), None);

    downloader.recover("mem://videos/a.mp4");
    assert!(cache.prefetch(&media("a")).await.is_ok());
    assert_eq!(downloader.attempts("mem://videos/a.mp4"), 2);
}

#[tokio::test]
async fn missing_resource_is_not_retryable() {
    let dir = tempdir().unwrap();
    let downloader = downloader(&[], 0);
    let cache = open(dir.path(), 0, &downloader);

    let err = cache.prefetch(&media("ghost")).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Download { retryable: false, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn invalid_media_fails_fast() {
    let dir = tempdir().unwrap();
    let downloader = downloader(&[], 0);
    let cache = open(dir.path(), 0, &downloader);

    let err = cache.prefetch(&MediaDescriptor::new("", "mem://videos/a.mp4")).await.unwrap_err();
    assert_eq!(*err, ErrorKind::InvalidMedia);
    let err = cache.prefetch(&MediaDescriptor::new("a", "not a uri")).await.unwrap_err();
    assert_eq!(*err, ErrorKind::InvalidMedia);
    assert_eq!(downloader.total_attempts(), 0);
    assert_eq!(cache.cached_file_location(&MediaDescriptor::new("", "mem://videos/a.mp4")), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_prefetch_resolves_waiters_and_commits_nothing() {
    let dir = tempdir().unwrap();
    let downloader = downloader(&["a"], 4);
    let cache = open(dir.path(), 0, &downloader);

    downloader.hold();
    let first = cache.prefetch(&media("a"));
    let second = cache.prefetch(&media("a"));
    eventually(|| downloader.active() == 1).await;

    assert!(cache.cancel_prefetch(&media("a")));
    assert!(!cache.cancel_prefetch(&media("a")));
    assert_eq!(*first.await.unwrap_err(), ErrorKind::Cancelled);
    assert_eq!(*second.await.unwrap_err(), ErrorKind::Cancelled);

    downloader.release();
    eventually(|| downloader.active() == 0).await;
    assert_eq!(cache.cached_file_location(&media("a")), None);
    assert_eq!(std::fs::read_dir(dir.path().join(".staging")).unwrap().count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_all_stops_everything() {
    let dir = tempdir().unwrap();
    let downloader = downloader(&["a", "b", "c"], 4);
    let cache = open(dir.path(), 0, &downloader);

    downloader.hold();
    let pending: Vec<_> = ["a", "b", "c"].iter().map(|name| cache.prefetch(&media(name))).collect();
    assert_eq!(cache.cancel_all(), 3);
    for result in join_all(pending).await {
        assert_eq!(*result.unwrap_err(), ErrorKind::Cancelled);
    }
    assert_eq!(cache.cancel_all(), 0);
    downloader.release();
    eventually(|| downloader.active() == 0).await;
    assert!(cache.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_is_capped() {
    let dir = tempdir().unwrap();
    let downloader = downloader(&["a", "b", "c", "d"], 4);
    let handle: DownloaderHandle = downloader.clone();
    let options = CacheOptions::new(dir.path()).with_max_bytes(0).with_max_concurrent(2);
    let cache = DownloadCache::open(options, handle).unwrap();

    downloader.hold();
    let pending: Vec<_> = ["a", "b", "c", "d"].iter().map(|name| cache.prefetch(&media(name))).collect();
    eventually(|| downloader.active() == 2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(downloader.active(), 2);
    downloader.release();

    assert!(join_all(pending).await.into_iter().all(|result| result.is_ok()));
    assert_eq!(downloader.peak_concurrency(), 2);
}

#[tokio::test]
async fn byte_target_limits_download() {
    let dir = tempdir().unwrap();
    let downloader = downloader(&["a"], 100);
    let handle: DownloaderHandle = downloader.clone();
    let options = CacheOptions { byte_target: Some(16), ..CacheOptions::new(dir.path()) };
    let cache = DownloadCache::open(options, handle).unwrap();

    let fetched = cache.prefetch(&media("a")).await.unwrap();
    assert_eq!(fetched.bytes, 16);
    assert_eq!(std::fs::metadata(fetched.path).unwrap().len(), 16);
}

#[tokio::test]
async fn reopen_recovers_index_from_directory() {
    let dir = tempdir().unwrap();
    let downloader = downloader(&["a", "b"], 4);
    {
        let cache = open(dir.path(), 0, &downloader);
        cache.prefetch(&media("a")).await.unwrap();
        cache.prefetch(&media("b")).await.unwrap();
    }
    std::fs::write(dir.path().join(".staging").join("leftover.part"), b"junk").unwrap();

    let cache = open(dir.path(), 0, &downloader);
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.total_bytes(), 8);
    assert!(cache.prefetch(&media("a")).await.unwrap().from_cache);
    assert_eq!(downloader.attempts("mem://videos/a.mp4"), 1);
    assert_eq!(std::fs::read_dir(dir.path().join(".staging")).unwrap().count(), 0);
}

#[tokio::test]
async fn reopen_trims_to_new_budget() {
    let dir = tempdir().unwrap();
    let downloader = downloader(&["a", "b", "c"], 4);
    {
        let cache = open(dir.path(), 0, &downloader);
        for name in ["a", "b", "c"] {
            cache.prefetch(&media(name)).await.unwrap();
        }
    }
    let cache = open(dir.path(), 8, &downloader);
    assert_eq!(cache.total_bytes(), 8);
    assert!(bytes_on_disk(dir.path()) <= 8);
}

#[tokio::test]
async fn vanished_file_is_downloaded_again() {
    let dir = tempdir().unwrap();
    let downloader = downloader(&["a"], 4);
    let cache = open(dir.path(), 0, &downloader);

    let fetched = cache.prefetch(&media("a")).await.unwrap();
    std::fs::remove_file(&fetched.path).unwrap();
    assert_eq!(cache.cached_file_location(&media("a")), None);
    assert!(!cache.prefetch(&media("a")).await.unwrap().from_cache);
    assert_eq!(downloader.attempts("mem://videos/a.mp4"), 2);
}

#[tokio::test]
async fn relative_directory_rejected() {
    let downloader = downloader(&[], 0);
    let handle: DownloaderHandle = downloader.clone();
    let err = DownloadCache::open(CacheOptions::new("relative/cache"), handle).err().unwrap();
    assert!(matches!(&*err, ErrorKind::InvalidDirectory(_)));
}

#[test]
fn open_requires_runtime() {
    let dir = tempdir().unwrap();
    let downloader = downloader(&[], 0);
    let handle: DownloaderHandle = downloader.clone();
    let err = DownloadCache::open(CacheOptions::new(dir.path()), handle).err().unwrap();
    assert_eq!(*err, ErrorKind::Runtime);
}
