//! Two cache instances sharing a transport, with a session monitor
//! driving a fetch binding.
//!
//! Run with `cargo run -p atria-fetch --example two_instances`.

use std::sync::Arc;
use std::time::Duration;

use atria_cache::{
    CacheConfig, CachedFetcher, LocalTransport, MemorySnapshotStore, SnapshotStore, SyncTransport,
    SyncedCache,
};
use atria_fetch::{FetchBinding, FetchConfig, boxed_fetch};
use atria_session::{
    ActivityKind, AuthSession, MemoryAuthProvider, MonitorConfig, SessionMonitor,
    SharedAuthProvider,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // One transport and snapshot store shared by everything, standing in
    // for the broadcast channel and persisted storage of a deployment.
    let transport = Arc::new(LocalTransport::new());
    let snapshot = Arc::new(MemorySnapshotStore::new());

    let cache_a: Arc<SyncedCache<String>> = SyncedCache::new(
        CacheConfig::new().with_capacity(100),
        Arc::clone(&snapshot) as Arc<dyn SnapshotStore>,
        Arc::clone(&transport) as Arc<dyn SyncTransport>,
    );
    let cache_b: Arc<SyncedCache<String>> = SyncedCache::new(
        CacheConfig::new().with_capacity(100),
        Arc::clone(&snapshot) as Arc<dyn SnapshotStore>,
        Arc::clone(&transport) as Arc<dyn SyncTransport>,
    );

    // A provider holding a session that expires in an hour.
    let provider = Arc::new(MemoryAuthProvider::new());
    provider
        .set_session(Some(AuthSession::expiring_in(
            "user-42",
            Duration::from_secs(3600),
        )))
        .await;

    let monitor = SessionMonitor::new(
        Arc::clone(&provider) as SharedAuthProvider,
        Arc::clone(&snapshot) as Arc<dyn SnapshotStore>,
        Arc::clone(&transport) as Arc<dyn SyncTransport>,
        MonitorConfig::new().with_check_interval(Duration::from_millis(200)),
    );
    monitor.start();
    monitor.record_activity(ActivityKind::Pointer);

    // A binding on instance A fetching a profile.
    let binding = FetchBinding::new(
        CachedFetcher::new(Arc::clone(&cache_a)),
        "profile:user-42",
        boxed_fetch(|| async {
            // Stand-in for a backend call.
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok("Jane Doe <jane@example.com>".to_string())
        }),
        FetchConfig::new().with_ttl(Duration::from_secs(120)),
    );
    binding.attach_session(monitor.subscribe());

    let profile = binding.fetch(false).await?;
    println!("instance A fetched: {profile}");

    // The write is mirrored; instance B sees it without fetching.
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!(
        "instance B observes: {:?}",
        cache_b.get("profile:user-42")
    );

    // A second fetch is a cache hit.
    binding.fetch(false).await?;
    println!("instance A stats: {:?}", cache_a.stats());

    // The session disappears; the next check forces a logout, which
    // clears both caches and the binding.
    provider.set_session(None).await;
    monitor.check_session().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!(
        "after logout: state={:?} A={:?} B={:?} binding_error={:?}",
        monitor.state(),
        cache_a.get("profile:user-42"),
        cache_b.get("profile:user-42"),
        binding.snapshot().error,
    );
    println!("redirect to: {}", monitor.logout_redirect());

    monitor.shutdown();
    Ok(())
}
