//! Integration tests for stall detection, restart and the end-to-end session flow

mod common;

use common::*;
use std::time::Duration;
use youstream_core::download::{ItemState, RateMode};
use youstream_core::error::StreamError;
use youstream_core::playback::{
    open_when_playable, FinishOutcome, PlaybackSync, ReadinessOutcome, RendererEvent, TickOutcome,
};
use youstream_core::PrefetchOutcome;

#[tokio::test]
async fn test_stall_restart_trigger() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let source = ScriptedSource::new(10);
    let executor = ScriptedExecutor::held(KIB, 1, Duration::from_millis(1));
    let scheduler = scheduler(test_config(dir.path()), source, executor, "lofi");
    let item = scheduler.navigate_to(0).await?;

    // Stopped at 5s while downloading: restart at 5s
    let mut sync = PlaybackSync::new(scheduler.clone());
    match sync.on_tick(false, Some(5.0)).await? {
        TickOutcome::Restart { index, path, at } => {
            assert_eq!(index, 0);
            assert_eq!(at, 5.0);
            assert_eq!(path, item.paths().partial_path);
        }
        other => panic!("expected restart, got {:?}", other),
    }

    // Stopped at 1s: still starting up, no restart
    let mut sync = PlaybackSync::new(scheduler.clone());
    let outcome = sync.on_tick(false, Some(1.0)).await?;
    assert_eq!(outcome, TickOutcome::Continue(PrefetchOutcome::Busy(0)));

    scheduler.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_no_restart_once_downloaded() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let source = ScriptedSource::new(10);
    let executor = ScriptedExecutor::new(KIB, 1, Duration::from_millis(1));
    let scheduler = scheduler(test_config(dir.path()), source, executor, "lofi");

    let item = scheduler.navigate_to(0).await?;
    wait_for_state(&item, ItemState::Downloaded).await;

    let mut sync = PlaybackSync::new(scheduler.clone());
    let outcome = sync.on_tick(false, Some(5.0)).await?;
    assert_eq!(outcome, TickOutcome::Continue(PrefetchOutcome::Started(1)));
    Ok(())
}

#[tokio::test]
async fn test_restart_cooldown() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let source = ScriptedSource::new(10);
    let executor = ScriptedExecutor::held(KIB, 1, Duration::from_millis(1));
    let scheduler = scheduler(test_config(dir.path()), source, executor, "lofi");
    scheduler.navigate_to(0).await?;

    let mut sync = PlaybackSync::new(scheduler.clone());
    assert!(matches!(sync.on_tick(false, Some(5.0)).await?, TickOutcome::Restart { .. }));

    // Renderer still reloading: no second restart
    assert_eq!(sync.on_tick(false, None).await?, TickOutcome::RestartPending);
    assert_eq!(sync.on_tick(false, None).await?, TickOutcome::RestartPending);

    // Renderer resumed, then ran dry again
    assert_eq!(
        sync.on_tick(true, Some(9.0)).await?,
        TickOutcome::Continue(PrefetchOutcome::Busy(0))
    );
    match sync.on_tick(false, None).await? {
        TickOutcome::Restart { at, .. } => assert_eq!(at, 9.0),
        other => panic!("expected restart, got {:?}", other),
    }

    scheduler.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_position_estimate_tolerates_missing_readings() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let source = ScriptedSource::new(10);
    let executor = ScriptedExecutor::held(KIB, 1, Duration::from_millis(1));
    let scheduler = scheduler(test_config(dir.path()), source, executor, "lofi");

    let mut sync = PlaybackSync::new(scheduler.clone());
    assert_eq!(sync.on_tick(true, Some(3.0)).await?, TickOutcome::Idle);

    scheduler.navigate_to(0).await?;

    // Renderer playing but not reporting: advance by the 100 ms tick
    for _ in 0..10 {
        sync.on_tick(true, None).await?;
    }
    assert!((sync.last_known_position() - 1.0).abs() < 1e-9);

    // Zero and NaN readings are ignored
    sync.on_tick(true, Some(0.0)).await?;
    sync.on_tick(false, Some(f64::NAN)).await?;
    assert!((sync.last_known_position() - 1.1).abs() < 1e-9);

    // Stopped and silent: no advance
    sync.on_tick(false, None).await?;
    assert!((sync.last_known_position() - 1.1).abs() < 1e-9);

    // A real reading wins
    sync.on_tick(true, Some(42.5)).await?;
    assert_eq!(sync.last_known_position(), 42.5);

    // Navigation starts the next item from zero
    scheduler.navigate_to(1).await?;
    assert!(matches!(sync.on_tick(false, None).await?, TickOutcome::Continue(_)));
    assert_eq!(sync.last_known_position(), 0.0);

    scheduler.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_media_finished_classification() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let source = ScriptedSource::new(10);
    let executor = ScriptedExecutor::held(KIB, 1, Duration::from_millis(1));
    let scheduler = scheduler(test_config(dir.path()), source, executor.clone(), "lofi");
    let item = scheduler.navigate_to(0).await?;

    let mut sync = PlaybackSync::new(scheduler.clone());
    sync.on_tick(true, Some(5.0)).await?;

    // Ran out of bytes mid-download: keep the position
    assert_eq!(sync.on_media_finished().await?, FinishOutcome::Stalled);
    assert_eq!(sync.last_known_position(), 5.0);

    // Really finished: reset and prefetch
    executor.release();
    wait_for_state(&item, ItemState::Downloaded).await;
    assert_eq!(
        sync.on_event(RendererEvent::MediaFinished).await?,
        Some(FinishOutcome::Finished(PrefetchOutcome::Started(1)))
    );
    assert_eq!(sync.last_known_position(), 0.0);
    Ok(())
}

#[tokio::test]
async fn test_tick_renderer_reloads_at_position() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let source = ScriptedSource::new(10);
    let executor = ScriptedExecutor::held(KIB, 1, Duration::from_millis(1));
    let scheduler = scheduler(test_config(dir.path()), source, executor, "lofi");
    let item = scheduler.navigate_to(0).await?;

    let renderer = RecordingRenderer::new();
    let mut sync = PlaybackSync::new(scheduler.clone());

    renderer.set_state(true, Some(4.0));
    sync.tick_renderer(renderer.as_ref()).await?;
    assert!(renderer.loads().is_empty());

    renderer.set_state(false, None);
    sync.tick_renderer(renderer.as_ref()).await?;
    assert_eq!(renderer.loads(), vec![(item.paths().partial_path.clone(), Some(4.0))]);

    scheduler.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_probed_duration_and_progress() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let source = ScriptedSource::new(10);
    let executor = ScriptedExecutor::held(KIB, 1, Duration::from_millis(1));
    let scheduler = scheduler(test_config(dir.path()), source, executor, "lofi");
    let item = scheduler.navigate_to(0).await?;

    let mut sync = PlaybackSync::new(scheduler.clone());
    assert_eq!(sync.progress_fraction().await, None);

    let started = sync
        .on_event(RendererEvent::MediaStarted { duration_secs: Some(200.0) })
        .await?;
    assert_eq!(started, None);
    assert_eq!(item.duration_secs().await, Some(200));

    sync.on_tick(true, Some(50.0)).await?;
    let fraction = sync.progress_fraction().await.unwrap();
    assert!((fraction - 0.25).abs() < 1e-9);

    scheduler.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_failing_catalog_is_not_fetched_every_tick() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let source = ScriptedSource::new(100);
    source.fail_at(10);
    let executor = ScriptedExecutor::new(KIB, 1, Duration::from_millis(1));
    let scheduler = scheduler(test_config(dir.path()), source.clone(), executor, "lofi");

    let item = scheduler.navigate_to(9).await?;
    wait_for_state(&item, ItemState::Downloaded).await;
    assert_eq!(source.fetch_count(), 1);

    // The first prefetch past the window reports the failure
    let mut sync = PlaybackSync::new(scheduler.clone());
    let first = sync.on_tick(true, Some(3.0)).await;
    assert!(matches!(first, Err(StreamError::CatalogUnavailable { offset: 10, .. })));

    // Later ticks stay inside the known records
    for _ in 0..20 {
        assert_eq!(
            sync.on_tick(true, Some(3.0)).await?,
            TickOutcome::Continue(PrefetchOutcome::Idle)
        );
    }
    assert_eq!(source.fetch_count(), 2);

    // A navigation re-enables fetching
    source.recover(10);
    let item = scheduler.navigate_to(8).await?;
    wait_for_state(&item, ItemState::Downloaded).await;
    assert_eq!(source.fetch_count(), 2);

    assert_eq!(
        sync.on_tick(true, Some(3.0)).await?,
        TickOutcome::Continue(PrefetchOutcome::Started(10))
    );
    assert_eq!(source.fetched_offsets(), vec![0, 10, 10]);
    assert_eq!(scheduler.known_items().await, 20);
    Ok(())
}

#[tokio::test]
async fn test_lofi_session_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path());
    let threshold = config.readiness_threshold_bytes;
    assert_eq!(config.page_size, 10);

    let source = ScriptedSource::new(40);
    let executor = ScriptedExecutor::held(256 * KIB, 8, Duration::from_millis(5));
    let scheduler = scheduler(config, source.clone(), executor.clone(), "lofi");
    let renderer = RecordingRenderer::new();

    println!("1. Opening item 0 once playable...");
    let outcome = open_when_playable(&scheduler, 0, threshold, renderer.as_ref()).await?;
    assert!(matches!(outcome, ReadinessOutcome::ThresholdReached { bytes } if bytes >= threshold));
    assert_eq!(scheduler.known_items().await, 10);
    assert_eq!(source.fetched_offsets(), vec![0]);

    let item0 = scheduler.item(0).await.unwrap();
    assert_eq!(item0.rate_mode().await, RateMode::Full);
    assert_eq!(renderer.loads(), vec![(item0.paths().partial_path.clone(), None)]);
    println!("   ✓ Playing partial file of {}", item0.metadata().title);

    println!("2. Prefetch is held back while item 0 downloads...");
    let mut sync = PlaybackSync::new(scheduler.clone());
    renderer.set_state(true, Some(1.0));
    assert_eq!(
        sync.tick_renderer(renderer.as_ref()).await?,
        TickOutcome::Continue(PrefetchOutcome::Busy(0))
    );
    assert!(scheduler.item(1).await.is_some());
    assert_eq!(scheduler.item(1).await.unwrap().state().await, ItemState::NotRequested);

    println!("3. Item 0 finishes, item 1 prefetches at half rate...");
    executor.release();
    wait_for_state(&item0, ItemState::Downloaded).await;
    executor.hold();

    assert_eq!(
        sync.tick_renderer(renderer.as_ref()).await?,
        TickOutcome::Continue(PrefetchOutcome::Started(1))
    );
    let item1 = scheduler.item(1).await.unwrap();
    assert_eq!(item1.state().await, ItemState::Downloading);
    assert_eq!(item1.rate_mode().await, RateMode::Prefetch);
    wait_for_bytes(&item1, 1).await;
    assert_eq!(executor.request_for(1).map(|r| r.rate_limit_kib), Some(100));
    assert_eq!(executor.max_concurrent(), 1);

    scheduler.stop().await;
    Ok(())
}
