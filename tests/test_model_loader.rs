mod common;
use common::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use domino_vision::model::LoadStatus;

fn counting_loader(
    delay: Duration,
    fail: bool,
) -> (Arc<ModelLoader<dyn DetectorModel>>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let loader = ModelLoader::<dyn DetectorModel>::new("test-detector", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(delay);
        if fail {
            anyhow::bail!("weights file is corrupt");
        }
        Ok(Arc::new(FakeDetector::default()) as Arc<dyn DetectorModel>)
    });
    (Arc::new(loader), calls)
}

#[test]
fn test_concurrent_callers_share_one_load() {
    let (loader, calls) = counting_loader(Duration::from_millis(100), false);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let loader = loader.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                loader.load_model()
            })
        })
        .collect();

    let models: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().expect("load should succeed"))
        .collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(models.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert_eq!(loader.status(), LoadStatus::Loaded);
}

#[test]
fn test_loaded_model_is_reused() -> anyhow::Result<()> {
    let (loader, calls) = counting_loader(Duration::ZERO, false);
    assert_eq!(loader.status(), LoadStatus::Idle);

    let first = loader.load_model()?;
    let second = loader.load_model()?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_failed_load_reports_error_status() {
    let (loader, _calls) = counting_loader(Duration::ZERO, true);

    let Err(err) = loader.load_model() else {
        panic!("load should fail");
    };
    assert!(matches!(err, DetectionError::ModelLoadFailed(ref msg) if msg.contains("corrupt")));
    assert_eq!(loader.status(), LoadStatus::Error);
}

#[test]
fn test_concurrent_waiters_share_a_failure() {
    let (loader, calls) = counting_loader(Duration::from_millis(100), true);
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let loader = loader.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                loader.load_model().is_err()
            })
        })
        .collect();

    assert!(handles.into_iter().all(|h| h.join().unwrap()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failed_load_is_retried_later() {
    let (loader, calls) = counting_loader(Duration::ZERO, true);
    assert!(loader.load_model().is_err());
    assert!(loader.load_model().is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_unload_forces_reload() -> anyhow::Result<()> {
    let (loader, calls) = counting_loader(Duration::ZERO, false);
    loader.load_model()?;
    loader.unload();
    assert_eq!(loader.status(), LoadStatus::Idle);

    loader.load_model()?;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn test_panicking_loader_becomes_an_error() {
    let loader = ModelLoader::<dyn DetectorModel>::new("exploding", || -> anyhow::Result<Arc<dyn DetectorModel>> {
        panic!("loader exploded")
    });
    assert!(matches!(loader.load_model(), Err(DetectionError::ModelLoadFailed(_))));
    assert_eq!(loader.status(), LoadStatus::Error);
}
