//! Routing behaviour across every host layout.
//!
//! Work submitted from arbitrary tokio tasks must run exactly once, on the
//! owner the affinity names, whether the host is single-threaded, partitioned
//! or cannot be probed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use acton_reactive::prelude::*;
use tokio::time::{timeout, Duration};

use guild_kernel::{
    current_owner, ActorId, HostLayout, Location, OwnerLabel, SchedulerHost,
    TaskRouter, Topology, TopologyDetector,
};

const PARTITIONED: HostLayout = HostLayout::Partitioned {
    region_threads: 4,
    region_shift: 5,
};

async fn router_for(runtime: &mut ActorRuntime, layout: HostLayout) -> (Arc<SchedulerHost>, TaskRouter) {
    let host = SchedulerHost::spawn(runtime, layout).await;
    let detector = TopologyDetector::new(host.clone());
    let router = TaskRouter::new(&detector, host.clone());
    (host, router)
}

async fn wait_for(counter: &AtomicUsize, expected: usize) {
    let reached = timeout(Duration::from_secs(5), async {
        while counter.load(Ordering::SeqCst) < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "only {} of {} jobs ran", counter.load(Ordering::SeqCst), expected);
}

async fn global_work_runs_exactly_once(layout: HostLayout, expected: Topology) {
    let mut runtime = ActonApp::launch_async().await;
    let (_host, router) = router_for(&mut runtime, layout).await;
    assert_eq!(router.topology(), expected);

    let runs = Arc::new(AtomicUsize::new(0));
    let off_owner = Arc::new(AtomicUsize::new(0));

    let mut submitters = Vec::new();
    for _ in 0..8 {
        let router = router.clone();
        let runs = runs.clone();
        let off_owner = off_owner.clone();
        submitters.push(tokio::spawn(async move {
            for _ in 0..25 {
                let runs = runs.clone();
                let off_owner = off_owner.clone();
                router.run_on_global_authority(move || {
                    if current_owner() != Some(OwnerLabel::Global) {
                        off_owner.fetch_add(1, Ordering::SeqCst);
                    }
                    runs.fetch_add(1, Ordering::SeqCst);
                });
            }
        }));
    }
    for submitter in submitters {
        submitter.await.unwrap();
    }

    wait_for(&runs, 200).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 200);
    assert_eq!(off_owner.load(Ordering::SeqCst), 0);

    let _ = runtime.shutdown_all().await;
}

#[tokio::test]
async fn test_global_work_exactly_once_single_authority() {
    global_work_runs_exactly_once(HostLayout::SingleAuthority, Topology::SingleAuthority).await;
}

#[tokio::test]
async fn test_global_work_exactly_once_partitioned() {
    global_work_runs_exactly_once(PARTITIONED, Topology::PartitionedRegions).await;
}

#[tokio::test]
async fn test_global_work_exactly_once_unknown_topology() {
    global_work_runs_exactly_once(HostLayout::Opaque, Topology::Unknown).await;
}

#[tokio::test]
async fn test_location_work_lands_on_region_owner_when_partitioned() {
    let mut runtime = ActonApp::launch_async().await;
    let (_host, router) = router_for(&mut runtime, PARTITIONED).await;

    let seen = Arc::new(Mutex::new(None));
    let slot = seen.clone();
    router.run_at_location(&Location::new("world", 4_000.0, 64.0, -9_000.0), move || {
        *slot.lock().unwrap() = current_owner();
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(matches!(*seen.lock().unwrap(), Some(OwnerLabel::Region(_))));
    let _ = runtime.shutdown_all().await;
}

#[tokio::test]
async fn test_location_work_falls_back_to_global_without_regions() {
    let mut runtime = ActonApp::launch_async().await;
    let (_host, router) = router_for(&mut runtime, HostLayout::Opaque).await;

    let seen = Arc::new(Mutex::new(None));
    let slot = seen.clone();
    router.run_at_location(&Location::new("world", 10.0, 64.0, 10.0), move || {
        *slot.lock().unwrap() = current_owner();
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(*seen.lock().unwrap(), Some(OwnerLabel::Global));
    let _ = runtime.shutdown_all().await;
}

#[tokio::test]
async fn test_actor_work_or_give_up_runs_exactly_once() {
    let mut runtime = ActonApp::launch_async().await;
    let (host, router) = router_for(&mut runtime, PARTITIONED).await;

    let online = ActorId::named("online");
    let gone = ActorId::named("gone");
    host.register_actor(online, "online", Location::new("world", 100.0, 64.0, 100.0));
    host.register_actor(gone, "gone", Location::new("world", 0.0, 64.0, 0.0));
    host.retire_actor(gone);

    let work = Arc::new(AtomicUsize::new(0));
    let give_up = Arc::new(AtomicUsize::new(0));
    for actor in [online, gone] {
        let w = work.clone();
        let g = give_up.clone();
        router.run_for_actor(
            actor,
            move || {
                assert!(matches!(current_owner(), Some(OwnerLabel::Region(_))));
                w.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                g.fetch_add(1, Ordering::SeqCst);
            },
        );
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(work.load(Ordering::SeqCst), 1);
    assert_eq!(give_up.load(Ordering::SeqCst), 1);
    let _ = runtime.shutdown_all().await;
}

#[tokio::test]
async fn test_delayed_and_periodic_work_follow_ticks() {
    let mut runtime = ActonApp::launch_async().await;
    let (host, router) = router_for(&mut runtime, HostLayout::SingleAuthority).await;

    let later = Arc::new(AtomicUsize::new(0));
    let periodic = Arc::new(AtomicUsize::new(0));
    let l = later.clone();
    router.run_later(move || {
        l.fetch_add(1, Ordering::SeqCst);
    }, 5);
    let p = periodic.clone();
    let handle = router.run_periodically(
        move || {
            p.fetch_add(1, Ordering::SeqCst);
        },
        2,
        2,
    );
    tokio::time::sleep(Duration::from_millis(30)).await;

    host.advance(4).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(later.load(Ordering::SeqCst), 0);
    assert_eq!(periodic.load(Ordering::SeqCst), 2);

    host.advance(1).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(later.load(Ordering::SeqCst), 1);

    handle.cancel();
    host.advance(6).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(periodic.load(Ordering::SeqCst), 2);

    let _ = runtime.shutdown_all().await;
}
