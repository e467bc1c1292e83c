mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{drain, hooks_of, journal, kinds, quiet, Journal, Recorder};
use servisor::{EventKind, Fault, Lifecycle, Readiness, Service, ServiceError, State, Stop};
use tokio::time::Instant;

fn recorder(name: &str, journal: &Journal) -> Service {
    Service::builder(name.to_string())
        .config(quiet())
        .build(Recorder::new(journal))
}

/// a ─┬─ b
///    └─ c
fn tree(journal: &Journal) -> (Service, Service, Service) {
    let a = recorder("a", journal);
    let b = recorder("b", journal);
    let c = recorder("c", journal);
    a.add_service(b.clone()).expect("attach b");
    a.add_service(c.clone()).expect("attach c");
    (a, b, c)
}

#[tokio::test]
async fn children_start_in_order_before_parent_do_start() {
    let j = journal();
    let (a, b, c) = tree(&j);

    a.start().await.expect("start");

    assert!(a.is_started() && b.is_started() && c.is_started());
    assert_eq!(hooks_of(&j, "do_start"), vec!["b", "c", "a"]);
    assert_eq!(hooks_of(&j, "pre_start"), vec!["a", "b", "c"]);
    assert_eq!(hooks_of(&j, "children_up"), vec!["b", "c", "a"]);
}

#[tokio::test]
async fn stop_runs_children_in_reverse_order() {
    let j = journal();
    let (a, b, c) = tree(&j);
    a.start().await.expect("start");
    j.lock().clear();

    assert!(matches!(a.stop().await, Ok(Stop::Completed)));

    assert_eq!(hooks_of(&j, "do_stop"), vec!["c", "b", "a"]);
    assert_eq!(hooks_of(&j, "pre_stop"), vec!["a", "c", "b"]);
    assert_eq!(hooks_of(&j, "post_stop"), vec!["c", "b", "a"]);
    for svc in [&a, &b, &c] {
        assert_eq!(svc.state(), State::Stopped);
        assert!(!svc.is_ready());
    }
}

#[tokio::test]
async fn double_start_is_rejected_and_leaves_service_running() {
    let j = journal();
    let svc = recorder("svc", &j);
    svc.start().await.expect("first start");

    let err = svc.start().await.expect_err("second start must fail");
    assert!(err.is_already_started(), "{err:?}");
    assert!(svc.is_started());
    assert_eq!(hooks_of(&j, "do_start"), vec!["svc"]);
}

#[tokio::test(start_paused = true)]
async fn stopped_signal_is_set_after_stop() {
    let svc = Service::builder("svc").config(quiet()).build(());
    svc.start().await.expect("start");

    let waiter = {
        let svc = svc.clone();
        tokio::spawn(async move { svc.wait_stopped().await })
    };
    svc.stop().await.expect("stop");

    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter woke")
        .expect("waiter task");
    assert!(!svc.is_started());
    assert!(!svc.is_ready());
}

#[tokio::test]
async fn start_stop_start_round_trip() {
    let j = journal();
    let (a, _b, _c) = tree(&j);

    a.start().await.expect("start");
    a.stop().await.expect("stop");
    a.start().await.expect("restart");

    assert!(a.is_started() && a.is_ready());
    assert_eq!(hooks_of(&j, "do_start"), vec!["b", "c", "a", "b", "c", "a"]);
    a.stop().await.expect("stop again");
}

#[tokio::test]
async fn start_failure_tears_down_started_siblings() {
    let j = journal();
    let a = recorder("a", &j);
    let b = recorder("b", &j);
    let c = Service::builder("c")
        .config(quiet())
        .build(Recorder::failing(&j, "do_start"));
    a.add_service(b.clone()).expect("attach b");
    a.add_service(c.clone()).expect("attach c");

    let err = a.start().await.expect_err("start must fail");
    assert!(
        matches!(&err, ServiceError::Hook { service, hook: "do_start", .. } if service == "c"),
        "{err:?}"
    );

    for svc in [&a, &b, &c] {
        assert_eq!(svc.state(), State::Stopped, "{svc:?}");
    }
    assert_eq!(hooks_of(&j, "do_stop"), vec!["c", "b", "a"]);
    assert!(hooks_of(&j, "post_start").iter().all(|s| s == "b"));
}

#[tokio::test]
async fn teardown_failure_after_start_failure_is_reported() {
    struct BrokenBothWays;

    #[async_trait::async_trait]
    impl servisor::Lifecycle for BrokenBothWays {
        async fn do_start(&self, _svc: &Service) -> Result<servisor::Readiness, servisor::Fault> {
            Err("bind failed".into())
        }
        async fn do_stop(&self, _svc: &Service) -> Result<(), servisor::Fault> {
            Err("close failed".into())
        }
    }

    let svc = Service::new("broken", BrokenBothWays);
    let err = svc.start().await.expect_err("start must fail");
    match err {
        ServiceError::StartAborted { source, teardown } => {
            assert!(matches!(source.as_ref(), ServiceError::Hook { hook: "do_start", .. }));
            assert!(matches!(teardown.as_ref(), ServiceError::Hook { hook: "do_stop", .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(svc.state(), State::Stopped);
}

#[tokio::test(start_paused = true)]
async fn failing_stop_hook_still_runs_cleanup() {
    let j = journal();
    let svc = Service::builder("svc")
        .config(quiet())
        .build(Recorder::failing(&j, "pre_stop"));
    svc.start().await.expect("start");
    let task = svc.spawn(|ctx| async move {
        ctx.cancelled().await;
        Ok(())
    });

    let err = svc.stop().await.expect_err("pre_stop fails");
    assert!(matches!(err, ServiceError::Hook { hook: "pre_stop", .. }));

    assert!(task.await.is_completed());
    assert_eq!(svc.state(), State::Stopped);
    assert_eq!(svc.task_count(), 0);
    assert_eq!(hooks_of(&j, "do_stop"), Vec::<String>::new());
    assert_eq!(hooks_of(&j, "post_stop"), vec!["svc"]);
}

#[tokio::test(start_paused = true)]
async fn stop_kills_tasks_that_ignore_cancellation() {
    let svc = Service::builder("stubborn")
        .config(quiet())
        .kill_grace(Duration::from_millis(500))
        .build(());
    svc.start().await.expect("start");
    let mut rx = svc.subscribe();

    let task = svc.spawn(|_ctx| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    });

    let started = Instant::now();
    svc.stop_within(Duration::from_millis(100))
        .await
        .expect("stop");
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "{elapsed:?}");
    assert!(task.await.is_killed());
    assert_eq!(svc.task_count(), 0);

    let events = drain(&mut rx);
    let seen = kinds(&events);
    assert!(seen.contains(&EventKind::GraceExceeded), "{seen:?}");
    assert!(seen.contains(&EventKind::TasksKilled), "{seen:?}");
    let grace = events
        .iter()
        .find(|e| e.kind == EventKind::GraceExceeded)
        .expect("grace event");
    assert_eq!(grace.timeout_ms, Some(100));
    assert_eq!(grace.tasks, Some(1));
}

#[tokio::test(start_paused = true)]
async fn pending_readiness_times_out_without_failing_start() {
    let j = journal();
    let svc = Service::builder("slow")
        .config(quiet())
        .ready_timeout(Duration::from_millis(200))
        .build(Recorder {
            pending: true,
            ..Recorder::new(&j)
        });
    let mut rx = svc.subscribe();

    let started = Instant::now();
    svc.start().await.expect("start");
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(svc.is_started());
    assert!(!svc.is_ready());
    assert!(kinds(&drain(&mut rx)).contains(&EventKind::ReadyTimeout));

    let err = svc.require_ready().await.expect_err("still not ready");
    assert!(matches!(err, ServiceError::NotReady { .. }));

    svc.set_ready();
    svc.require_ready().await.expect("ready now");
    svc.stop().await.expect("stop");
}

#[tokio::test]
async fn non_blocking_start_does_not_wait_for_readiness() {
    let j = journal();
    let svc = Service::builder("slow")
        .config(quiet())
        .ready_timeout(Duration::from_secs(3600))
        .build(Recorder {
            pending: true,
            ..Recorder::new(&j)
        });

    svc.start_with(false).await.expect("start");
    assert!(svc.is_started());
    assert!(!svc.is_ready());
    assert!(!svc.wait_ready(Duration::from_millis(1)).await);
    svc.stop().await.expect("stop");
}

#[tokio::test(start_paused = true)]
async fn readiness_set_from_a_spawned_task_unblocks_start() {
    struct Warmup;

    #[async_trait::async_trait]
    impl servisor::Lifecycle for Warmup {
        async fn do_start(&self, svc: &Service) -> Result<servisor::Readiness, servisor::Fault> {
            let me = svc.clone();
            svc.spawn(move |_ctx| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                me.set_ready();
                Ok(())
            });
            Ok(servisor::Readiness::Pending)
        }
    }

    let svc = Service::builder("warm").config(quiet()).build(Warmup);
    let started = Instant::now();
    svc.start().await.expect("start");
    assert!(svc.is_ready());
    assert!(started.elapsed() < Duration::from_millis(200));
    svc.stop().await.expect("stop");
}

#[tokio::test(start_paused = true)]
async fn stop_from_inside_own_task_is_deferred() {
    let root = Service::builder("root").config(quiet()).build(());
    let child = Service::builder("child").config(quiet()).build(());
    root.add_service(child.clone()).expect("attach");
    root.start().await.expect("start");

    let (tx, rx) = tokio::sync::oneshot::channel();
    let me = root.clone();
    child.spawn(move |_ctx| async move {
        let outcome = me.stop().await;
        let _ = tx.send(matches!(outcome, Ok(Stop::Deferred(_))));
        Ok(())
    });

    assert!(rx.await.expect("report"), "stop from a descendant task must defer");
    tokio::time::timeout(Duration::from_secs(5), root.wait_stopped())
        .await
        .expect("deferred stop completes");
    assert_eq!(root.state(), State::Stopped);
    assert_eq!(child.state(), State::Stopped);
}

#[tokio::test]
async fn reload_runs_children_first() {
    let j = journal();
    let (a, _b, _c) = tree(&j);
    a.start().await.expect("start");
    j.lock().clear();

    a.reload().await.expect("reload");
    assert_eq!(hooks_of(&j, "do_reload"), vec!["b", "c", "a"]);
    assert!(a.is_started());
    a.stop().await.expect("stop");
}

#[tokio::test(start_paused = true)]
async fn spawn_later_skips_work_cancelled_during_delay() {
    let svc = Service::builder("svc").config(quiet()).build(());
    svc.start().await.expect("start");

    let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = std::sync::Arc::clone(&ran);
    let task = svc.spawn_later(Duration::from_secs(10), move |_ctx| async move {
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    });
    assert_eq!(svc.task_count(), 1);

    svc.stop().await.expect("stop");
    assert!(task.await.is_completed());
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test]
async fn scope_stops_on_exit() {
    let svc = Service::builder("scoped").config(quiet()).build(());
    let value = svc
        .scope(|s| async move {
            assert!(s.is_started());
            7
        })
        .await
        .expect("scope");
    assert_eq!(value, 7);
    assert_eq!(svc.state(), State::Stopped);
}

#[tokio::test]
async fn lifecycle_events_are_published_on_the_root_bus() {
    let j = journal();
    let (a, b, _c) = tree(&j);
    let mut rx = a.subscribe();

    a.start().await.expect("start");
    a.stop().await.expect("stop");

    let events = drain(&mut rx);
    let started: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::ServiceStarted)
        .filter_map(|e| e.service.as_deref().map(str::to_string))
        .collect();
    assert_eq!(started, vec!["b", "c", "a"]);
    assert!(events
        .iter()
        .any(|e| e.kind == EventKind::ServiceStopped && e.service.as_deref() == Some(b.name())));
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
}

#[tokio::test(start_paused = true)]
async fn stop_during_start_leaves_no_descendant_running() {
    let j = journal();
    let parent = recorder("parent", &j);
    let a = Service::builder("a")
        .config(quiet())
        .ready_timeout(Duration::from_secs(3600))
        .build(Recorder {
            pending: true,
            ..Recorder::new(&j)
        });
    let b = recorder("b", &j);
    parent.add_service(a.clone()).expect("attach a");
    parent.add_service(b.clone()).expect("attach b");

    let starting = {
        let parent = parent.clone();
        tokio::spawn(async move { parent.start().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(a.state(), State::Starting);

    parent.stop().await.expect("stop");
    let err = starting
        .await
        .expect("start task")
        .expect_err("stop overtook start");
    assert!(matches!(err, ServiceError::Stopping { .. }), "{err:?}");

    tokio::time::sleep(Duration::from_secs(10)).await;
    for svc in [&parent, &a, &b] {
        assert_eq!(svc.state(), State::Stopped, "{svc:?}");
    }
    assert_eq!(hooks_of(&j, "pre_start"), vec!["parent", "a"]);
    assert_eq!(hooks_of(&j, "do_start"), vec!["a"]);
    assert!(hooks_of(&j, "post_start").is_empty());
}

struct SlowStop {
    stops: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Lifecycle for SlowStop {
    async fn do_start(&self, svc: &Service) -> Result<Readiness, Fault> {
        svc.spawn(|ctx| async move {
            ctx.cancelled().await;
            Ok(())
        });
        Ok(Readiness::Ready)
    }

    async fn do_stop(&self, _svc: &Service) -> Result<(), Fault> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn overlapping_stop_waits_and_spares_the_next_cycle() {
    let stops = Arc::new(AtomicUsize::new(0));
    let svc = Service::builder("svc").config(quiet()).build(SlowStop {
        stops: Arc::clone(&stops),
    });
    svc.start().await.expect("start");

    let late = {
        let svc = svc.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            svc.stop().await
        })
    };
    let began = Instant::now();
    svc.stop().await.expect("first stop");
    assert!(began.elapsed() >= Duration::from_millis(100));

    svc.start().await.expect("restart");
    let outcome = late.await.expect("late stop task");
    assert!(matches!(outcome, Ok(Stop::Completed)), "{outcome:?}");

    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert_eq!(svc.state(), State::Running);
    assert!(svc.is_ready());
    assert_eq!(svc.task_count(), 1);
    svc.stop().await.expect("stop");
}
