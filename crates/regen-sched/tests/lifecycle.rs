// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs, clippy::unwrap_used, clippy::panic)]
//! Pause, clear, close, dedicated-rate tasks and worker failure.

use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use regen_dry_tests::ProbeTask;
use regen_sched::{Scheduler, SchedulerConfig, SchedulerError};

fn spawn() -> Arc<Scheduler<()>> {
    let scheduler = Arc::new(
        Scheduler::spawn(SchedulerConfig {
            idle_sleep_ms: 5,
            ..SchedulerConfig::default()
        })
        .unwrap(),
    );
    thread::sleep(Duration::from_millis(20));
    scheduler
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}

#[test]
fn blocking_pause_waits_for_the_pass_in_flight() {
    let scheduler = spawn();
    let probes: Vec<Arc<ProbeTask>> = (0..50)
        .map(|i| {
            ProbeTask::builder(format!("t{i}"))
                .logic()
                .running()
                .logic_delay(Duration::from_millis(2))
                .build()
        })
        .collect();
    for probe in &probes {
        scheduler.register_task(probe.clone()).unwrap();
    }
    scheduler.resume();
    scheduler.drive_frame(&mut (), 16.0);
    assert!(wait_until(Duration::from_secs(2), || scheduler
        .is_update_in_progress()));

    scheduler.pause(true);
    assert!(!scheduler.is_update_in_progress());
    assert!(probes.iter().all(|p| p.logic_active() == 0));
    let after_pause: Vec<usize> = probes.iter().map(|p| p.logic_calls()).collect();
    assert!(after_pause[0] >= 1);
    assert!(after_pause.iter().all(|&n| n == after_pause[0]));

    scheduler.resume();
    thread::sleep(Duration::from_millis(50));
    let after_resume: Vec<usize> = probes.iter().map(|p| p.logic_calls()).collect();
    assert_eq!(after_pause, after_resume);
}

#[test]
fn blocking_unregister_makes_the_task_safe_to_drop() {
    let scheduler = spawn();
    let probe = ProbeTask::builder("slow")
        .logic()
        .running()
        .logic_delay(Duration::from_millis(30))
        .build();
    scheduler.register_task(probe.clone()).unwrap();
    scheduler.resume();
    scheduler.drive_frame(&mut (), 16.0);
    assert!(wait_until(Duration::from_secs(2), || probe.logic_active() == 1));

    scheduler.unregister_task(&*probe, true);
    assert_eq!(probe.logic_active(), 0);
    let calls = probe.logic_calls();
    for _ in 0..3 {
        scheduler.drive_frame(&mut (), 16.0);
    }
    thread::sleep(Duration::from_millis(50));
    assert_eq!(probe.logic_calls(), calls);
    assert_eq!(scheduler.logic_task_count(), 0);
}

#[test]
fn blocking_calls_from_a_logic_hook_do_not_wait_on_themselves() {
    let scheduler = spawn();
    let quitter = ProbeTask::builder("quitter")
        .logic()
        .running()
        .on_logic({
            let sched = Arc::downgrade(&scheduler);
            move |me| {
                if let Some(sched) = sched.upgrade() {
                    sched.unregister_task(me, true);
                    sched.pause(true);
                }
            }
        })
        .build();
    scheduler.register_task(quitter.clone()).unwrap();
    scheduler.resume();
    scheduler.drive_frame(&mut (), 16.0);
    assert!(wait_until(Duration::from_secs(2), || scheduler.is_paused()
        && quitter.logic_calls() == 1));
    scheduler.resume();
    for _ in 0..3 {
        scheduler.drive_frame(&mut (), 16.0);
    }
    assert_eq!(quitter.logic_calls(), 1);
}

#[test]
fn resume_restarts_dt_measurement() {
    let scheduler = spawn();
    let probe = ProbeTask::builder("dt").logic().running().build();
    scheduler.register_task(probe.clone()).unwrap();
    thread::sleep(Duration::from_millis(200));
    scheduler.resume();
    scheduler.drive_frame(&mut (), 16.0);
    scheduler.drive_frame(&mut (), 16.0);
    let dt = probe.last_logic_dt().unwrap();
    assert!(dt < 150.0, "dt={dt}");
}

#[test]
fn resume_restarts_dt_measurement_when_free_running() {
    let scheduler = Scheduler::<()>::spawn(SchedulerConfig {
        lock_step: false,
        idle_sleep_ms: 400,
        ..SchedulerConfig::default()
    })
    .unwrap();
    let first_step: Arc<OnceLock<(f64, Instant)>> = Arc::new(OnceLock::new());
    let probe = ProbeTask::builder("dt")
        .logic()
        .running()
        .on_logic({
            let first_step = Arc::clone(&first_step);
            move |p| {
                let _ = first_step.set((p.last_logic_dt().unwrap_or_default(), Instant::now()));
            }
        })
        .build();
    scheduler.register_task(probe).unwrap();
    thread::sleep(Duration::from_millis(150));

    let resumed = Instant::now();
    scheduler.resume();
    assert!(wait_until(Duration::from_secs(2), || first_step.get().is_some()));
    let (dt, stepped_at) = *first_step.get().unwrap();
    let since_resume = stepped_at.duration_since(resumed);

    // Resume wakes the idle worker instead of leaving it parked for the quantum.
    assert!(since_resume < Duration::from_millis(200), "{since_resume:?}");
    // The paused interval is not charged to the first step.
    assert!(
        dt <= since_resume.as_secs_f64() * 1000.0 + 1.0,
        "dt={dt} since_resume={since_resume:?}"
    );
    scheduler.close(true).unwrap();
}

#[test]
fn clear_removes_everything() {
    let scheduler = spawn();
    let logic = ProbeTask::builder("l").logic().running().build();
    let render = ProbeTask::builder("r").render().running().build();
    let sensor = ProbeTask::builder("s").dedicated(100.0).running().build();
    scheduler.register_task(logic.clone()).unwrap();
    scheduler.register_task(render.clone()).unwrap();
    scheduler.register_task(sensor.clone()).unwrap();
    assert_eq!(scheduler.dedicated_task_count(), 1);

    scheduler.clear();
    assert_eq!(scheduler.render_task_count(), 0);
    assert_eq!(scheduler.dedicated_task_count(), 0);
    scheduler.resume();
    for _ in 0..3 {
        scheduler.drive_frame(&mut (), 16.0);
    }
    assert_eq!(logic.logic_calls(), 0);
    assert_eq!(render.render_calls(), 0);
    assert_eq!(scheduler.logic_task_count(), 0);
    assert_eq!(sensor.logic_calls(), 0);
}

#[test]
fn dedicated_tasks_step_on_their_own_thread_while_resumed() {
    let scheduler = spawn();
    let sensor = ProbeTask::builder("sensor").dedicated(200.0).running().build();
    scheduler.register_task(sensor.clone()).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(sensor.logic_calls(), 0, "stepped while paused");

    scheduler.resume();
    assert!(wait_until(Duration::from_secs(2), || sensor.logic_calls() >= 3));
    assert_ne!(sensor.logic_thread(), Some(thread::current().id()));
    assert_eq!(scheduler.logic_task_count(), 0);
    assert_eq!(scheduler.step_count(), 0, "joined the lock-step pass");

    scheduler.unregister_task(&*sensor, true);
    let calls = sensor.logic_calls();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(sensor.logic_calls(), calls);
    assert_eq!(scheduler.dedicated_task_count(), 0);
}

#[test]
fn close_releases_the_render_thread() {
    let scheduler = spawn();
    let probe = ProbeTask::builder("r").render().running().build();
    scheduler.register_task(probe.clone()).unwrap();
    scheduler.resume();
    scheduler.drive_frame(&mut (), 16.0);
    scheduler.close(true).unwrap();
    assert!(scheduler.is_closed());

    let frames = scheduler.frame_count();
    scheduler.drive_frame(&mut (), 16.0);
    assert_eq!(scheduler.frame_count(), frames);
    assert_eq!(probe.render_calls(), 1);
    scheduler.close(true).unwrap();
}

#[test]
fn worker_panic_is_reported_by_close() {
    let scheduler = spawn();
    let bomb = ProbeTask::builder("bomb")
        .logic()
        .running()
        .on_logic(|_| panic!("boom"))
        .build();
    scheduler.register_task(bomb).unwrap();
    scheduler.resume();
    assert!(wait_until(Duration::from_secs(2), || {
        scheduler.drive_frame(&mut (), 16.0);
        scheduler.is_closed()
    }));
    match scheduler.close(true) {
        Err(SchedulerError::WorkerPanicked(msg)) => assert!(msg.contains("boom")),
        other => panic!("expected WorkerPanicked, got {other:?}"),
    }
}

#[test]
fn global_scheduler_is_a_singleton() {
    let a = <Scheduler>::global().unwrap();
    let b = <Scheduler>::global().unwrap();
    assert!(std::ptr::eq(a, b));
    assert!(a.is_paused());

    a.close(true).unwrap();
    assert!(a.is_closed());
    let c = <Scheduler>::global().unwrap();
    assert!(std::ptr::eq(a, c));
    assert!(c.is_closed());
}
