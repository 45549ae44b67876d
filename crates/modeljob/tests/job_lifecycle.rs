//! Integration tests for rejection, expiration, delays, cancellation and shutdown

mod common;

use common::{
    create_rejecting_scheduler, create_scheduler, init_logging, test_config, wait_until, Latch,
    Trace, TIMEOUT,
};
use modeljob::{filter, JobError, JobInput, JobState, MutualExclusionScheduler, OwnerId};
use std::time::{Duration, Instant};

#[test]
fn test_rejected_queued_job_does_not_stall_owner() {
    let (scheduler, executor) = create_rejecting_scheduler(&[2]);
    let owner = OwnerId::new();
    let release = Latch::new(1);
    let trace = Trace::new();

    let (t, r) = (trace.clone(), release.clone());
    let job1 = scheduler.schedule(owner, move |_| {
        r.wait(TIMEOUT);
        t.push("1");
        Ok(())
    });
    let t = trace.clone();
    let job2 = scheduler.schedule(owner, move |_| {
        t.push("2");
        Ok(())
    });
    let t = trace.clone();
    let job3 = scheduler.schedule(owner, move |_| {
        t.push("3");
        Ok(())
    });

    release.count_down();
    assert!(scheduler.wait_until_done(&filter::owned_by(owner), TIMEOUT));

    assert_eq!(trace.events(), vec!["1", "3"]);
    assert_eq!(job1.get(TIMEOUT), Ok(()));
    assert!(matches!(job2.get(TIMEOUT), Err(JobError::Rejected(_))));
    assert!(job2.is_cancelled());
    assert_eq!(job3.get(TIMEOUT), Ok(()));
    assert_eq!(executor.submissions(), 3);
    assert_eq!(scheduler.stats().jobs_rejected, 1);
}

#[test]
fn test_rejected_on_schedule_releases_mutex() {
    let (scheduler, _executor) = create_rejecting_scheduler(&[1]);
    let owner = OwnerId::new();

    let rejected = scheduler.schedule(owner, |_| Ok(1));
    assert!(matches!(rejected.get(TIMEOUT), Err(JobError::Rejected(_))));
    assert_eq!(scheduler.permit_count(owner), 0);

    let accepted = scheduler.schedule(owner, |_| Ok(2));
    assert_eq!(accepted.get(TIMEOUT), Ok(2));
}

#[test]
fn test_consecutive_rejections_are_skipped() {
    let (scheduler, _executor) = create_rejecting_scheduler(&[2, 3]);
    let owner = OwnerId::new();
    let release = Latch::new(1);

    let r = release.clone();
    scheduler.schedule(owner, move |_| {
        r.wait(TIMEOUT);
        Ok(())
    });
    let futures: Vec<_> = (2..=4).map(|i| scheduler.schedule(owner, move |_| Ok(i))).collect();

    release.count_down();
    assert!(scheduler.wait_until_done(&filter::owned_by(owner), TIMEOUT));

    assert!(futures[0].is_cancelled());
    assert!(futures[1].is_cancelled());
    assert_eq!(futures[2].get(TIMEOUT), Ok(4));
}

#[test]
fn test_reacquiring_job_is_not_resubmitted() {
    // Submissions: job 1, job 2 (when job 1 blocks), job 3 (rejected).
    let (scheduler, executor) = create_rejecting_scheduler(&[3]);
    let owner = OwnerId::new();
    let condition = scheduler.create_blocking_condition("bc", true);

    let c = condition.clone();
    let job1 = scheduler.schedule(owner, move |ctx| {
        c.wait_for(ctx)?;
        Ok("job1")
    });

    let (c, job1_handle) = (condition.clone(), job1.handle().clone());
    let job2 = scheduler.schedule(owner, move |ctx| {
        c.set_blocking(false);
        let scheduler = ctx.scheduler();
        assert!(wait_until(|| !scheduler.is_blocked(&job1_handle), TIMEOUT));
        Ok("job2")
    });

    let job3 = scheduler.schedule(owner, |_| Ok("job3"));

    assert!(scheduler.wait_until_done(&filter::owned_by(owner), TIMEOUT));
    assert_eq!(job1.get(TIMEOUT), Ok("job1"));
    assert_eq!(job2.get(TIMEOUT), Ok("job2"));
    assert!(matches!(job3.get(TIMEOUT), Err(JobError::Rejected(_))));
    assert_eq!(executor.submissions(), 3);
}

#[test]
fn test_expired_job_is_discarded() {
    let scheduler = create_scheduler();
    let owner = OwnerId::new();
    let trace = Trace::new();

    let t = trace.clone();
    scheduler.schedule(owner, move |ctx| {
        ctx.sleep(Duration::from_millis(100))?;
        t.push("slow");
        Ok(())
    });

    let t = trace.clone();
    let expiring = scheduler.schedule(
        JobInput::new(owner)
            .with_name("expiring")
            .expire_after(Duration::from_millis(10)),
        move |_| {
            t.push("expiring");
            Ok(())
        },
    );

    let t = trace.clone();
    let patient = scheduler.schedule(owner, move |_| {
        t.push("patient");
        Ok(())
    });

    assert!(matches!(expiring.get(TIMEOUT), Err(JobError::Cancelled(_))));
    assert_eq!(patient.get(TIMEOUT), Ok(()));
    assert_eq!(trace.events(), vec!["slow", "patient"]);
}

#[test]
fn test_default_expiration_from_config() {
    init_logging();
    let mut config = test_config();
    config.default_expiration_ms = Some(10);
    let scheduler = MutualExclusionScheduler::new(config);
    let owner = OwnerId::new();

    scheduler.schedule(
        JobInput::new(owner).expire_after(Duration::from_secs(60)),
        |ctx| ctx.sleep(Duration::from_millis(100)),
    );
    let expiring = scheduler.schedule(owner, |_| Ok(()));
    let exempt = scheduler.schedule(
        JobInput::new(owner).expire_after(Duration::from_secs(60)),
        |_| Ok(()),
    );

    assert!(matches!(expiring.get(TIMEOUT), Err(JobError::Cancelled(_))));
    assert_eq!(exempt.get(TIMEOUT), Ok(()));
}

#[test]
fn test_blocked_job_is_exempt_from_expiration() {
    let scheduler = create_scheduler();
    let owner = OwnerId::new();
    let condition = scheduler.create_blocking_condition("bc", true);

    let c = condition.clone();
    let future = scheduler.schedule(
        JobInput::new(owner).expire_after(Duration::from_millis(50)),
        move |ctx| {
            c.wait_for(ctx)?;
            Ok("done")
        },
    );

    assert!(wait_until(|| scheduler.is_blocked(future.handle()), TIMEOUT));
    std::thread::sleep(Duration::from_millis(100));
    condition.set_blocking(false);

    assert_eq!(future.get(TIMEOUT), Ok("done"));
}

#[test]
fn test_delayed_job_runs_after_delay() {
    let scheduler = create_scheduler();
    let owner = OwnerId::new();
    let start = Instant::now();

    let future = scheduler.schedule_delayed(owner, Duration::from_millis(50), move |_| Ok(start.elapsed()));

    assert!(!scheduler.is_done(&filter::owned_by(owner)));
    assert_eq!(scheduler.stats().delayed_jobs, 1);

    let elapsed = future.get(TIMEOUT).unwrap();
    assert!(elapsed >= Duration::from_millis(50));
    assert!(scheduler.wait_until_done(&filter::owned_by(owner), TIMEOUT));
    assert_eq!(scheduler.stats().delayed_jobs, 0);
}

#[test]
fn test_cancelled_delayed_job_never_runs() {
    let scheduler = create_scheduler();
    let owner = OwnerId::new();
    let trace = Trace::new();

    let t = trace.clone();
    let future = scheduler.schedule_delayed(owner, Duration::from_millis(30), move |_| {
        t.push("ran");
        Ok(())
    });

    assert!(future.cancel(false));
    assert!(scheduler.is_done(&filter::owned_by(owner)));

    std::thread::sleep(Duration::from_millis(60));
    assert!(trace.events().is_empty());
    assert_eq!(future.state(), JobState::Cancelled);
}

#[test]
fn test_cancel_by_filter() {
    let scheduler = create_scheduler();
    let owner = OwnerId::new();
    let other = OwnerId::new();
    let started = Latch::new(1);
    let trace = Trace::new();

    let (t, s) = (trace.clone(), started.clone());
    let running = scheduler.schedule(owner, move |ctx| {
        s.count_down();
        let outcome = ctx.sleep(Duration::from_secs(60));
        t.push("running:woken");
        outcome
    });
    let queued: Vec<_> = (0..3)
        .map(|i| {
            let t = trace.clone();
            scheduler.schedule(owner, move |_| {
                t.push(format!("queued:{}", i));
                Ok(())
            })
        })
        .collect();
    let untouched = scheduler.schedule(other, |_| Ok(()));

    assert!(started.wait(TIMEOUT));
    assert!(!scheduler.cancel(&filter::named("no-such-job"), true));
    assert!(scheduler.cancel(&filter::owned_by(owner), true));

    assert!(scheduler.wait_until_done(&filter::owned_by(owner), TIMEOUT));
    assert_eq!(trace.events(), vec!["running:woken"]);
    assert!(running.is_cancelled());
    assert!(queued.iter().all(|f| f.is_cancelled()));
    assert_eq!(untouched.get(TIMEOUT), Ok(()));
}

#[test]
fn test_cancel_running_without_interrupt_lets_it_finish() {
    let scheduler = create_scheduler();
    let owner = OwnerId::new();
    let started = Latch::new(1);
    let release = Latch::new(1);

    let (s, r) = (started.clone(), release.clone());
    let future = scheduler.schedule(owner, move |ctx| {
        s.count_down();
        r.wait(TIMEOUT);
        Ok(ctx.is_interrupted())
    });

    assert!(started.wait(TIMEOUT));
    assert!(future.cancel(false));
    assert!(!future.cancel(false));
    // Still the mutex owner until the body returns.
    assert_eq!(scheduler.mutex_owner(owner), Some(future.handle().clone()));

    release.count_down();
    assert!(scheduler.wait_for_idle(owner, TIMEOUT));
    assert!(matches!(future.get(TIMEOUT), Err(JobError::Cancelled(_))));
}

#[test]
fn test_shutdown_cancels_everything() {
    let scheduler = create_scheduler();
    let owner = OwnerId::new();
    let started = Latch::new(1);

    let s = started.clone();
    let running = scheduler.schedule(owner, move |ctx| {
        s.count_down();
        ctx.sleep(Duration::from_secs(60))
    });
    let queued = scheduler.schedule(owner, |_| Ok(()));
    let delayed = scheduler.schedule_delayed(OwnerId::new(), Duration::from_secs(60), |_| Ok(()));

    assert!(started.wait(TIMEOUT));
    scheduler.shutdown();
    scheduler.shutdown();

    assert!(matches!(running.get(TIMEOUT), Err(JobError::Cancelled(_))));
    assert!(matches!(queued.get(TIMEOUT), Err(JobError::Cancelled(_))));
    assert!(matches!(delayed.get(TIMEOUT), Err(JobError::Cancelled(_))));

    let late = scheduler.schedule(owner, |_| Ok(()));
    assert!(matches!(late.get(TIMEOUT), Err(JobError::Rejected(_))));
    assert!(scheduler.wait_until_done(&filter::always(), TIMEOUT));
}

#[test]
fn test_shutdown_keeps_running_job_as_owner() {
    let scheduler = create_scheduler();
    let owner = OwnerId::new();
    let started = Latch::new(1);
    let release = Latch::new(1);

    let (s, r) = (started.clone(), release.clone());
    let future = scheduler.schedule(owner, move |_| {
        s.count_down();
        // Never looks at the interruption flag.
        r.wait(TIMEOUT);
        Ok(())
    });
    let queued = scheduler.schedule(owner, |_| Ok(()));

    assert!(started.wait(TIMEOUT));
    scheduler.shutdown();

    assert!(future.is_cancelled());
    assert!(queued.is_cancelled());
    assert!(!scheduler.is_done(&filter::owned_by(owner)));
    assert_eq!(scheduler.mutex_owner(owner), Some(future.handle().clone()));
    assert_eq!(scheduler.permit_count(owner), 1);
    assert!(!scheduler.wait_for_idle(owner, Duration::from_millis(20)));

    release.count_down();
    assert!(scheduler.wait_until_done(&filter::owned_by(owner), TIMEOUT));
    assert!(scheduler.wait_for_idle(owner, TIMEOUT));
    assert_eq!(scheduler.mutex_owner(owner), None);
}
