use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::*;

/// Factory that records its calls and never settles on its own.
struct Recorder {
    started: Arc<Mutex<Vec<(u32, u64)>>>,
    killed: Arc<AtomicUsize>,
}

impl Recorder {
    fn new() -> Self {
        Self {
            started: Arc::default(),
            killed: Arc::default(),
        }
    }

    fn hanging(&self, spec: JobSpec) -> Scheduler<u32, u32> {
        let started = Arc::clone(&self.started);
        let killed = Arc::clone(&self.killed);
        Scheduler::new(spec, move |args: u32, ticket: JobTicket| {
            started.lock().push((args, ticket.generation()));
            let killed = Arc::clone(&killed);
            Abortable::new(move |_settle| {
                move || {
                    killed.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
    }

    fn echoing(&self, spec: JobSpec, delay: Duration) -> Scheduler<u32, u32> {
        let started = Arc::clone(&self.started);
        Scheduler::new(spec, move |args: u32, ticket: JobTicket| {
            started.lock().push((args, ticket.generation()));
            Abortable::spawn(async move {
                tokio::time::sleep(delay).await;
                Ok(args * 10)
            })
        })
    }

    fn calls(&self) -> Vec<u32> {
        self.started.lock().iter().map(|(args, _)| *args).collect()
    }
}

fn spec(debounce_ms: u64) -> JobSpec {
    JobSpec::new(JobClass::Render, Duration::from_millis(debounce_ms))
}

#[tokio::test(start_paused = true)]
async fn test_debounce_coalesces_to_last_request() {
    let recorder = Recorder::new();
    let scheduler = recorder.echoing(spec(300), Duration::from_millis(50));

    let first = scheduler.schedule(1, false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = scheduler.schedule(2, false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let third = scheduler.schedule(3, false);

    assert_eq!(third.await.unwrap(), 30);
    assert!(first.await.unwrap_err().is_cancelled());
    assert!(second.await.unwrap_err().is_cancelled());
    assert_eq!(recorder.calls(), vec![3]);
}

#[tokio::test(start_paused = true)]
async fn test_nothing_starts_before_debounce_elapses() {
    let recorder = Recorder::new();
    let scheduler = recorder.hanging(spec(1000));

    let _op = scheduler.schedule(1, false);
    tokio::time::sleep(Duration::from_millis(999)).await;
    assert!(recorder.calls().is_empty());
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(recorder.calls(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_new_request_kills_running_execution_once() {
    let recorder = Recorder::new();
    let scheduler = recorder.hanging(spec(10));

    let first = scheduler.schedule(1, false);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(recorder.calls(), vec![1]);

    let second = scheduler.schedule(2, true);
    assert_eq!(recorder.killed.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.calls(), vec![1, 2]);
    assert!(first.await.unwrap_err().is_cancelled());

    scheduler.cancel();
    assert_eq!(recorder.killed.load(Ordering::SeqCst), 2);
    assert!(second.await.unwrap_err().is_cancelled());
    assert!(scheduler.is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_immediate_skips_pending_timer() {
    let recorder = Recorder::new();
    let scheduler = recorder.echoing(spec(1000), Duration::ZERO);

    let pending = scheduler.schedule(1, false);
    let now = scheduler.schedule(2, true);
    // Factory ran synchronously
    assert_eq!(recorder.calls(), vec![2]);

    assert_eq!(now.await.unwrap(), 20);
    assert!(pending.await.unwrap_err().is_cancelled());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(recorder.calls(), vec![2]);
}

#[tokio::test(start_paused = true)]
async fn test_killing_returned_operation_cancels_timer() {
    let recorder = Recorder::new();
    let scheduler = recorder.hanging(spec(100));

    let op = scheduler.schedule(1, false);
    op.kill();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(recorder.calls().is_empty());
    assert!(op.await.unwrap_err().is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_ticket_goes_stale_on_new_request() {
    let tickets: Arc<Mutex<Vec<JobTicket>>> = Arc::default();
    let seen = Arc::clone(&tickets);
    let scheduler = Scheduler::new(spec(0), move |_: (), ticket: JobTicket| {
        seen.lock().push(ticket);
        Abortable::<()>::new(|_settle| || {})
    });

    let _a = scheduler.schedule((), true);
    let first = tickets.lock()[0].clone();
    assert!(first.is_current());
    assert_eq!(first.class(), JobClass::Render);

    let _b = scheduler.schedule((), true);
    assert!(!first.is_current());
    assert!(tickets.lock()[1].is_current());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_kills_execution() {
    let recorder = Recorder::new();
    let limit = Duration::from_secs(2);
    let scheduler = recorder.hanging(spec(0).with_timeout(Some(limit)));

    let op = scheduler.schedule(1, true);
    let err = op.await.unwrap_err();
    assert!(matches!(err, Error::Timeout(d) if d == limit));
    assert_eq!(recorder.killed.load(Ordering::SeqCst), 1);
    assert!(scheduler.is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_independent_classes_do_not_preempt() {
    let recorder = Recorder::new();
    let check = recorder.echoing(JobSpec::new(JobClass::SyntaxCheck, Duration::from_millis(300)), Duration::ZERO);
    let render = recorder.echoing(spec(1000), Duration::ZERO);

    let c = check.schedule(1, false);
    let r = render.schedule(2, false);
    assert_eq!(c.await.unwrap(), 10);
    assert_eq!(r.await.unwrap(), 20);
    assert_eq!(recorder.calls(), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_settled_request_leaves_scheduler_idle() {
    let recorder = Recorder::new();
    let scheduler = recorder.echoing(spec(5), Duration::from_millis(5));
    assert!(scheduler.is_idle());
    let op = scheduler.schedule(4, false);
    assert!(!scheduler.is_idle());
    assert_eq!(op.await.unwrap(), 40);
    assert!(scheduler.is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_kill_during_start_stops_the_execution() {
    let killed = Arc::new(AtomicUsize::new(0));
    let caller: Arc<Mutex<Option<KillHandle>>> = Arc::default();
    let scheduler: Scheduler<u32, u32> = {
        let killed = Arc::clone(&killed);
        let caller = Arc::clone(&caller);
        Scheduler::new(spec(100), move |_: u32, _ticket: JobTicket| {
            // The caller's kill lands after the timer fired, before the start is recorded
            if let Some(op) = caller.lock().take() {
                op.kill();
            }
            let killed = Arc::clone(&killed);
            Abortable::new(move |_settle| {
                move || {
                    killed.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
    };

    let op = scheduler.schedule(1, false);
    *caller.lock() = Some(op.kill_handle());
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(op.await.unwrap_err().is_cancelled());
    assert_eq!(killed.load(Ordering::SeqCst), 1);
    assert!(scheduler.is_idle());
}
