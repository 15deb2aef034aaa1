// Ordering, repetition and cancellation behaviour of a live timer

use chrono::{TimeDelta, Utc};
use crossbeam_channel::{unbounded, Receiver};
use ouroboros_timer::{
    RepeatMode, TaskContext, TaskState, Timer, TimerConfig, TimerTask,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn collect<T>(rx: &Receiver<T>, n: usize) -> Vec<T> {
    (0..n)
        .map(|i| {
            rx.recv_timeout(RECV_TIMEOUT)
                .unwrap_or_else(|_| panic!("timed out waiting for event {}", i))
        })
        .collect()
}

#[test]
fn test_earlier_deadline_fires_first() {
    init_tracing();
    let timer = Arc::new(Timer::new().unwrap());
    let (tx, rx) = unbounded();

    let submitted_a = Instant::now();
    let tx_a = tx.clone();
    timer
        .schedule(
            &TimerTask::from_fn(move |ctx| tx_a.send(("a", ctx.clone())).unwrap()),
            TimeDelta::milliseconds(50),
        )
        .unwrap();

    let producer = {
        let timer = Arc::clone(&timer);
        thread::spawn(move || {
            timer
                .schedule(
                    &TimerTask::from_fn(move |ctx| tx.send(("b", ctx.clone())).unwrap()),
                    TimeDelta::milliseconds(10),
                )
                .unwrap();
            Instant::now()
        })
    };
    let submitted_b = producer.join().unwrap();

    let fired = collect(&rx, 2);
    assert_eq!(fired[0].0, "b");
    assert_eq!(fired[1].0, "a");

    let (b, a) = (&fired[0].1, &fired[1].1);
    assert!(b.fired_at >= b.scheduled_at);
    assert!(a.fired_at >= a.scheduled_at);
    assert!(a.fired_at >= b.fired_at);
    assert!(a.scheduled_at >= submitted_a + Duration::from_millis(50));
    // Deadlines are 40ms apart, less the time between the two submissions
    let submission_gap = submitted_b.duration_since(submitted_a);
    assert!(
        a.scheduled_at.duration_since(b.scheduled_at) + submission_gap >= Duration::from_millis(40)
    );

    timer.cancel_all();
}

#[test]
fn test_concurrent_producers_fire_in_deadline_order() {
    init_tracing();
    let timer = Arc::new(Timer::new().unwrap());
    let (tx, rx) = unbounded();
    let producers = 8;
    let per_producer = 10;
    let barrier = Arc::new(Barrier::new(producers));

    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let timer = Arc::clone(&timer);
            let barrier = Arc::clone(&barrier);
            let tx = tx.clone();
            thread::spawn(move || {
                barrier.wait();
                for i in 0..per_producer {
                    let tx = tx.clone();
                    let delay = 20 + ((i * producers + p) * 7 % 61) as i64;
                    timer
                        .schedule(
                            &TimerTask::from_fn(move |ctx| tx.send(ctx.scheduled_at).unwrap()),
                            TimeDelta::milliseconds(delay),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let deadlines = collect(&rx, producers * per_producer);
    assert!(
        deadlines.windows(2).all(|w| w[0] <= w[1]),
        "tasks fired out of deadline order"
    );
    timer.cancel_all();
}

#[test]
fn test_absolute_time_scheduling() {
    init_tracing();
    let timer = Timer::new().unwrap();
    let (tx, rx) = unbounded();

    let start = Instant::now();
    let tx_future = tx.clone();
    timer
        .schedule_at(
            &TimerTask::from_fn(move |_| tx_future.send("future").unwrap()),
            Utc::now() + TimeDelta::milliseconds(40),
        )
        .unwrap();
    timer
        .schedule_at(
            &TimerTask::from_fn(move |_| tx.send("past").unwrap()),
            Utc::now() - TimeDelta::seconds(10),
        )
        .unwrap();

    assert_eq!(collect(&rx, 2), vec!["past", "future"]);
    assert!(start.elapsed() >= Duration::from_millis(30));
    timer.cancel_all();
}

#[test]
fn test_fixed_rate_catches_up() {
    init_tracing();
    let timer = Timer::new().unwrap();
    let (tx, rx) = unbounded::<TaskContext>();
    let period = Duration::from_millis(10);

    let task = TimerTask::from_fn(move |ctx| {
        let _ = tx.send(ctx.clone());
        thread::sleep(Duration::from_millis(25));
    });
    timer
        .schedule_at_fixed_rate(&task, TimeDelta::zero(), TimeDelta::milliseconds(10))
        .unwrap();

    let runs = collect(&rx, 4);
    task.cancel();

    for pair in runs.windows(2) {
        // Deadlines advance by exactly one period regardless of run time
        assert_eq!(pair[1].scheduled_at, pair[0].scheduled_at + period);
    }
    // Each run takes 25ms against a 10ms period, so it falls 15ms further behind
    assert!(runs[3].lateness() >= Duration::from_millis(45));
    assert_eq!(runs.iter().map(|c| c.execution).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    timer.cancel_all();
}

#[test]
fn test_fixed_delay_never_catches_up() {
    init_tracing();
    let timer = Timer::new().unwrap();
    let (tx, rx) = unbounded::<TaskContext>();
    let period = Duration::from_millis(10);

    let task = TimerTask::from_fn(move |ctx| {
        let _ = tx.send(ctx.clone());
        thread::sleep(Duration::from_millis(25));
    });
    timer
        .schedule_with_fixed_delay(&task, TimeDelta::zero(), TimeDelta::milliseconds(10))
        .unwrap();

    let runs = collect(&rx, 4);
    task.cancel();

    for pair in runs.windows(2) {
        // Next deadline is measured from when the previous run fired
        assert_eq!(pair[1].scheduled_at, pair[0].fired_at + period);
        // and a run never starts before the previous one finished
        assert!(pair[1].fired_at.duration_since(pair[0].fired_at) >= Duration::from_millis(25));
    }
    timer.cancel_all();
}

#[test]
fn test_submit_repeating_modes() {
    init_tracing();
    let timer = Timer::new().unwrap();
    let count = Arc::new(AtomicU64::new(0));

    let counter = Arc::clone(&count);
    let task = timer
        .submit_repeating(
            move |_: &TaskContext| -> anyhow::Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            TimeDelta::zero(),
            TimeDelta::milliseconds(5),
            RepeatMode::FixedDelay,
        )
        .unwrap();

    let deadline = Instant::now() + RECV_TIMEOUT;
    while count.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }
    assert!(timer.cancel(&task));
    assert!(!timer.cancel(&task));
    assert_eq!(task.state(), TaskState::Cancelled);

    // At most one run can already be past its cancellation check
    thread::sleep(Duration::from_millis(20));
    let settled = count.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(count.load(Ordering::SeqCst), settled);
    assert!(task.executions() >= 3);
    timer.cancel_all();
}

#[test]
fn test_cancelled_tasks_never_run() {
    init_tracing();
    let timer = Timer::new().unwrap();
    let (done_tx, done_rx) = unbounded();

    let mut tasks = Vec::new();
    for i in 0..200 {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let task = TimerTask::from_fn(move |_| flag.store(true, Ordering::SeqCst));
        // Deadlines cluster around "now" so cancellation races the timer thread
        timer
            .schedule(&task, TimeDelta::microseconds((i % 4) * 250))
            .unwrap();
        tasks.push((task, ran));
    }

    let outcomes: Vec<bool> = tasks
        .iter()
        .enumerate()
        .map(|(i, (task, _))| i % 2 == 0 && task.cancel())
        .collect();

    // A sentinel scheduled last fires after everything above
    timer
        .schedule(
            &TimerTask::from_fn(move |_| done_tx.send(()).unwrap()),
            TimeDelta::milliseconds(20),
        )
        .unwrap();
    done_rx.recv_timeout(RECV_TIMEOUT).unwrap();

    for ((task, ran), cancelled) in tasks.iter().zip(outcomes) {
        if cancelled {
            assert!(!ran.load(Ordering::SeqCst), "cancelled task {} ran", task.id());
            assert_eq!(task.state(), TaskState::Cancelled);
        } else {
            assert!(ran.load(Ordering::SeqCst));
            assert_eq!(task.state(), TaskState::Executed);
        }
    }
    timer.cancel_all();
}

#[test]
fn test_cancel_head_before_it_fires() {
    init_tracing();
    let timer = Timer::new().unwrap();
    let (tx, rx) = unbounded();

    let tx_head = tx.clone();
    let head = TimerTask::from_fn(move |_| tx_head.send("head").unwrap());
    timer.schedule(&head, TimeDelta::milliseconds(30)).unwrap();
    timer
        .schedule(
            &TimerTask::from_fn(move |_| tx.send("tail").unwrap()),
            TimeDelta::milliseconds(60),
        )
        .unwrap();

    assert!(head.cancel());
    assert_eq!(collect(&rx, 1), vec!["tail"]);
    assert!(rx.try_recv().is_err());
    timer.cancel_all();
}

#[test]
fn test_purge_leaves_live_tasks() {
    init_tracing();
    let timer = Timer::with_config(TimerConfig::default().with_name("purge-timer")).unwrap();
    assert_eq!(timer.name(), "purge-timer");
    let (tx, rx) = unbounded();

    let tasks: Vec<TimerTask> = (0..5)
        .map(|i| {
            let tx = tx.clone();
            TimerTask::from_fn(move |_| tx.send(i).unwrap())
        })
        .collect();
    for (i, task) in tasks.iter().enumerate() {
        timer
            .schedule(task, TimeDelta::milliseconds(40 + 10 * i as i64))
            .unwrap();
    }
    tasks[1].cancel();
    tasks[3].cancel();

    assert_eq!(timer.purge(), 2);
    assert_eq!(timer.queued(), 3);
    assert_eq!(collect(&rx, 3), vec![0, 2, 4]);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    timer.cancel_all();
}
