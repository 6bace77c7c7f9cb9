use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

use dog_delayq::observability::metrics;
use dog_delayq::{handler_fn, HandlerError, Item, LiveCounters, MemoryTopicQueue, QueueConfig, QueueError, TopicQueue};

fn create_queue(config: QueueConfig) -> MemoryTopicQueue {
    MemoryTopicQueue::new(CancellationToken::new(), "jobs", Arc::new(config))
}

/// Start a queue that reports the instant each item reaches the handler
async fn timed_queue(config: QueueConfig) -> (MemoryTopicQueue, mpsc::UnboundedReceiver<Instant>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let queue = create_queue(config);
    queue
        .start(Arc::new(handler_fn(move |_item: Item| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(Instant::now());
                Ok(())
            }
        })))
        .await
        .unwrap();
    (queue, rx)
}

/// N items with distinct delays produce exactly N handler calls
#[tokio::test(start_paused = true)]
async fn test_each_item_delivered_once() {
    let seen: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));
    let queue = create_queue(QueueConfig::default());

    let recorder = seen.clone();
    queue
        .start(Arc::new(handler_fn(move |item: Item| {
            let recorder = recorder.clone();
            async move {
                let key = String::from_utf8_lossy(&item.value).into_owned();
                *recorder.lock().entry(key).or_insert(0) += 1;
                Ok(())
            }
        })))
        .await
        .unwrap();

    const N: i64 = 20;
    for delay in 1..=N {
        assert_ok!(queue.push(Item::new("jobs", format!("item-{}", delay), delay)).await);
    }
    assert_eq!(queue.length().await, N);

    tokio::time::sleep(Duration::from_secs(N as u64 + 2)).await;

    let seen = seen.lock();
    assert_eq!(seen.len(), N as usize);
    assert!(seen.values().all(|calls| *calls == 1));
    drop(seen);

    assert_eq!(queue.length().await, 0);
    queue.close().await.unwrap();
}

/// Pushing anywhere inside a tick period never shortens the wait
#[tokio::test(start_paused = true)]
async fn test_push_between_ticks_waits_full_delay() {
    for (offset_ms, delay) in [(100u64, 1i64), (500, 1), (900, 1), (999, 1), (900, 3), (0, 2)] {
        let (queue, mut fired) = timed_queue(QueueConfig::default()).await;

        tokio::time::sleep(Duration::from_secs(2) + Duration::from_millis(offset_ms)).await;
        let pushed = Instant::now();
        queue.push(Item::new("jobs", "a", delay)).await.unwrap();

        let at = tokio::time::timeout(Duration::from_secs(delay as u64 + 5), fired.recv())
            .await
            .unwrap()
            .unwrap();
        let waited = at - pushed;
        let wanted = Duration::from_secs(delay as u64);
        assert!(waited >= wanted, "offset {offset_ms}ms delay {delay}s fired after {waited:?}");
        assert!(waited <= wanted + Duration::from_secs(1), "offset {offset_ms}ms delay {delay}s fired after {waited:?}");

        queue.close().await.unwrap();
    }
}

/// Delays stay in seconds whatever the poll interval is
#[tokio::test(start_paused = true)]
async fn test_tick_interval_does_not_scale_delay() {
    let config = QueueConfig::default().with_tick_interval(Duration::from_millis(250));
    let (queue, mut fired) = timed_queue(config).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let pushed = Instant::now();
    queue.push(Item::new("jobs", "a", 4)).await.unwrap();

    let at = tokio::time::timeout(Duration::from_secs(10), fired.recv())
        .await
        .unwrap()
        .unwrap();
    let waited = at - pushed;
    assert!(waited >= Duration::from_secs(4), "fired after {waited:?}");
    assert!(waited <= Duration::from_secs(5), "fired after {waited:?}");

    queue.close().await.unwrap();
}

/// Items do not fire before their delay
#[tokio::test(start_paused = true)]
async fn test_item_waits_for_its_delay() {
    let fired = Arc::new(AtomicUsize::new(0));
    let queue = create_queue(QueueConfig::default());

    let counter = fired.clone();
    queue
        .start(Arc::new(handler_fn(move |_item: Item| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })))
        .await
        .unwrap();
    // Let the immediate first tick pass
    tokio::time::sleep(Duration::from_millis(100)).await;

    queue.push(Item::new("jobs", "a", 10)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(queue.length().await, 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    queue.close().await.unwrap();
}

/// An always-failing handler runs retry_times + 1 times, then the dead letter fires once
#[tokio::test(start_paused = true)]
async fn test_dead_letter_fires_exactly_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let dead = Arc::new(AtomicUsize::new(0));
    let counters = Arc::new(LiveCounters::new());

    let dead_counter = dead.clone();
    let config = QueueConfig::default()
        .with_retry_times(3)
        .with_monitor(counters.clone())
        .with_on_dead_letter(move |_item: &Item| {
            dead_counter.fetch_add(1, Ordering::SeqCst);
        });
    let queue = create_queue(config);

    let call_counter = calls.clone();
    queue
        .start(Arc::new(handler_fn(move |_item: Item| {
            let call_counter = call_counter.clone();
            async move {
                call_counter.fetch_add(1, Ordering::SeqCst);
                Err(HandlerError::new("always fails"))
            }
        })))
        .await
        .unwrap();

    queue.push(Item::new("jobs", "doomed", 2)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(dead.load(Ordering::SeqCst), 1);
    assert_eq!(counters.get(metrics::HANDLE_ERROR, "jobs"), 4);
    assert_eq!(counters.get(metrics::DEAD_LETTER, "jobs"), 1);
    assert_eq!(queue.length().await, 0);

    queue.close().await.unwrap();
}

/// A panicking handler is treated like a failure
#[tokio::test(start_paused = true)]
async fn test_panicking_handler_is_retried() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let queue = create_queue(QueueConfig::default().with_retry_times(1).without_dead_letter());

    queue
        .start(Arc::new(handler_fn(move |item: Item| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(item.delay_second);
                if item.delay_second == 0 {
                    panic!("first attempt blows up");
                }
                Ok(())
            }
        })))
        .await
        .unwrap();

    queue.push(Item::new("jobs", "a", 0)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    let mut attempts = Vec::new();
    while let Ok(delay) = rx.try_recv() {
        attempts.push(delay);
    }
    assert_eq!(attempts, vec![0, -1]);

    queue.close().await.unwrap();
}

#[tokio::test]
async fn test_lifecycle_guards() {
    let queue = create_queue(QueueConfig::default());
    let handler = Arc::new(handler_fn(|_item: Item| async { Ok(()) }));

    assert_eq!(queue.close().await, Err(QueueError::AlreadyClosed));
    assert_ok!(queue.start(handler.clone()).await);
    assert_eq!(queue.start(handler.clone()).await, Err(QueueError::AlreadyStarted));

    assert_ok!(queue.close().await);
    assert_eq!(queue.close().await, Err(QueueError::AlreadyClosed));
    assert_eq!(queue.push(Item::new("jobs", "late", 1)).await, Err(QueueError::QueueClosed));
    assert_eq!(queue.start(handler).await, Err(QueueError::AlreadyClosed));
}

/// Cancelling the shared token stops the queue without a close call
#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_queue() {
    let cancel = CancellationToken::new();
    let queue = MemoryTopicQueue::new(cancel.clone(), "jobs", Arc::new(QueueConfig::default()));
    queue
        .start(Arc::new(handler_fn(|_item: Item| async { Ok(()) })))
        .await
        .unwrap();
    assert!(queue.is_started());

    cancel.cancel();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(!queue.is_started());
    assert_eq!(queue.push(Item::new("jobs", "a", 1)).await, Err(QueueError::QueueClosed));
    assert_eq!(queue.close().await, Err(QueueError::AlreadyClosed));
}
