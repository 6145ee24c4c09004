use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use eventmux::{
    BufferManager, BufferedSource, CollectorError, CollectorManager, Config, Handler, HandlerRef,
    Poller, Process, Source,
};
use tokio_util::sync::CancellationToken;

/// Handler that only remembers the buffer it was given.
struct Slot {
    name: String,
    buffer: Mutex<Option<Arc<BufferManager<u64>>>>,
}

impl Slot {
    fn arc(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            buffer: Mutex::new(None),
        })
    }

    fn buffer(&self) -> Arc<BufferManager<u64>> {
        self.buffer.lock().unwrap().clone().expect("buffer assigned")
    }
}

impl Handler<u64> for Slot {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_buffer(&self, _source: &str, buffer: Arc<BufferManager<u64>>) {
        *self.buffer.lock().unwrap() = Some(buffer);
    }

    fn unset_buffer(&self, _source: &str, _buffer: &Arc<BufferManager<u64>>) {
        *self.buffer.lock().unwrap() = None;
    }
}

/// Reads `n` events on a plain OS thread and sends them back.
fn spawn_reader(slot: Arc<Slot>, n: usize, tx: mpsc::Sender<(String, Vec<u64>)>) {
    thread::spawn(move || {
        let buffer = slot.buffer();
        let token = CancellationToken::new();
        let mut seen = Vec::with_capacity(n);
        while seen.len() < n {
            match buffer.blocking_events(&slot.name, 64, &token) {
                Ok(batch) => seen.extend(batch.into_iter().map(|e| *e)),
                Err(_) => break,
            }
        }
        let _ = tx.send((slot.name.clone(), seen));
    });
}

#[test]
fn every_handler_sees_every_event_in_order() {
    const EVENTS: u64 = 2_000;
    const HANDLERS: usize = 4;

    let collector = CollectorManager::<u64>::builder(Config::default()).build();
    let slots: Vec<Arc<Slot>> = (0..HANDLERS).map(|i| Slot::arc(&format!("h{i}"))).collect();
    for slot in &slots {
        collector
            .bind_handler(HandlerRef::buffered(slot.clone()))
            .unwrap();
        collector.subscribe(&slot.name, &["bus"]).unwrap();
    }

    let source = BufferedSource::<u64>::arc("bus", "memory");
    collector.register_source(source.clone()).unwrap();

    let (tx, rx) = mpsc::channel();
    for slot in &slots {
        spawn_reader(Arc::clone(slot), EVENTS as usize, tx.clone());
    }
    drop(tx);

    let producer = thread::spawn(move || {
        for i in 0..EVENTS {
            assert!(source.publish(i));
        }
    });
    producer.join().unwrap();

    let expected: Vec<u64> = (0..EVENTS).collect();
    for _ in 0..HANDLERS {
        let (name, seen) = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("reader finished");
        assert_eq!(seen, expected, "handler {name}");
    }
}

#[test]
fn concurrent_producers_keep_their_own_order() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 500;

    let collector = CollectorManager::<u64>::builder(Config::default()).build();
    let slot = Slot::arc("reader");
    collector
        .bind_handler(HandlerRef::buffered(slot.clone()))
        .unwrap();
    collector.subscribe("reader", &["bus"]).unwrap();
    let source = BufferedSource::<u64>::arc("bus", "memory");
    collector.register_source(source.clone()).unwrap();

    let (tx, rx) = mpsc::channel();
    spawn_reader(Arc::clone(&slot), (PRODUCERS * PER_PRODUCER) as usize, tx);

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let source = Arc::clone(&source);
            thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    source.publish(p * 1_000_000 + seq);
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    let (_, seen) = rx.recv_timeout(Duration::from_secs(10)).expect("reader finished");
    assert_eq!(seen.len() as u64, PRODUCERS * PER_PRODUCER);
    for p in 0..PRODUCERS {
        let own: Vec<u64> = seen
            .iter()
            .filter(|v| **v / 1_000_000 == p)
            .map(|v| *v % 1_000_000)
            .collect();
        assert_eq!(own, (0..PER_PRODUCER).collect::<Vec<_>>(), "producer {p}");
    }
}

#[derive(Default)]
struct Gather {
    seen: Mutex<Vec<(String, u64)>>,
}

#[async_trait]
impl Process<u64> for Gather {
    async fn process(&self, source: &str, events: Vec<Arc<u64>>) {
        let mut seen = self.seen.lock().unwrap();
        seen.extend(events.into_iter().map(|e| (source.to_string(), *e)));
    }
}

impl Gather {
    async fn wait_for(&self, n: usize) -> Vec<(String, u64)> {
        for _ in 0..400 {
            {
                let seen = self.seen.lock().unwrap();
                if seen.len() >= n {
                    return seen.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {n} events");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn poller_receives_early_and_live_events() {
    let collector = CollectorManager::<u64>::builder(Config::default()).build();

    // published before anyone subscribed
    let early = BufferedSource::<u64>::arc("early", "memory");
    collector.register_source(early.clone()).unwrap();
    for i in 0..3 {
        assert!(early.publish(i));
    }

    let gather = Arc::new(Gather::default());
    let poller = Arc::new(
        Poller::<u64, _>::new(
            "gather",
            ["early", "late"],
            Arc::clone(&gather),
            tokio::runtime::Handle::current(),
        )
        .with_batch(2),
    );
    collector
        .bind_handler(HandlerRef::buffered(poller.clone()))
        .unwrap();
    assert_eq!(poller.active_sources(), vec!["early".to_string()]);

    // registered after the subscription
    let late = BufferedSource::<u64>::arc("late", "memory");
    collector.register_source(late.clone()).unwrap();
    assert_eq!(poller.active_sources().len(), 2);
    late.publish(100);
    early.publish(3);

    let seen = gather.wait_for(5).await;
    let from = |src: &str| -> Vec<u64> {
        seen.iter()
            .filter(|(s, _)| s == src)
            .map(|(_, v)| *v)
            .collect()
    };
    assert_eq!(from("early"), vec![0, 1, 2, 3]);
    assert_eq!(from("late"), vec![100]);

    collector
        .unsubscribe("gather", &["early", "late"])
        .unwrap();
    assert!(poller.active_sources().is_empty());
    assert!(!early.is_publishing());
    assert!(!late.is_publishing());
    assert_eq!(poller.shutdown().await, 0);
}

#[tokio::test]
async fn cancelled_read_consumes_nothing() {
    let collector = CollectorManager::<u64>::builder(Config::default()).build();
    let slot = Slot::arc("reader");
    collector
        .bind_handler(HandlerRef::buffered(slot.clone()))
        .unwrap();
    collector.subscribe("reader", &["bus"]).unwrap();
    let source = BufferedSource::<u64>::arc("bus", "memory");
    collector.register_source(source.clone()).unwrap();

    let buffer = slot.buffer();
    let token = CancellationToken::new();
    let reader = {
        let buffer = Arc::clone(&buffer);
        let token = token.clone();
        tokio::spawn(async move { buffer.next_event("reader", &token).await })
    };
    tokio::task::yield_now().await;
    token.cancel();

    let res = tokio::time::timeout(Duration::from_secs(1), reader)
        .await
        .expect("reader woke up")
        .unwrap();
    assert_eq!(res.unwrap_err(), CollectorError::Cancelled);

    source.publish(42);
    let next = buffer
        .next_event("reader", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(*next, 42);
}

#[tokio::test]
async fn unsubscribe_wakes_suspended_reader() {
    let collector = CollectorManager::<u64>::builder(Config::default()).build();
    let slot = Slot::arc("reader");
    collector
        .bind_handler(HandlerRef::buffered(slot.clone()))
        .unwrap();
    collector.subscribe("reader", &["bus"]).unwrap();
    collector
        .register_source(BufferedSource::<u64>::arc("bus", "memory"))
        .unwrap();

    let buffer = slot.buffer();
    let reader = {
        let buffer = Arc::clone(&buffer);
        tokio::spawn(async move {
            buffer
                .events("reader", 10, &CancellationToken::new())
                .await
        })
    };
    tokio::task::yield_now().await;
    collector.unsubscribe("reader", &["bus"]).unwrap();

    let res = tokio::time::timeout(Duration::from_secs(1), reader)
        .await
        .expect("reader woke up")
        .unwrap();
    assert!(matches!(res, Err(CollectorError::NotAttached { .. })));
    assert!(buffer.is_closed());
}

/// Source recording every buffer hand-over.
struct Tracked {
    inner: BufferedSource<u64>,
    current: Mutex<Option<Arc<BufferManager<u64>>>>,
    sets: AtomicUsize,
    unsets: AtomicUsize,
    mismatched: AtomicUsize,
}

impl Tracked {
    fn arc(name: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: BufferedSource::new(name, "memory"),
            current: Mutex::new(None),
            sets: AtomicUsize::new(0),
            unsets: AtomicUsize::new(0),
            mismatched: AtomicUsize::new(0),
        })
    }
}

impl Source<u64> for Tracked {
    fn source_name(&self) -> &str {
        self.inner.source_name()
    }

    fn location(&self) -> &str {
        self.inner.location()
    }

    fn set_buffer(&self, buffer: Arc<BufferManager<u64>>) {
        self.sets.fetch_add(1, Ordering::SeqCst);
        let mut current = self.current.lock().unwrap();
        if current.is_some() {
            self.mismatched.fetch_add(1, Ordering::SeqCst);
        }
        *current = Some(Arc::clone(&buffer));
        self.inner.set_buffer(buffer);
    }

    fn unset_buffer(&self, buffer: &Arc<BufferManager<u64>>) {
        self.unsets.fetch_add(1, Ordering::SeqCst);
        let mut current = self.current.lock().unwrap();
        match current.take() {
            Some(held) if Arc::ptr_eq(&held, buffer) => {}
            _ => {
                self.mismatched.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.inner.unset_buffer(buffer);
    }
}

/// Asserts each producer's values in `run` are consecutive.
fn assert_gap_free(run: &[u64], producers: u64) {
    for p in 0..producers {
        let own: Vec<u64> = run
            .iter()
            .filter(|v| **v / 1_000_000 == p)
            .map(|v| *v % 1_000_000)
            .collect();
        for pair in own.windows(2) {
            assert_eq!(pair[1], pair[0] + 1, "producer {p} skipped or repeated in {own:?}");
        }
    }
}

#[test]
fn subscription_churn_under_load_keeps_runs_gap_free() {
    const PRODUCERS: u64 = 2;
    const CHURNERS: usize = 3;
    const CYCLES: usize = 20;
    const PER_RUN: usize = 40;

    let collector = CollectorManager::<u64>::builder(Config::default()).build();
    let source = Tracked::arc("bus");
    collector.register_source(source.clone()).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let source = Arc::clone(&source);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut seq = 0;
                while !stop.load(Ordering::SeqCst) {
                    source.inner.publish(p * 1_000_000 + seq);
                    seq += 1;
                    if seq % 64 == 0 {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let (tx, rx) = mpsc::channel();
    for h in 0..CHURNERS {
        let collector = Arc::clone(&collector);
        let tx = tx.clone();
        thread::spawn(move || {
            let slot = Slot::arc(&format!("churn{h}"));
            collector
                .bind_handler(HandlerRef::buffered(slot.clone()))
                .unwrap();
            let token = CancellationToken::new();
            let mut runs = Vec::with_capacity(CYCLES);
            for _ in 0..CYCLES {
                collector.subscribe(&slot.name, &["bus"]).unwrap();
                let buffer = slot.buffer();
                let mut run = Vec::with_capacity(PER_RUN);
                while run.len() < PER_RUN {
                    let batch = buffer
                        .blocking_events(&slot.name, 16, &token)
                        .expect("attached while reading");
                    run.extend(batch.into_iter().map(|e| *e));
                }
                collector.unsubscribe(&slot.name, &["bus"]).unwrap();
                runs.push(run);
            }
            let _ = tx.send(runs);
        });
    }
    drop(tx);

    let mut all_runs = Vec::new();
    for _ in 0..CHURNERS {
        all_runs.extend(
            rx.recv_timeout(Duration::from_secs(20))
                .expect("churner finished"),
        );
    }
    stop.store(true, Ordering::SeqCst);
    for p in producers {
        p.join().unwrap();
    }

    assert_eq!(all_runs.len(), CHURNERS * CYCLES);
    for run in &all_runs {
        assert!(run.len() >= PER_RUN);
        assert_gap_free(run, PRODUCERS);
    }

    // every assigned buffer was revoked exactly once, in hand-over order
    assert!(collector.buffer("bus").is_none());
    assert!(source.sets.load(Ordering::SeqCst) >= 1);
    assert_eq!(
        source.sets.load(Ordering::SeqCst),
        source.unsets.load(Ordering::SeqCst)
    );
    assert_eq!(source.mismatched.load(Ordering::SeqCst), 0);
    assert!(!source.inner.is_publishing());
}
