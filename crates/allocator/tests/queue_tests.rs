//! Cross-thread properties of the condition-filtered blocking queue and
//! the pool structures built on it.

use std::collections::HashSet;
use std::sync::{Arc, Barrier, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use allocator::ConditionBlockingQueue;

#[test]
fn blocked_waiters_drain_in_admission_order() {
    let queue: Arc<ConditionBlockingQueue<&'static str>> = Arc::new(ConditionBlockingQueue::new());
    let barrier = Arc::new(Barrier::new(4));
    let (tx, rx) = mpsc::channel();

    let mut waiters = Vec::new();
    for _ in 0..3 {
        let queue = Arc::clone(&queue);
        let barrier = Arc::clone(&barrier);
        let tx = tx.clone();
        waiters.push(thread::spawn(move || {
            barrier.wait();
            let taken = queue.take(|_| true).expect("queue was not cancelled");
            tx.send(taken).unwrap();
        }));
    }
    drop(tx);

    // All three waiters are parked before the first element is admitted.
    barrier.wait();
    thread::sleep(Duration::from_millis(100));

    for expected in ["D1", "D2", "D3"] {
        queue.add(expected);
        let taken = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("a waiter should have been woken");
        assert_eq!(taken, expected);
    }
    for waiter in waiters {
        waiter.join().unwrap();
    }
}

#[test]
fn concurrent_takers_never_share_an_element() {
    let queue = Arc::new(ConditionBlockingQueue::new());
    for value in 0..100u32 {
        queue.add(value);
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let queue = Arc::clone(&queue);
        handles.push(thread::spawn(move || {
            let mut taken = Vec::new();
            while let Some(value) = queue.poll(Duration::from_millis(50), |_| true) {
                taken.push(value);
            }
            taken
        }));
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for value in handle.join().unwrap() {
            assert!(seen.insert(value), "element {value} was taken twice");
            total += 1;
        }
    }
    assert_eq!(total, 100);
    assert!(queue.is_empty());
}

#[test]
fn takers_with_disjoint_predicates_coexist() {
    let queue: Arc<ConditionBlockingQueue<u32>> = Arc::new(ConditionBlockingQueue::new());
    let results = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for parity in [0u32, 1u32] {
        let queue = Arc::clone(&queue);
        let results = Arc::clone(&results);
        handles.push(thread::spawn(move || {
            for _ in 0..5 {
                let taken = queue.take(move |n| n % 2 == parity).unwrap();
                results.lock().unwrap().push(taken);
            }
        }));
    }

    thread::sleep(Duration::from_millis(50));
    for value in 0..10u32 {
        queue.add(value);
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 10);
    // each parity stream preserved FIFO order
    let evens: Vec<u32> = results.iter().copied().filter(|n| n % 2 == 0).collect();
    let odds: Vec<u32> = results.iter().copied().filter(|n| n % 2 == 1).collect();
    assert_eq!(evens, vec![0, 2, 4, 6, 8]);
    assert_eq!(odds, vec![1, 3, 5, 7, 9]);
}
