//! Integration tests for the stop signal shared by worker threads

use common::StopSignal;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[test]
fn test_blocking_workers_observe_stop() {
    let stop = StopSignal::new();
    let exited = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let stop = stop.clone();
            let exited = exited.clone();
            thread::spawn(move || {
                while !stop.is_raised() {
                    thread::sleep(Duration::from_millis(5));
                }
                exited.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    stop.raise();
    let joined = handles.into_iter().map(|h| h.join().unwrap()).count();

    assert_eq!(joined, 4);
    assert_eq!(exited.load(Ordering::SeqCst), 4);
}

#[test]
fn test_only_first_raise_reports_true() {
    let stop = StopSignal::new();
    let winners: usize = (0..8)
        .map(|_| {
            let stop = stop.clone();
            thread::spawn(move || stop.raise())
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap() as usize)
        .sum();

    assert_eq!(winners, 1);
}
