mod common;

use std::{sync::Arc, thread, time::Duration};

use camera_device::{
    dispatch::{wake_channel, Dispatcher},
    pool::BufferPool,
    request::{Request, RequestId, RequestStatus},
    StreamRole,
};
use common::*;

fn setup(buffers: usize) -> (Arc<Dispatcher>, std::sync::mpsc::Receiver<()>, MockDevice) {
    let pool = Arc::new(BufferPool::new());
    let mut device = MockDevice::new();
    start(&pool, &mut device, false, buffers);
    let (waker, wake_rx) = wake_channel();
    (Arc::new(Dispatcher::new(pool, waker)), wake_rx, device)
}

#[test]
fn test_drain_follows_completion_order() {
    let (dispatcher, wake_rx, device) = setup(4);
    let mut queued: Vec<Option<Request>> = device.take_queued().into_iter().map(Some).collect();
    let order: Vec<RequestId> = [2, 0, 3, 1].iter().filter_map(|&index| queued[index].as_ref().map(Request::id)).collect();

    for index in [2, 0, 3, 1] {
        let request = queued[index].take().unwrap();
        dispatcher.on_completion(completed(request));
    }

    wake_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    let drained: Vec<RequestId> = std::iter::from_fn(|| dispatcher.drain()).map(|request| request.id()).collect();
    assert_eq!(drained, order);
    assert!(dispatcher.drain().is_none());
}

#[test]
fn test_cancelled_requests_are_discarded() {
    let (dispatcher, wake_rx, device) = setup(2);

    for mut request in device.take_queued() {
        request.set_status(RequestStatus::Cancelled);
        dispatcher.on_completion(request);
    }

    assert!(dispatcher.drain().is_none());
    assert!(wake_rx.try_recv().is_err());
    assert_eq!(dispatcher.pool().census(StreamRole::Viewfinder).in_flight, 2);
}

#[test]
fn test_drain_on_empty_queue() {
    let (dispatcher, _wake_rx, _device) = setup(2);
    assert!(dispatcher.drain().is_none());
}

#[test]
fn test_concurrent_completions_keep_per_thread_order() {
    let (dispatcher, _wake_rx, device) = setup(8);
    let mut queued = device.take_queued();
    let second: Vec<_> = queued.split_off(4);
    let first = queued;
    let first_ids: Vec<RequestId> = first.iter().map(|request| request.id()).collect();
    let second_ids: Vec<RequestId> = second.iter().map(|request| request.id()).collect();

    let handles: Vec<_> = [first, second]
        .into_iter()
        .map(|requests| {
            let handler = dispatcher.completion_handler();
            thread::spawn(move || {
                for request in requests {
                    handler(completed(request));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let drained: Vec<RequestId> = std::iter::from_fn(|| dispatcher.drain()).map(|request| request.id()).collect();
    assert_eq!(drained.len(), 8);
    let filtered = |ids: &[RequestId]| drained.iter().copied().filter(|id| ids.contains(id)).collect::<Vec<_>>();
    assert_eq!(filtered(&first_ids), first_ids);
    assert_eq!(filtered(&second_ids), second_ids);
}

#[test]
fn test_stop_discards_undrained_requests() {
    let (dispatcher, _wake_rx, device) = setup(3);
    for request in device.take_queued() {
        dispatcher.on_completion(completed(request));
    }

    assert_eq!(dispatcher.pool().stop(), 3);
    assert!(dispatcher.drain().is_none());
}
