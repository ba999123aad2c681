use std::sync::{
    mpsc::{self, Receiver, SyncSender, TrySendError},
    Arc,
};

use log::{debug, trace};

use crate::{
    device::CompletionHandler,
    pool::BufferPool,
    request::{Request, RequestStatus},
};

pub type Waker = Arc<dyn Fn() + Send + Sync>;

/// Moves completed requests from the device's completion context to the
/// control loop.
///
/// The completion side only touches the pool's done-queue and fires the
/// waker. A lost wake-up is harmless as long as the woken side drains the
/// whole queue.
pub struct Dispatcher {
    pool: Arc<BufferPool>,
    waker: Waker,
}

impl Dispatcher {
    pub fn new(pool: Arc<BufferPool>, waker: Waker) -> Self {
        Self {
            pool,
            waker,
        }
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn on_completion(&self, request: Request) {
        match request.status() {
            RequestStatus::Complete => {}
            status => {
                trace!("request discarded. id: {:?}, status: {:?}", request.id(), status);
                return;
            }
        }

        if self.pool.complete(request) {
            (self.waker)();
        }
    }

    /// Next completed request in completion order.
    pub fn drain(&self) -> Option<Request> {
        self.pool.pop_done()
    }

    pub fn completion_handler(self: &Arc<Self>) -> CompletionHandler {
        let dispatcher = self.clone();
        Arc::new(move |request| dispatcher.on_completion(request))
    }
}

/// Waker backed by a bounded channel. Wake-ups are dropped while the
/// channel is full.
pub fn channel_waker<T: Send + 'static>(sender: SyncSender<T>, message: fn() -> T) -> Waker {
    Arc::new(move || match sender.try_send(message()) {
        Ok(()) | Err(TrySendError::Full(_)) => {}
        Err(TrySendError::Disconnected(_)) => debug!("wake-up receiver gone"),
    })
}

pub fn wake_channel() -> (Waker, Receiver<()>) {
    let (sender, receiver) = mpsc::sync_channel(1);
    (channel_waker(sender, || ()), receiver)
}
