//! Moves work from the capture thread back onto the control plane.
//!
//! Any thread holding a [`HandOff`] may submit a closure. The closures run
//! on whichever task drives the paired [`ControlPlane`], one at a time, each
//! exactly once, with mutable access to the subscriber state the control
//! plane owns. Submissions from one sender keep their relative order; there
//! is no ordering between different senders.

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

pub type Task<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

pub struct HandOff<S> {
    tx: UnboundedSender<Task<S>>,
}

impl<S> Clone for HandOff<S> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<S> HandOff<S> {
    /// Queues `task` for the control plane. Returns `false` if the control
    /// plane is gone, in which case the task is dropped unrun.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.tx.send(Box::new(task)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Single consumer side of the hand-off; owns the subscriber.
pub struct ControlPlane<S> {
    rx: UnboundedReceiver<Task<S>>,
    subscriber: S,
}

impl<S> ControlPlane<S> {
    pub fn new(subscriber: S) -> (Self, HandOff<S>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx, subscriber }, HandOff { tx })
    }

    /// Runs every task already queued without waiting. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        loop {
            match self.rx.try_recv() {
                Ok(task) => {
                    task(&mut self.subscriber);
                    ran += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return ran,
            }
        }
    }

    /// Waits for the next task and runs it. Returns `false` once every
    /// [`HandOff`] has been dropped and the queue is drained.
    pub async fn run_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(task) => {
                task(&mut self.subscriber);
                true
            }
            None => false,
        }
    }

    /// Keeps running tasks until `done` holds for the subscriber or all
    /// senders are gone.
    pub async fn run_until<F>(&mut self, mut done: F) -> bool
    where
        F: FnMut(&S) -> bool,
    {
        while !done(&self.subscriber) {
            if !self.run_next().await {
                return done(&self.subscriber);
            }
        }
        true
    }

    pub fn subscriber(&self) -> &S {
        &self.subscriber
    }

    pub fn into_subscriber(self) -> S {
        self.subscriber
    }
}
