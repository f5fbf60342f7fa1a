//! Producer/consumer blocking wrapper over [`CyclicQueue`] (§4.3).
//!
//! `QueueCore` holds the cyclic buffer plus a shutdown flag and exposes only
//! `_lock_held` operations: it assumes the caller already holds whatever
//! mutex protects it. [`LockingQueue`] is the standalone case, owning its
//! own `Mutex` and two `Condvar`s. The connection engine instead embeds two
//! `QueueCore`s directly inside its own connection-wide mutex, so the send
//! window and receive queue can be inspected and mutated atomically
//! together with the state machine (the "shared-mutex variant" of §4.3).

use crate::error::{AuError, AuResult};
use crate::queue::cyclic::CyclicQueue;
use std::sync::{Condvar, Mutex};

/// The cyclic buffer plus shutdown flag; manipulated only while some
/// external mutex is held.
pub struct QueueCore<T> {
    pub queue: CyclicQueue<T>,
    shut_down: bool,
}

impl<T: Clone + Default> QueueCore<T> {
    pub fn new(capacity: usize, init_id: u32) -> Self {
        QueueCore {
            queue: CyclicQueue::new(capacity, init_id),
            shut_down: false,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Moves as many bytes from `buf` into the queue as fit without
    /// blocking. Notifies `data_cond` once if any bytes were accepted.
    pub fn try_send_lock_held(&mut self, buf: &[T], data_cond: &Condvar) -> AuResult<usize> {
        if self.shut_down {
            return Err(AuError::send_shut_down());
        }
        let mut n = 0;
        while n < buf.len() && !self.queue.full() {
            self.queue.push_back(buf[n].clone());
            n += 1;
        }
        if n > 0 {
            data_cond.notify_one();
        }
        Ok(n)
    }

    /// Moves as many bytes into `buf` as are available without blocking.
    /// Notifies `space_cond` once if any bytes were removed.
    pub fn try_recv_lock_held(&mut self, buf: &mut [T], space_cond: &Condvar) -> AuResult<usize>
    where
        T: Default,
    {
        if self.shut_down {
            return Err(AuError::recv_shut_down());
        }
        let mut n = 0;
        while n < buf.len() && !self.queue.empty() {
            buf[n] = self.queue.front().clone();
            self.queue.pop_front();
            n += 1;
        }
        if n > 0 {
            space_cond.notify_one();
        }
        Ok(n)
    }

    /// Drops buffered elements up to (but not including) `target_id`,
    /// notifying `notify` once if anything was dropped. Used to retire
    /// acknowledged bytes from a send window; callers are responsible for
    /// checking `target_id` actually lies within the current window first.
    pub fn advance_begin_lock_held(&mut self, target_id: u32, notify: &Condvar) -> usize {
        let mut popped = 0;
        while self.queue.begin_id() != target_id && !self.queue.empty() {
            self.queue.pop_front();
            popped += 1;
        }
        if popped > 0 {
            notify.notify_all();
        }
        popped
    }

    pub fn shutdown_lock_held(&mut self, send_cond: &Condvar, recv_cond: &Condvar) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        send_cond.notify_all();
        recv_cond.notify_all();
    }
}

/// A standalone blocking byte queue owning its own mutex and condvars.
pub struct LockingQueue<T> {
    core: Mutex<QueueCore<T>>,
    send_cond: Condvar,
    recv_cond: Condvar,
}

impl<T: Clone + Default> LockingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        LockingQueue {
            core: Mutex::new(QueueCore::new(capacity, 0)),
            send_cond: Condvar::new(),
            recv_cond: Condvar::new(),
        }
    }

    /// Blocks until all of `buf` has been accepted, or the queue shuts down.
    pub fn send(&self, buf: &[T]) -> AuResult<()> {
        let mut sent = 0;
        let mut guard = self.core.lock().unwrap();
        while sent < buf.len() {
            guard = self
                .send_cond
                .wait_while(guard, |core| !core.is_shut_down() && core.queue.full())
                .unwrap();
            let n = guard.try_send_lock_held(&buf[sent..], &self.recv_cond)?;
            sent += n;
        }
        if !guard.queue.full() {
            self.send_cond.notify_one();
        }
        Ok(())
    }

    /// Blocks until `buf` has been filled entirely, or the queue shuts down.
    pub fn recv(&self, buf: &mut [T]) -> AuResult<()> {
        let mut received = 0;
        let mut guard = self.core.lock().unwrap();
        while received < buf.len() {
            guard = self
                .recv_cond
                .wait_while(guard, |core| !core.is_shut_down() && core.queue.empty())
                .unwrap();
            let n = guard.try_recv_lock_held(&mut buf[received..], &self.send_cond)?;
            received += n;
        }
        if !guard.queue.empty() {
            self.recv_cond.notify_one();
        }
        Ok(())
    }

    pub fn try_send(&self, buf: &[T]) -> AuResult<usize> {
        let mut guard = self.core.lock().unwrap();
        guard.try_send_lock_held(buf, &self.recv_cond)
    }

    pub fn try_recv(&self, buf: &mut [T]) -> AuResult<usize> {
        let mut guard = self.core.lock().unwrap();
        guard.try_recv_lock_held(buf, &self.send_cond)
    }

    pub fn shutdown(&self) {
        let mut guard = self.core.lock().unwrap();
        guard.shutdown_lock_held(&self.send_cond, &self.recv_cond);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn try_send_respects_capacity() {
        let q: LockingQueue<u8> = LockingQueue::new(4);
        let n = q.try_send(&[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(n, 4);
        let n = q.try_send(&[5]).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn try_recv_drains_available_bytes() {
        let q: LockingQueue<u8> = LockingQueue::new(4);
        q.try_send(&[9, 8, 7]).unwrap();
        let mut buf = [0u8; 10];
        let n = q.try_recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[9, 8, 7]);
    }

    #[test]
    fn shutdown_fails_pending_and_future_calls() {
        let q: LockingQueue<u8> = LockingQueue::new(4);
        q.shutdown();
        assert!(q.try_send(&[1]).is_err());
        assert!(q.try_recv(&mut [0u8]).is_err());
        assert!(q.send(&[1]).is_err());
        assert!(q.recv(&mut [0u8]).is_err());
    }

    #[test]
    fn blocking_send_recv_interleave_preserves_order() {
        let q = Arc::new(LockingQueue::<u8>::new(16));
        let total = 10_000usize;
        let payload: Vec<u8> = (0..total).map(|i| (i % 256) as u8).collect();

        let sender = {
            let q = Arc::clone(&q);
            let payload = payload.clone();
            thread::spawn(move || q.send(&payload).unwrap())
        };
        let receiver = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                let mut buf = vec![0u8; total];
                q.recv(&mut buf).unwrap();
                buf
            })
        };

        sender.join().unwrap();
        let received = receiver.join().unwrap();
        assert_eq!(received, payload);
    }
}
