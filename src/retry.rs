//! Single-thread retry/retransmission scheduler (§4.4).
//!
//! Port of `retrier.h`/`retrier.cpp`: callers hand in a delay and a callback
//! returning `bool`; the callback is invoked at most once per elapsed delay
//! and, returning `false`, is re-armed for another `delay` from then. The
//! background thread parks on the earliest pending deadline and wakes early
//! whenever a new entry is scheduled.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Callback = Box<dyn FnMut() -> bool + Send>;

struct ScheduledRetry {
    retry_at: Instant,
    delay: Duration,
    callback: Callback,
}

impl PartialEq for ScheduledRetry {
    fn eq(&self, other: &Self) -> bool {
        self.retry_at == other.retry_at
    }
}
impl Eq for ScheduledRetry {}

impl PartialOrd for ScheduledRetry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledRetry {
    // Reversed so a `BinaryHeap` (a max-heap) surfaces the *earliest* deadline.
    fn cmp(&self, other: &Self) -> Ordering {
        other.retry_at.cmp(&self.retry_at)
    }
}

struct State {
    queue: BinaryHeap<ScheduledRetry>,
    terminating: bool,
}

/// Schedules callbacks to run after a delay, re-arming them for the same
/// delay each time they report they aren't done yet.
pub struct RetryScheduler {
    state: Arc<Mutex<State>>,
    cond: Arc<Condvar>,
    thread: Option<JoinHandle<()>>,
}

impl RetryScheduler {
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(State {
            queue: BinaryHeap::new(),
            terminating: false,
        }));
        let cond = Arc::new(Condvar::new());

        let thread_state = Arc::clone(&state);
        let thread_cond = Arc::clone(&cond);
        let thread = thread::spawn(move || Self::run(thread_state, thread_cond));

        RetryScheduler {
            state,
            cond,
            thread: Some(thread),
        }
    }

    /// Arms `callback` to run after `delay`. Returning `false` from the
    /// callback reschedules it for another `delay` from the time it ran.
    pub fn retry_after<F>(&self, delay: Duration, callback: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let mut state = self.state.lock().unwrap();
        state.queue.push(ScheduledRetry {
            retry_at: Instant::now() + delay,
            delay,
            callback: Box::new(callback),
        });
        self.cond.notify_one();
    }

    fn run(state: Arc<Mutex<State>>, cond: Arc<Condvar>) {
        let mut guard = state.lock().unwrap();
        loop {
            let next_retry_at = guard.queue.peek().map(|next| next.retry_at);
            guard = match next_retry_at {
                None => cond.wait(guard).unwrap(),
                Some(retry_at) => {
                    let now = Instant::now();
                    if retry_at <= now {
                        guard
                    } else {
                        cond.wait_timeout(guard, retry_at - now).unwrap().0
                    }
                }
            };

            if guard.terminating {
                break;
            }

            loop {
                let due = match guard.queue.peek() {
                    Some(next) if next.retry_at <= Instant::now() => true,
                    _ => false,
                };
                if !due {
                    break;
                }
                let mut entry = guard.queue.pop().unwrap();
                let done = (entry.callback)();
                if !done {
                    entry.retry_at = Instant::now() + entry.delay;
                    guard.queue.push(entry);
                }
            }
        }
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        {
            let mut guard = self.state.lock().unwrap();
            guard.terminating = true;
            // Drop any pending callbacks without invoking them.
            guard.queue.clear();
            self.cond.notify_one();
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    #[test]
    fn callback_reschedules_until_it_reports_done() {
        let scheduler = RetryScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let target = Arc::clone(&count);

        scheduler.retry_after(Duration::from_millis(5), move || {
            target.fetch_add(1, AtomicOrdering::SeqCst) >= 2
        });

        thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(AtomicOrdering::SeqCst), 3);
    }

    #[test]
    fn drop_drains_without_firing() {
        let scheduler = RetryScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let target = Arc::clone(&fired);

        scheduler.retry_after(Duration::from_secs(60), move || {
            target.fetch_add(1, AtomicOrdering::SeqCst);
            true
        });
        drop(scheduler);
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 0);
    }
}
