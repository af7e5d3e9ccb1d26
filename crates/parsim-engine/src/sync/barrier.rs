//! A reusable rendezvous barrier. Unlike `std::sync::Barrier` the arity
//! can be resized between phases (the lifecycle edges resize it when a
//! partition finishes early), and an arity of one makes every wait a
//! no-op so single-thread runs pay nothing.

use std::sync::{Condvar, Mutex};

struct BarrierState {
    arity: usize,
    waiting: usize,
    generation: u64,
}

pub struct Barrier {
    state: Mutex<BarrierState>,
    cv: Condvar,
}

impl Barrier {
    pub fn new(arity: usize) -> Self {
        Self {
            state: Mutex::new(BarrierState {
                arity,
                waiting: 0,
                generation: 0,
            }),
            cv: Condvar::new(),
        }
    }

    /// Blocks until `arity` threads have arrived. Returns `true` for the
    /// last arrival (the designated actor for exchange phases).
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock().expect("barrier poisoned");
        if state.arity <= 1 {
            return true;
        }
        state.waiting += 1;
        if state.waiting == state.arity {
            state.waiting = 0;
            state.generation += 1;
            self.cv.notify_all();
            return true;
        }
        let generation = state.generation;
        while state.generation == generation {
            state = self.cv.wait(state).expect("barrier poisoned");
        }
        false
    }

    /// Changes the arity. Only legal while no thread is waiting.
    pub fn resize(&self, arity: usize) {
        let mut state = self.state.lock().expect("barrier poisoned");
        debug_assert_eq!(state.waiting, 0, "resize with waiters present");
        state.arity = arity;
    }

    pub fn arity(&self) -> usize {
        self.state.lock().expect("barrier poisoned").arity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn single_arity_is_a_noop() {
        let barrier = Barrier::new(1);
        assert!(barrier.wait());
        assert!(barrier.wait());
    }

    #[test]
    fn rendezvous_releases_together() {
        let barrier = Arc::new(Barrier::new(3));
        let arrived = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let barrier = barrier.clone();
            let arrived = arrived.clone();
            handles.push(std::thread::spawn(move || {
                for round in 0..5usize {
                    arrived.fetch_add(1, Ordering::SeqCst);
                    barrier.wait();
                    // Everyone must have arrived for this round.
                    assert!(arrived.load(Ordering::SeqCst) >= (round + 1) * 3);
                    barrier.wait();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(arrived.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn exactly_one_designated_actor() {
        let barrier = Arc::new(Barrier::new(4));
        let leaders = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let barrier = barrier.clone();
            let leaders = leaders.clone();
            handles.push(std::thread::spawn(move || {
                if barrier.wait() {
                    leaders.fetch_add(1, Ordering::SeqCst);
                }
                barrier.wait();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(leaders.load(Ordering::SeqCst), 1);
    }
}
