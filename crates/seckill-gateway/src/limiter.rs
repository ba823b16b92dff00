//! Per-user request limit within a wall-clock second
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use parking_lot::Mutex;

/// Outcome of [`RateLimiter::observe()`]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Decision {
    /// The request is within the limit
    Accept,
    /// The user exceeded the limit for the current second
    Throttle,
}

/// Requests seen from one user
#[derive(Debug)]
struct Cell {
    count: u32,
    /// Wall-clock second of the most recent observation
    second: i64,
}

#[derive(Debug, Default)]
struct State {
    cells: HashMap<u64, Cell>,
    /// Second at which stale cells were last evicted
    swept_at: i64,
}

impl State {
    /// Drop cells that cannot affect any decision from `now` on
    fn sweep(&mut self, now: i64) {
        self.cells.retain(|_, cell| cell.second >= now - 1);
        self.swept_at = now;
    }
}

/// Counts requests per user and wall-clock second
///
/// One mutex covers lookup and update, so the observations of a single user
/// are totally ordered.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    state: Mutex<State>,
}

impl RateLimiter {
    /// Create a limiter allowing `limit` requests per user and second
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            state: Mutex::new(State::default()),
        }
    }

    /// Record a request of `user_id` at wall-clock second `now`
    pub fn observe(&self, user_id: u64, now: i64) -> Decision {
        let mut state = self.state.lock();
        if state.swept_at != now {
            state.sweep(now);
        }

        match state.cells.entry(user_id) {
            Entry::Vacant(entry) => {
                entry.insert(Cell {
                    count: 1,
                    second: now,
                });
                Decision::Accept
            }
            Entry::Occupied(mut entry) => {
                let cell = entry.get_mut();
                if cell.second != now {
                    // A new second (or the clock went backwards): start over.
                    cell.count = 1;
                    cell.second = now;
                    return Decision::Accept;
                }
                cell.count = cell.count.saturating_add(1);
                if cell.count > self.limit {
                    Decision::Throttle
                } else {
                    Decision::Accept
                }
            }
        }
    }

    /// Number of users currently tracked
    pub fn tracked_users(&self) -> usize {
        self.state.lock().cells.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn boundary_for_every_small_limit() {
        for limit in 1..=10 {
            let limiter = RateLimiter::new(limit);
            for _ in 0..limit {
                assert_eq!(limiter.observe(7, 1500), Decision::Accept);
            }
            assert_eq!(limiter.observe(7, 1500), Decision::Throttle);
            assert_eq!(limiter.observe(7, 1500), Decision::Throttle);
            assert_eq!(limiter.observe(7, 1501), Decision::Accept);
        }
    }

    #[test]
    fn users_are_independent() {
        let limiter = RateLimiter::new(1);
        assert_eq!(limiter.observe(1, 10), Decision::Accept);
        assert_eq!(limiter.observe(2, 10), Decision::Accept);
        assert_eq!(limiter.observe(1, 10), Decision::Throttle);
        assert_eq!(limiter.observe(2, 10), Decision::Throttle);
    }

    #[test]
    fn clock_going_backwards_resets() {
        let limiter = RateLimiter::new(1);
        assert_eq!(limiter.observe(1, 100), Decision::Accept);
        assert_eq!(limiter.observe(1, 100), Decision::Throttle);
        assert_eq!(limiter.observe(1, 99), Decision::Accept);
        assert_eq!(limiter.observe(1, 99), Decision::Throttle);
    }

    #[test]
    fn stale_cells_are_evicted() {
        let limiter = RateLimiter::new(3);
        for user in 0..100 {
            limiter.observe(user, 10);
        }
        assert_eq!(limiter.tracked_users(), 100);

        // Cells of the previous second survive.
        limiter.observe(1_000, 11);
        assert_eq!(limiter.tracked_users(), 101);

        limiter.observe(1_000, 12);
        assert_eq!(limiter.tracked_users(), 1);
    }

    #[test]
    fn eviction_keeps_the_boundary() {
        let limiter = RateLimiter::new(2);
        assert_eq!(limiter.observe(1, 10), Decision::Accept);
        assert_eq!(limiter.observe(1, 10), Decision::Accept);
        // Another user triggers a sweep in the same second.
        assert_eq!(limiter.observe(2, 10), Decision::Accept);
        assert_eq!(limiter.observe(1, 10), Decision::Throttle);
    }

    #[test]
    fn parallel_clients_share_the_limit() {
        for (threads, per_thread, limit) in [(8, 50, 20), (4, 2, 100), (16, 16, 256)] {
            let limiter = Arc::new(RateLimiter::new(limit));
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let limiter = limiter.clone();
                    thread::spawn(move || {
                        (0..per_thread)
                            .filter(|_| limiter.observe(42, 5_000) == Decision::Accept)
                            .count()
                    })
                })
                .collect();
            let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
            assert_eq!(accepted, (threads * per_thread).min(limit as usize));
        }
    }
}
