//! Token bucket rate limiter
//!
//! Each request costs tokens looked up by category in the cost map. A
//! request that fits is admitted immediately; otherwise it waits in a
//! bounded queue until [`RateLimiter::tick`] finds enough tokens, or is
//! rejected outright when the queue is full.
//!
//! Refill uses integer floor division. `last_refill` only advances by the
//! time the added tokens actually consumed, so fractional credit carries
//! over to the next refill, except when the bucket clamps at capacity.

use crate::config::RateLimitConfig;
use crate::error::RateLimitReason;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// A request presented for admission
#[derive(Debug, Clone)]
pub struct RateLimitRequest<T> {
    pub category: String,
    pub priority: u8,
    /// Overrides the cost map for this request
    pub cost: Option<u64>,
    pub payload: T,
}

impl<T> RateLimitRequest<T> {
    pub fn new(category: impl Into<String>, payload: T) -> Self {
        Self {
            category: category.into(),
            priority: 0,
            cost: None,
            payload,
        }
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn cost(mut self, cost: u64) -> Self {
        self.cost = Some(cost);
        self
    }
}

/// Result of [`RateLimiter::admit`]
#[derive(Debug, Clone, PartialEq)]
pub enum Admission<T> {
    /// Tokens taken; dispatch the payload now
    Allow(T),
    /// Held in the queue; it comes back out of `tick`
    Queue,
    /// Hard failure, never retried by the limiter
    Reject(T, RateLimitReason),
}

/// Result of [`RateLimiter::tick`]
#[derive(Debug, Clone, PartialEq)]
pub enum Tick<T> {
    Idle,
    Process(T),
}

#[derive(Debug)]
struct Queued<T> {
    priority: u8,
    cost: u64,
    payload: T,
}

/// Token bucket with a bounded, optionally priority-ordered, queue
#[derive(Debug)]
pub struct RateLimiter<T> {
    capacity: u64,
    tokens: u64,
    refill_rate: u64,
    refill_interval: Duration,
    last_refill: Instant,
    queue: VecDeque<Queued<T>>,
    queue_limit: usize,
    cost_map: HashMap<String, u64>,
    priority_queue: bool,
}

impl<T> RateLimiter<T> {
    /// Create a full bucket
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::new_at(config, Instant::now())
    }

    pub fn new_at(config: &RateLimitConfig, now: Instant) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            capacity,
            tokens: capacity,
            refill_rate: config.refill_rate,
            refill_interval: Duration::from_millis(config.refill_interval_ms.max(1)),
            last_refill: now,
            queue: VecDeque::new(),
            queue_limit: config.queue_limit,
            cost_map: config.cost_map.clone(),
            priority_queue: config.priority_queue,
        }
    }

    /// Cost of a category, 1 when the cost map has no entry
    pub fn cost_of(&self, category: &str) -> u64 {
        self.cost_map.get(category).copied().unwrap_or(1)
    }

    pub fn admit(&mut self, request: RateLimitRequest<T>) -> Admission<T> {
        self.admit_at(request, Instant::now())
    }

    pub fn admit_at(&mut self, request: RateLimitRequest<T>, now: Instant) -> Admission<T> {
        self.refill(now);

        let cost = request.cost.unwrap_or_else(|| self.cost_of(&request.category));

        // Could never be admitted; queueing it would block the head forever
        if cost > self.capacity {
            return Admission::Reject(request.payload, RateLimitReason::RateLimitExceeded);
        }

        // Waiting requests that would be released first keep their place
        if self.tokens >= cost && !self.is_blocked_for(request.priority) {
            self.tokens -= cost;
            return Admission::Allow(request.payload);
        }

        if self.queue.len() < self.queue_limit {
            self.queue.push_back(Queued {
                priority: request.priority,
                cost,
                payload: request.payload,
            });
            return Admission::Queue;
        }

        Admission::Reject(request.payload, RateLimitReason::RateLimitExceeded)
    }

    /// Release at most one queued request
    ///
    /// Call again after dispatching a `Process` result until `Idle`.
    pub fn tick(&mut self) -> Tick<T> {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> Tick<T> {
        self.refill(now);

        let Some(index) = self.head_index() else {
            return Tick::Idle;
        };

        if self.tokens < self.queue[index].cost {
            return Tick::Idle;
        }

        match self.queue.remove(index) {
            Some(queued) => {
                self.tokens -= queued.cost;
                Tick::Process(queued.payload)
            }
            None => Tick::Idle,
        }
    }

    /// Remove every queued request, oldest first
    pub fn drain(&mut self) -> Vec<T> {
        self.queue.drain(..).map(|queued| queued.payload).collect()
    }

    pub fn available_tokens(&self) -> u64 {
        self.tokens
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }

    /// Queued payloads in insertion order
    pub fn queued(&self) -> impl Iterator<Item = &T> {
        self.queue.iter().map(|queued| &queued.payload)
    }

    /// Earliest instant at which a refill adds a token, if anything waits for one
    pub fn next_refill_at(&self) -> Option<Instant> {
        if self.queue.is_empty() || self.refill_rate == 0 {
            return None;
        }
        let interval = self.refill_interval.as_nanos();
        let per_token = interval.div_ceil(self.refill_rate as u128);
        Some(self.last_refill + Duration::from_nanos(per_token as u64))
    }

    /// A queued request with equal or higher priority goes out before this one
    fn is_blocked_for(&self, priority: u8) -> bool {
        if !self.priority_queue {
            return !self.queue.is_empty();
        }
        self.queue.iter().any(|queued| queued.priority >= priority)
    }

    /// Highest priority first, FIFO among equal priorities
    fn head_index(&self) -> Option<usize> {
        if self.queue.is_empty() {
            return None;
        }
        if !self.priority_queue {
            return Some(0);
        }

        let mut best = 0;
        for (index, queued) in self.queue.iter().enumerate().skip(1) {
            if queued.priority > self.queue[best].priority {
                best = index;
            }
        }
        Some(best)
    }

    fn refill(&mut self, now: Instant) {
        if self.refill_rate == 0 {
            return;
        }

        let elapsed = now.saturating_duration_since(self.last_refill).as_nanos();
        let interval = self.refill_interval.as_nanos();
        let rate = self.refill_rate as u128;

        let to_add = elapsed * rate / interval;
        if to_add == 0 {
            return;
        }

        let refilled = (self.tokens as u128).saturating_add(to_add);
        if refilled >= self.capacity as u128 {
            self.tokens = self.capacity;
            self.last_refill = now;
            return;
        }

        self.tokens = refilled as u64;
        let consumed = (to_add * interval).div_ceil(rate);
        self.last_refill += Duration::from_nanos(consumed as u64);
    }
}
