// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Monotonic time and the bounded-jitter helpers shared by the engines.

use rand::{Rng as _, RngCore};

/// Lifetime sentinel meaning "never expires" (RFC 2131 / RFC 3315).
pub const INFINITE_LIFETIME: u32 = 0xffff_ffff;

/// A monotonic instant, in milliseconds.
///
/// Deadline arithmetic is performed in 64 bits so that second-granularity
/// lifetimes multiplied by 1000 cannot overflow, and the counter itself
/// never wraps within a deployment lifetime.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Millis(pub u64);

impl Millis {
    /// The zero instant.
    pub const ZERO: Millis = Millis(0);

    /// Returns this instant advanced by `ms` milliseconds.
    pub fn add_ms(self, ms: u64) -> Millis {
        let Millis(t) = self;
        Millis(t.saturating_add(ms))
    }

    /// Milliseconds elapsed from `earlier` to this instant, zero if
    /// `earlier` is in the future.
    pub fn elapsed_since(self, earlier: Millis) -> u64 {
        let (Millis(t), Millis(e)) = (self, earlier);
        t.saturating_sub(e)
    }
}

/// A source of monotonic time.
///
/// The engines never read a global clock; the platform provides one at
/// construction so tests can substitute a controllable instance.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Millis;
}

/// Production [`Clock`] anchored to [`std::time::Instant`] at construction.
#[derive(Debug)]
pub struct SystemClock {
    origin: std::time::Instant,
}

impl SystemClock {
    /// Creates a clock whose epoch is the moment of the call.
    pub fn new() -> SystemClock {
        SystemClock { origin: std::time::Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> SystemClock {
        SystemClock::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Millis {
        Millis(u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX))
    }
}

/// Uniform integer in `[min, max]`, inclusive on both ends.
pub fn rand_range<R: RngCore>(rng: &mut R, min: i64, max: i64) -> i64 {
    rng.gen_range(min..=max)
}

/// Multiplies `value` by a randomization factor chosen uniformly between
/// −0.1 and +0.1, as required for every DHCPv6 RT computation (RFC 3315
/// section 14).
pub fn rand_jitter<R: RngCore>(rng: &mut R, value: u64) -> i64 {
    let value = i64::try_from(value).unwrap_or(i64::MAX / 1000);
    value * rand_range(rng, -100, 100) / 1000
}

/// Adds a signed jitter to a millisecond quantity, saturating at zero.
pub fn apply_jitter(value: u64, jitter: i64) -> u64 {
    if jitter < 0 {
        value.saturating_sub(jitter.unsigned_abs())
    } else {
        value.saturating_add(jitter as u64)
    }
}
