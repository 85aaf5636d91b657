//! Key generation for conversations and messages.
//!
//! Keys double as creation timestamps (milliseconds since the Unix epoch) and
//! as ordering identifiers. Two keys created in the same millisecond must
//! still differ, so the generator never hands out a value that is not
//! strictly greater than the previous one.

use std::sync::atomic::{AtomicI64, Ordering};

/// Identifier of a message inside a conversation.
pub type MessageKey = i64;

/// Identifier of a conversation.
pub type ConversationKey = i64;

static LAST_KEY: AtomicI64 = AtomicI64::new(0);

/// Returns a fresh key: the current time in milliseconds, bumped past the
/// last issued (or observed) key when the clock has not advanced.
pub fn next_key() -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    let mut last = LAST_KEY.load(Ordering::Relaxed);
    loop {
        let candidate = if now > last { now } else { last + 1 };
        match LAST_KEY.compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => return candidate,
            Err(actual) => last = actual,
        }
    }
}

/// Records a key that was created elsewhere (loaded from disk or imported)
/// so that later keys sort after it.
pub fn observe_key(key: i64) {
    LAST_KEY.fetch_max(key, Ordering::AcqRel);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_strictly_increasing() {
        let mut previous = next_key();
        for _ in 0..1000 {
            let key = next_key();
            assert!(key > previous);
            previous = key;
        }
    }

    #[test]
    fn test_observed_key_is_exceeded() {
        let future = chrono::Utc::now().timestamp_millis() + 60_000;
        observe_key(future);
        assert!(next_key() > future);
    }
}
