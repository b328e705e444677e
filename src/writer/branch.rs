//! Unique side-branch names.

use std::sync::atomic::{AtomicI64, Ordering};

/// Last suffix handed out in this process. Suffixes are wall-clock
/// milliseconds, bumped when two calls land in the same millisecond.
static LAST_SUFFIX: AtomicI64 = AtomicI64::new(0);

/// `<prefix>-<millis>`, strictly increasing within the process.
pub fn side_branch_name(prefix: &str) -> String {
    let now = chrono::Utc::now().timestamp_millis();
    format!("{prefix}-{}", next_suffix(&LAST_SUFFIX, now))
}

fn next_suffix(last: &AtomicI64, now: i64) -> i64 {
    let mut prev = last.load(Ordering::Relaxed);
    loop {
        let next = now.max(prev + 1);
        match last.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}
