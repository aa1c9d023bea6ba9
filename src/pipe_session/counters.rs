#[cfg(any(test, feature = "mutants"))]
use std::cell::Cell;

#[cfg(any(test, feature = "mutants"))]
thread_local! {
    static FORCE_KILL_COUNT: Cell<usize> = const { Cell::new(0) };
    static WRITE_LIMIT: Cell<usize> = const { Cell::new(usize::MAX) };
}

#[cfg(any(test, feature = "mutants"))]
pub(super) fn record_force_kill() {
    FORCE_KILL_COUNT.with(|count| count.set(count.get() + 1));
}

#[cfg(any(test, feature = "mutants"))]
#[allow(dead_code)]
pub(crate) fn force_kill_count() -> usize {
    FORCE_KILL_COUNT.with(|count| count.get())
}

#[cfg(any(test, feature = "mutants"))]
#[allow(dead_code)]
pub(crate) fn reset_force_kill_count() {
    FORCE_KILL_COUNT.with(|count| count.set(0));
}

/// Cap the number of bytes handed to a single `write(2)` on this thread.
#[cfg(any(test, feature = "mutants"))]
#[allow(dead_code)]
pub(crate) fn set_write_limit(limit: Option<usize>) {
    WRITE_LIMIT.with(|value| value.set(limit.unwrap_or(usize::MAX)));
}

pub(super) fn write_limit(len: usize) -> usize {
    #[cfg(any(test, feature = "mutants"))]
    {
        let limit = WRITE_LIMIT.with(|value| value.get());
        if limit != usize::MAX {
            return len.min(limit.max(1));
        }
    }
    len
}
