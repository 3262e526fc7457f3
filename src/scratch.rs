//! Thread-local scratch buffers reused across frames.
//!
//! Every buffer is cleared before it is handed out and keeps its capacity
//! afterwards. Nested use of the same buffer on one thread gets a fresh,
//! temporary vector instead of panicking.

use std::cell::RefCell;

use glam::Mat4;

thread_local! {
    static MAT4_SCRATCH: RefCell<Vec<Mat4>> = const { RefCell::new(Vec::new()) };
    static WEIGHT_SCRATCH: RefCell<Vec<(u32, f32)>> = const { RefCell::new(Vec::new()) };
}

fn with_scratch<T, R>(
    key: &'static std::thread::LocalKey<RefCell<Vec<T>>>,
    f: impl FnOnce(&mut Vec<T>) -> R,
) -> R {
    key.with(|cell| match cell.try_borrow_mut() {
        Ok(mut buffer) => {
            buffer.clear();
            f(&mut buffer)
        }
        Err(_) => f(&mut Vec::new()),
    })
}

/// Matrix scratch used while flattening bone hierarchies.
pub fn with_mat4_scratch<R>(f: impl FnOnce(&mut Vec<Mat4>) -> R) -> R {
    with_scratch(&MAT4_SCRATCH, f)
}

/// `(logical index, weight)` pairs used for morph selection.
pub fn with_weight_scratch<R>(f: impl FnOnce(&mut Vec<(u32, f32)>) -> R) -> R {
    with_scratch(&WEIGHT_SCRATCH, f)
}
