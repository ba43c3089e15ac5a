//! Fixed-size worker pool for per-image work.
//!
//! Every per-file step (retrieval, conversion, decoding, transforms) goes through
//! [`WorkerPool::map`] or [`WorkerPool::map_packed`]. Inputs are moved into the
//! workers and outputs moved back; results come back in input order and the first
//! failing item fails the whole call.

use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// Pool size used when nothing else is configured
pub const DEFAULT_POOL_SIZE: usize = 4;

/// A function callable with a tuple of positional arguments.
///
/// Implemented for plain functions and closures of two and three arguments, so
/// `map_packed` can take `(path, conversions)` pairs the way a single-argument
/// `map` takes paths.
pub trait Unpack<Args> {
    type Output;

    fn call_unpacked(&self, args: Args) -> Self::Output;
}

impl<F, A, B, R> Unpack<(A, B)> for F
where
    F: Fn(A, B) -> R,
{
    type Output = R;

    fn call_unpacked(&self, (a, b): (A, B)) -> R {
        self(a, b)
    }
}

impl<F, A, B, C, R> Unpack<(A, B, C)> for F
where
    F: Fn(A, B, C) -> R,
{
    type Output = R;

    fn call_unpacked(&self, (a, b, c): (A, B, C)) -> R {
        self(a, b, c)
    }
}

/// Bounded pool of worker threads
///
/// Cloning is cheap and shares the same threads.
#[derive(Clone)]
pub struct WorkerPool {
    pool: Arc<rayon::ThreadPool>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool with exactly `size` workers
    pub fn new(size: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(size.max(1))
            .thread_name(|i| format!("pipeline-worker-{}", i))
            .build()?;

        Ok(Self {
            pool: Arc::new(pool),
            size: size.max(1),
        })
    }

    /// Number of workers in the pool
    pub fn size(&self) -> usize {
        self.size
    }

    /// Apply `f` to every input, returning outputs in input order.
    ///
    /// Fails with the first error produced by any invocation; no partial output
    /// is returned in that case.
    pub fn map<T, R, F>(&self, f: F, inputs: Vec<T>) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Result<R> + Send + Sync,
    {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        self.pool.install(|| inputs.into_par_iter().map(|x| f(x)).collect())
    }

    /// Like [`map`](Self::map), but each input is a tuple unpacked into the
    /// positional arguments of `f`.
    pub fn map_packed<Args, R, F>(&self, f: F, inputs: Vec<Args>) -> Result<Vec<R>>
    where
        Args: Send,
        R: Send,
        F: Unpack<Args, Output = Result<R>> + Send + Sync,
    {
        self.map(|args| f.call_unpacked(args), inputs)
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool").field("size", &self.size).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::time::Duration;

    fn slow_square(x: u64) -> Result<u64> {
        // Earlier inputs finish last
        std::thread::sleep(Duration::from_millis(20 - x.min(20)));
        Ok(x * x)
    }

    #[test]
    fn test_map_preserves_order() {
        let pool = WorkerPool::new(4).unwrap();
        let inputs: Vec<u64> = (0..20).collect();
        let out = pool.map(slow_square, inputs.clone()).unwrap();
        let expected: Vec<u64> = inputs.iter().map(|x| x * x).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_pool_size_does_not_change_results() {
        let inputs: Vec<u64> = (0..50).collect();
        let single = WorkerPool::new(1).unwrap().map(slow_square, inputs.clone()).unwrap();
        let many = WorkerPool::new(8).unwrap().map(slow_square, inputs).unwrap();
        assert_eq!(single, many);
    }

    #[test]
    fn test_single_failure_fails_whole_map() {
        let pool = WorkerPool::new(3).unwrap();
        let result = pool.map(
            |x: u32| {
                if x == 7 {
                    Err(Error::invalid_input("seven"))
                } else {
                    Ok(x)
                }
            },
            (0..10).collect(),
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_map_packed_unpacks_tuples() {
        let pool = WorkerPool::new(2).unwrap();
        let inputs = vec![
            ("a".to_string(), 1usize),
            ("b".to_string(), 3),
            ("c".to_string(), 0),
        ];
        let out = pool
            .map_packed(|s: String, n: usize| -> Result<String> { Ok(s.repeat(n)) }, inputs)
            .unwrap();
        assert_eq!(out, vec!["a", "bbb", ""]);

        let triples = vec![(1, 2, 3), (4, 5, 6)];
        let sums = pool
            .map_packed(|a: i32, b: i32, c: i32| -> Result<i32> { Ok(a + b + c) }, triples)
            .unwrap();
        assert_eq!(sums, vec![6, 15]);
    }

    #[test]
    fn test_empty_input() {
        let pool = WorkerPool::new(2).unwrap();
        let out: Vec<u8> = pool.map(|x: u8| Ok(x), Vec::new()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.size(), 1);
    }
}
