//! Parallel map over independent tasks.
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::error::MIError;

/// Run `f` on every task index in `0..n_tasks` using `n_jobs` threads and return the results in
/// task order.
///
/// A single job runs the same code on a one-thread pool. Zero jobs uses all available cores.
/// The first error, in task order, is returned.
///
/// # Example
/// ```rust
/// use motor_intention::parallel::par_map;
///
/// let squares = par_map(5, 2, |i| Ok(i * i)).unwrap();
/// assert_eq!(squares, vec![0, 1, 4, 9, 16]);
/// ```
pub fn par_map<T, F>(n_tasks: usize, n_jobs: usize, f: F) -> Result<Vec<T>, MIError>
where
    T: Send,
    F: Fn(usize) -> Result<T, MIError> + Sync + Send,
{
    let pool = ThreadPoolBuilder::new()
        .num_threads(n_jobs)
        .build()
        .map_err(|e| MIError::InvalidParameter(format!("cannot build thread pool: {}", e)))?;

    log::debug!(
        "Running {} tasks on {} threads",
        n_tasks,
        pool.current_num_threads()
    );
    let results: Vec<Result<T, MIError>> =
        pool.install(|| (0..n_tasks).into_par_iter().map(&f).collect());
    results.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_independent_of_jobs() {
        let seq = par_map(100, 1, |i| Ok(i as f64 * 0.5)).unwrap();
        let par = par_map(100, 4, |i| Ok(i as f64 * 0.5)).unwrap();
        assert_eq!(seq, par);
        assert_eq!(par_map(0, 0, |i| Ok(i)).unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn test_first_error_is_returned() {
        let res = par_map(10, 3, |i| match i {
            3 | 7 => Err(MIError::NumericalError(format!("task {}", i))),
            _ => Ok(i),
        });
        assert_eq!(res, Err(MIError::NumericalError("task 3".to_string())));
    }
}
