use std::thread;

use hashbrown::HashMap;

/// Number of items folded into one partial accumulator.
const CHUNK_LEN: usize = 16;

/// Accumulators that can be combined by summation.
pub trait Merge {
    /// Adds `other` into `self`.
    fn merge(&mut self, other: Self);
}

impl Merge for Vec<f64> {
    fn merge(&mut self, other: Self) {
        if self.len() < other.len() {
            self.resize(other.len(), 0.0);
        }
        for (x, y) in self.iter_mut().zip(other) {
            *x += y;
        }
    }
}

impl Merge for f64 {
    fn merge(&mut self, other: Self) {
        *self += other;
    }
}

impl<K, V> Merge for HashMap<K, V>
where
    K: Eq + core::hash::Hash,
    V: core::ops::AddAssign + Default,
{
    fn merge(&mut self, other: Self) {
        for (k, v) in other {
            *self.entry(k).or_default() += v;
        }
    }
}

impl<A, B> Merge for (A, B)
where
    A: Merge,
    B: Merge,
{
    fn merge(&mut self, other: Self) {
        self.0.merge(other.0);
        self.1.merge(other.1);
    }
}

/// Folds every item into an accumulator using `n_threads` workers.
///
/// Items are split into fixed-size chunks; each chunk is folded into a fresh accumulator created
/// by `init`, and the partial accumulators are merged in chunk order. The result is therefore
/// the same for any number of threads.
pub fn map_reduce<T, A, I, F>(items: &[T], n_threads: usize, init: I, fold: F) -> A
where
    T: Sync,
    A: Merge + Send,
    I: Fn() -> A + Sync,
    F: Fn(&mut A, &T) + Sync,
{
    let fold_chunk = |chunk: &[T]| {
        let mut acc = init();
        for item in chunk {
            fold(&mut acc, item);
        }
        acc
    };

    let mut total = init();
    let n_tasks = items.len().div_ceil(CHUNK_LEN);
    if n_threads <= 1 || n_tasks <= 1 {
        for chunk in items.chunks(CHUNK_LEN) {
            total.merge(fold_chunk(chunk));
        }
        return total;
    }

    let (task_s, task_r) = crossbeam_channel::unbounded();
    for task in items.chunks(CHUNK_LEN).enumerate() {
        task_s.send(task).unwrap();
    }
    drop(task_s);

    let (result_s, result_r) = crossbeam_channel::unbounded();
    let fold_chunk = &fold_chunk;
    thread::scope(|scope| {
        for _ in 0..n_threads.min(n_tasks) {
            let task_r = task_r.clone();
            let result_s = result_s.clone();
            scope.spawn(move || {
                while let Ok((i, chunk)) = task_r.recv() {
                    if result_s.send((i, fold_chunk(chunk))).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_s);

        let mut pending = HashMap::new();
        let mut next = 0;
        for (i, acc) in result_r.iter() {
            pending.insert(i, acc);
            while let Some(acc) = pending.remove(&next) {
                total.merge(acc);
                next += 1;
            }
        }
    });
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_utils::hashmap;

    #[test]
    fn test_map_reduce_sum() {
        let items: Vec<u64> = (1..=1000).collect();
        let (sum, count) = map_reduce(
            &items,
            4,
            || (0.0, 0.0),
            |acc: &mut (f64, f64), &x| {
                acc.0 += x as f64;
                acc.1 += 1.0;
            },
        );
        assert_eq!(500500.0, sum);
        assert_eq!(1000.0, count);
    }

    #[test]
    fn test_map_reduce_is_thread_independent() {
        let items: Vec<f64> = (0..777).map(|i| 1.0 / (i as f64 + 0.3)).collect();
        let fold = |acc: &mut f64, &x: &f64| *acc += x;
        let single = map_reduce(&items, 1, || 0.0, fold);
        for n_threads in [2, 3, 8] {
            let multi = map_reduce(&items, n_threads, || 0.0, fold);
            assert_eq!(single.to_bits(), multi.to_bits());
        }
    }

    #[test]
    fn test_map_reduce_hashmap() {
        let items = vec!["a", "b", "a", "c", "a"];
        let counts: HashMap<&str, u64> = map_reduce(&items, 2, HashMap::new, |acc, &w| {
            *acc.entry(w).or_default() += 1;
        });
        assert_eq!(hashmap!["a" => 3, "b" => 1, "c" => 1], counts);
    }

    #[test]
    fn test_map_reduce_empty() {
        let items: Vec<f64> = vec![];
        let total = map_reduce(&items, 4, || 0.0, |acc: &mut f64, &x| *acc += x);
        assert_eq!(0.0, total);
    }
}
