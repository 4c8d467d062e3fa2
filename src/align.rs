//! Helpers that turn unordered query rows into the positional results a
//! [`BatchFunction`](crate::BatchFunction) must return.
//!
//! A typical batch function runs one `WHERE id IN (...)` style query and gets rows back in
//! whatever order the data source chose, with missing ids simply absent. These helpers line the
//! rows back up with the requested keys.

use std::collections::HashMap;
use std::hash::Hash;

/// One slot per key holding the row whose key matches, or `None` when there is no such row.
///
/// When several rows share a key, the first one wins.
///
/// ```
/// use batchload_rs::align;
///
/// let rows = vec![(2, "b"), (1, "a")];
/// let aligned: Vec<Result<_, ()>> = align::by_key(&[1, 3, 2], rows, |row| row.0);
/// assert_eq!(aligned, vec![Ok(Some((1, "a"))), Ok(None), Ok(Some((2, "b")))]);
/// ```
pub fn by_key<K, V, E, I, F>(keys: &[K], rows: I, key_of: F) -> Vec<Result<Option<V>, E>>
where
    K: Eq + Hash,
    I: IntoIterator<Item = V>,
    F: Fn(&V) -> K,
{
    let mut rows_by_key = HashMap::new();
    for row in rows {
        rows_by_key.entry(key_of(&row)).or_insert(row);
    }
    keys.iter().map(|key| Ok(rows_by_key.remove(key))).collect()
}

/// One slot per key holding every row whose key matches, in row order. Keys with no rows get an
/// empty vector.
pub fn grouped_by_key<K, V, E, I, F>(keys: &[K], rows: I, key_of: F) -> Vec<Result<Vec<V>, E>>
where
    K: Eq + Hash,
    I: IntoIterator<Item = V>,
    F: Fn(&V) -> K,
{
    let mut groups: HashMap<K, Vec<V>> = HashMap::new();
    for row in rows {
        groups.entry(key_of(&row)).or_default().push(row);
    }
    keys.iter().map(|key| Ok(groups.remove(key).unwrap_or_default())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Song {
        id: i32,
        author_id: i32,
    }

    fn songs() -> Vec<Song> {
        vec![
            Song { id: 3, author_id: 10 },
            Song { id: 1, author_id: 20 },
            Song { id: 2, author_id: 10 },
        ]
    }

    #[test]
    fn by_key_follows_key_order() {
        let aligned: Vec<Result<_, ()>> = by_key(&[1, 2, 4, 3], songs(), |song| song.id);
        let ids = aligned
            .into_iter()
            .map(|slot| slot.map(|song| song.map(|s| s.id)))
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![Ok(Some(1)), Ok(Some(2)), Ok(None), Ok(Some(3))]);
    }

    #[test]
    fn grouped_by_key_keeps_row_order_and_fills_gaps() {
        let grouped: Vec<Result<_, ()>> =
            grouped_by_key(&[10, 30, 20], songs(), |song| song.author_id);
        let ids = grouped
            .into_iter()
            .map(|slot| slot.map(|songs| songs.iter().map(|s| s.id).collect::<Vec<_>>()))
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![Ok(vec![3, 2]), Ok(vec![]), Ok(vec![1])]);
    }
}
