//! Data generators for benchmarks

use nosql::entry::Entry;
use rand::Rng;

/// Key of the `i`-th generated entry. Zero padded so keys sort by index.
pub fn key_for(i: usize) -> Vec<u8> {
    format!("key-{:010}", i).into_bytes()
}

/// Random value of `size` bytes.
pub fn random_value(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` entries for `bucket` with random values
pub fn generate_entries(bucket: &[u8], count: usize, value_size: usize) -> Vec<Entry> {
    (0..count)
        .map(|i| Entry::new(bucket, key_for(i), random_value(value_size)))
        .collect()
}

/// Random key indexes in `0..count`, for read benchmarks
pub fn random_indexes(count: usize, samples: usize) -> Vec<usize> {
    let mut rng = rand::thread_rng();
    (0..samples).map(|_| rng.gen_range(0..count.max(1))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_entries() {
        let entries = generate_entries(b"bench", 10, 16);
        assert_eq!(entries.len(), 10);
        assert!(entries.iter().all(|entry| entry.value.len() == 16));
        assert_eq!(entries[3].key, b"key-0000000003");
    }

    #[test]
    fn test_random_indexes_stay_in_range() {
        assert!(random_indexes(5, 100).into_iter().all(|i| i < 5));
    }
}
