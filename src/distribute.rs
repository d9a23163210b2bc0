//! Balanced, deterministic partitioning of pending files across workers

/// Split sorted `files` into `min(worker_count, files.len())` groups
///
/// The first `w` groups each take a contiguous slice of `n / w` files. The
/// `n % w` leftover files are handed out one each, in order, to the last groups.
/// Group sizes never differ by more than one, concatenating the groups gives back
/// the input, and the same input always yields the same partition.
pub fn group_worker_files<T: Clone>(files: &[T], worker_count: usize) -> Vec<Vec<T>> {
    let n = files.len();
    if n == 0 {
        return Vec::new();
    }
    let w = worker_count.clamp(1, n);
    let base = n / w;
    let rem = n % w;

    let mut groups: Vec<Vec<T>> = files[..w * base]
        .chunks(base)
        .map(|chunk| chunk.to_vec())
        .collect();
    for (i, file) in files[w * base..].iter().enumerate() {
        groups[w - rem + i].push(file.clone());
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(n: usize) -> Vec<String> {
        (0..n).map(|idx| format!("f{:03}", idx)).collect()
    }

    fn groups(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|g| g.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_group_worker_files() {
        assert!(group_worker_files::<String>(&[], 4).is_empty());
        assert_eq!(group_worker_files(&files(1)[..], 1), groups(&[&["f000"]]));
        assert_eq!(group_worker_files(&["f001".to_string()], 100), groups(&[&["f001"]]));
        assert_eq!(
            group_worker_files(&files(4), 4),
            groups(&[&["f000"], &["f001"], &["f002"], &["f003"]])
        );
        assert_eq!(
            group_worker_files(&files(5), 4),
            groups(&[&["f000"], &["f001"], &["f002"], &["f003", "f004"]])
        );
        assert_eq!(
            group_worker_files(&files(8), 4),
            groups(&[&["f000", "f001"], &["f002", "f003"], &["f004", "f005"], &["f006", "f007"]])
        );
        assert_eq!(
            group_worker_files(&files(8), 3),
            groups(&[&["f000", "f001"], &["f002", "f003", "f006"], &["f004", "f005", "f007"]])
        );
        assert_eq!(
            group_worker_files(&files(5), 3),
            groups(&[&["f000"], &["f001", "f003"], &["f002", "f004"]])
        );
    }

    #[test]
    fn test_sorted_mixed_tables() {
        let mut input: Vec<String> = ["tab1.1", "chd.3", "tab1.2", "chd.4", "tab1.3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        input.sort();
        assert_eq!(
            group_worker_files(&input, 3),
            groups(&[&["chd.3"], &["chd.4", "tab1.2"], &["tab1.1", "tab1.3"]])
        );
    }

    #[test]
    fn test_balance_and_coverage() {
        for n in 0..40 {
            for w in 1..12 {
                let input = files(n);
                let result = group_worker_files(&input, w);
                assert_eq!(result.len(), w.min(n));
                assert!(result.iter().all(|g| !g.is_empty()));
                let sizes: Vec<usize> = result.iter().map(Vec::len).collect();
                if let (Some(min), Some(max)) = (sizes.iter().min(), sizes.iter().max()) {
                    assert!(max - min <= 1);
                }
                let flat: Vec<String> = result.concat();
                assert_eq!(flat.len(), n);
                let mut flat_sorted = flat.clone();
                flat_sorted.sort();
                assert_eq!(flat_sorted, input);
                assert_eq!(result, group_worker_files(&input, w));
            }
        }
    }
}
