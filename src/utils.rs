//! small helpers : dispatching files on workers, batching, config names.

use std::path::Path;

/// Split files in nb_shards shards, file i going to shard i mod nb_shards.
/// Order is kept inside a shard. Files are expected sorted, so files of similar size
/// end up on different workers instead of contiguous runs on one worker.
pub fn shard<T: Clone>(files: &[T], nb_shards: usize) -> Vec<Vec<T>> {
    let nb_shards = nb_shards.max(1);
    let mut shards: Vec<Vec<T>> = (0..nb_shards).map(|_| Vec::with_capacity(files.len() / nb_shards + 1)).collect();
    for (i, f) in files.iter().enumerate() {
        shards[i % nb_shards].push(f.clone());
    }
    shards
} // end of shard

/// the shards of [shard] concatenated.
///
/// distribute(&[1, 2, 3, 4, 5, 6, 7, 8, 9], 4) gives [1, 5, 9, 2, 6, 3, 7, 4, 8]
pub fn distribute<T: Clone>(files: &[T], nb_shards: usize) -> Vec<T> {
    shard(files, nb_shards).into_iter().flatten().collect()
}

/// iterator over consecutive chunks of n items, the last one possibly shorter.
pub struct Batches<I: Iterator> {
    iter: I,
    n: usize,
}

impl<I: Iterator> Iterator for Batches<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch: Vec<I::Item> = self.iter.by_ref().take(self.n).collect();
        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}

/// batches of n items (n = 0 is taken as 1). Lazy : items are pulled one batch at a time.
pub fn batches<I: IntoIterator>(items: I, n: usize) -> Batches<I::IntoIter> {
    Batches { iter: items.into_iter(), n: n.max(1) }
}

/// human readable number of bases
pub fn bases_fmt(bases: u64) -> String {
    let units = ["", "K", "M", "G", "T", "P", "E", "Z"];
    let mut value = bases as f64;
    for (idx, unit) in units.iter().enumerate() {
        if value.abs() < 1000.0 || idx == units.len() - 1 {
            if idx == 0 {
                return format!("{:.0} {}bases", value, unit);
            }
            return format!("{:.2} {}bases", value, unit);
        }
        value /= 1000.0;
    }
    unreachable!()
} // end of bases_fmt

/// config name as known by the server : directory and ".cfg" extension removed
pub fn parse_config(filename: Option<&str>) -> Option<String> {
    let filename = filename?;
    if filename.is_empty() {
        return None;
    }
    let stripped = filename.strip_suffix(".cfg").unwrap_or(filename);
    let base = Path::new(stripped)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from(stripped));
    Some(base)
} // end of parse_config

// end of mod tests
