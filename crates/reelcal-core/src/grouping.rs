use std::collections::BTreeMap;

use crate::Release;

/// Bucket releases by `release_date`. Each bucket is sorted by descending
/// popularity; ties keep their input order. Buckets iterate in date order.
pub fn group_by_date(releases: &[Release]) -> BTreeMap<String, Vec<Release>> {
    let mut by_date: BTreeMap<String, Vec<Release>> = BTreeMap::new();
    for release in releases {
        by_date
            .entry(release.release_date.clone())
            .or_default()
            .push(release.clone());
    }
    for bucket in by_date.values_mut() {
        // `sort_by` is stable.
        bucket.sort_by(|a, b| b.popularity.total_cmp(&a.popularity));
    }
    by_date
}
