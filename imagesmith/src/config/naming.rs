//! Generated names for temporary build resources.

use rand::distributions::Alphanumeric;
use rand::Rng;

const SUFFIX_LEN: usize = 10;

/// Returns a lowercase random alphanumeric suffix.
#[must_use]
pub fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

/// Name for a temporary resource group.
#[must_use]
pub fn temp_resource_group_name() -> String {
    format!("pkr-Resource-Group-{}", random_suffix())
}

/// Name for a temporary build VM.
#[must_use]
pub fn temp_compute_name() -> String {
    format!("pkrvm{}", random_suffix())
}

/// Name of the OS disk belonging to `compute_name`.
#[must_use]
pub fn os_disk_name(compute_name: &str) -> String {
    format!("{compute_name}-osdisk")
}
