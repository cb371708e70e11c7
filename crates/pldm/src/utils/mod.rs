//! Utility functions.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Seed libtorch (when enabled) and return a Rust RNG for the same seed.
pub fn set_seed(seed: u64) -> StdRng {
    #[cfg(feature = "torch")]
    tch::manual_seed(seed as i64);
    StdRng::seed_from_u64(seed)
}

/// Derive an independent stream seed from `seed` and a stream id.
///
/// SplitMix64 finalizer, so neighbouring seeds give unrelated streams.
pub fn mix_seed(seed: u64, stream: u64) -> u64 {
    let mut z = seed ^ stream.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Abbreviate large numbers for display
pub fn abbreviate(num: u64) -> String {
    if num < 1_000 {
        format!("{}", num)
    } else if num < 1_000_000 {
        format!("{:.1}K", num as f64 / 1_000.0)
    } else if num < 1_000_000_000 {
        format!("{:.1}M", num as f64 / 1_000_000.0)
    } else {
        format!("{:.1}B", num as f64 / 1_000_000_000.0)
    }
}

/// Format duration in human-readable form
pub fn format_duration(seconds: f64) -> String {
    if seconds < 0.0 {
        return "0s".to_string();
    }

    let secs = seconds as u64;
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;

    if h > 0 {
        format!("{}h {}m {}s", h, m, s)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}
