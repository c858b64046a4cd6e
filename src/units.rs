const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Base-1024 magnitude string: largest unit that keeps the scaled value
/// under 1024, one decimal place for everything above raw bytes.
pub fn human_bytes(n: u64) -> String {
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Same representation as [`human_bytes`], suffixed "/s".
pub fn human_rate(bytes_per_sec: f64) -> String {
    let mut value = bytes_per_sec.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0} B/s")
    } else {
        format!("{value:.1} {}/s", UNITS[unit])
    }
}

/// Compact rendering for ETA display.
pub fn human_duration(secs: f64) -> String {
    let total = secs.round() as u64;
    if total < 60 {
        format!("{total}s")
    } else if total < 3600 {
        format!("{}m {:02}s", total / 60, total % 60)
    } else {
        format!("{}h {:02}m", total / 3600, (total % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_stay_raw_below_one_kilobyte() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1), "1 B");
        assert_eq!(human_bytes(1023), "1023 B");
    }

    #[test]
    fn bytes_scale_through_the_units() {
        assert_eq!(human_bytes(1024), "1.0 KB");
        assert_eq!(human_bytes(1536), "1.5 KB");
        assert_eq!(human_bytes(1_048_576), "1.0 MB");
        assert_eq!(human_bytes(1u64 << 30), "1.0 GB");
        assert_eq!(human_bytes(1u64 << 40), "1.0 TB");
    }

    #[test]
    fn bytes_saturate_at_the_largest_unit() {
        assert_eq!(human_bytes(1u64 << 50), "1024.0 TB");
    }

    #[test]
    fn rates_match_byte_formatting_with_suffix() {
        assert_eq!(human_rate(0.0), "0 B/s");
        assert_eq!(human_rate(512.0), "512 B/s");
        assert_eq!(human_rate(1536.0), "1.5 KB/s");
        assert_eq!(human_rate(2.5 * 1024.0 * 1024.0), "2.5 MB/s");
    }

    #[test]
    fn negative_rates_clamp_to_zero() {
        assert_eq!(human_rate(-10.0), "0 B/s");
    }

    #[test]
    fn durations_render_compactly() {
        assert_eq!(human_duration(0.2), "0s");
        assert_eq!(human_duration(42.4), "42s");
        assert_eq!(human_duration(90.0), "1m 30s");
        assert_eq!(human_duration(59.6), "1m 00s");
        assert_eq!(human_duration(3725.0), "1h 02m");
    }
}
