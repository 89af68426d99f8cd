//! Utility functions.

/// Abbreviate large counts for display (`1.5K`, `2.0M`).
pub fn abbreviate(num: u64) -> String {
    const UNITS: [(u64, &str); 3] = [(1_000_000_000, "B"), (1_000_000, "M"), (1_000, "K")];
    UNITS
        .iter()
        .find(|(scale, _)| num >= *scale)
        .map(|(scale, unit)| format!("{:.1}{}", num as f64 / *scale as f64, unit))
        .unwrap_or_else(|| num.to_string())
}

/// Format a duration in seconds as `1h 2m 3s`.
pub fn format_duration(seconds: f64) -> String {
    let secs = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{}s", s),
        (0, _) => format!("{}m {}s", m, s),
        _ => format!("{}h {}m {}s", h, m, s),
    }
}

/// Trailing moving average; the first `window - 1` entries average what is
/// available so far.
pub fn moving_average(values: &[f32], window: usize) -> Vec<f32> {
    let window = window.max(1);
    let mut sum = 0.0f32;
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            sum += v;
            if i >= window {
                sum -= values[i - window];
            }
            sum / (i + 1).min(window) as f32
        })
        .collect()
}
