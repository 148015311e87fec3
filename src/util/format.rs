const KIB: i64 = 1024;
const MIB: i64 = 1024 * 1024;

/// Format a byte count as `B`, `KB` (one decimal) or `MB` (two decimals).
///
/// Units are picked by comparing the signed value, so any negative count
/// (over-budget remaining space) stays in plain bytes.
///
/// # Examples
///
/// ```
/// use designtimes::util::format_bytes;
///
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.5 KB");
/// assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
/// assert_eq!(format_bytes(-2048), "-2048 B");
/// ```
pub fn format_bytes(bytes: i64) -> String {
    if bytes < KIB {
        format!("{bytes} B")
    } else if bytes < MIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{:.2} MB", bytes as f64 / MIB as f64)
    }
}

/// Canonical subscriber form: trimmed and lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
