//! Hex color parsing and RGB-space blending.

/// Parses `#rrggbb` (the `#` is optional). Anything else reads as black.
pub fn parse_hex(color: &str) -> [u8; 3] {
    let digits = color.strip_prefix('#').unwrap_or(color);
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return [0, 0, 0];
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&digits[range], 16).unwrap_or(0);
    [channel(0..2), channel(2..4), channel(4..6)]
}

pub fn to_hex(rgb: [f64; 3]) -> String {
    let [r, g, b] = rgb.map(|c| c.round().clamp(0.0, 255.0) as u8);
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

pub fn blend(from: &str, to: &str, t: f64) -> String {
    let a = parse_hex(from);
    let b = parse_hex(to);
    let mut mixed = [0.0; 3];
    for i in 0..3 {
        mixed[i] = a[i] as f64 + (b[i] as f64 - a[i] as f64) * t;
    }
    to_hex(mixed)
}

/// Blends two palettes index-wise. The result has the length of the longer
/// palette; the shorter one wraps around instead of being truncated.
pub fn blend_palettes(from: &[String], to: &[String], t: f64) -> Vec<String> {
    match (from.is_empty(), to.is_empty()) {
        (true, true) => return Vec::new(),
        (true, false) => return to.to_vec(),
        (false, true) => return from.to_vec(),
        _ => {}
    }
    let len = from.len().max(to.len());
    (0..len)
        .map(|i| blend(&from[i % from.len()], &to[i % to.len()], t))
        .collect()
}
