use super::color::blend_palettes;
use super::easing::Easing;
use super::models::{InterpolatedState, Keyframe, KeyframeSettings, VisualStyle};

pub const DEFAULT_TRANSITION_SECS: f64 = 0.5;

/// Sorts by time (stable), keeps the first keyframe of every duplicated
/// timestamp and anchors the timeline at 0.
fn normalize(keyframes: &[Keyframe]) -> Vec<Keyframe> {
    let mut sorted = keyframes.to_vec();
    sorted.sort_by(|a, b| a.time.total_cmp(&b.time));
    sorted.dedup_by(|later, first| later.time == first.time);

    if let Some(first) = sorted.first() {
        if first.time > 0.0 {
            let anchor = Keyframe {
                time: 0.0,
                ..first.clone()
            };
            sorted.insert(0, anchor);
        }
    }
    sorted
}

/// Visual state at `time`, or `None` when there are no keyframes.
pub fn interpolate(
    keyframes: &[Keyframe],
    time: f64,
    easing: Easing,
    transition_duration: f64,
) -> Option<InterpolatedState> {
    let sorted = normalize(keyframes);
    let first = sorted.first()?;
    let last = sorted.last()?;
    let time = if time.is_nan() { 0.0 } else { time };

    if time <= first.time {
        return Some(InterpolatedState::at_keyframe(first));
    }
    if time >= last.time {
        return Some(InterpolatedState::at_keyframe(last));
    }

    // first.time < time < last.time, so both neighbours exist
    let next_index = sorted.partition_point(|k| k.time <= time);
    let prev = &sorted[next_index - 1];
    let next = &sorted[next_index];
    if time == prev.time {
        return Some(InterpolatedState::at_keyframe(prev));
    }

    let span = next.time - prev.time;
    let t = if span > 0.0 {
        (time - prev.time) / span
    } else {
        0.0
    };
    let eased = easing.apply(t);

    let (next_style, style_blend) = if prev.style == next.style {
        (None, 0.0)
    } else {
        (
            Some(next.style),
            crossfade_weight(next.time - time, transition_duration),
        )
    };

    Some(InterpolatedState {
        style: prev.style,
        next_style,
        style_blend,
        particle_count: lerp(
            prev.settings.particle_count as f64,
            next.settings.particle_count as f64,
            eased,
        )
        .round() as u32,
        color_palette: blend_palettes(
            &prev.settings.color_palette,
            &next.settings.color_palette,
            eased,
        ),
        intensity: lerp(prev.settings.intensity, next.settings.intensity, eased),
    })
}

/// 0 until the next keyframe is `transition_duration` away, then a linear
/// ramp reaching 1 at the keyframe.
fn crossfade_weight(time_to_next: f64, transition_duration: f64) -> f64 {
    if transition_duration <= 0.0 || time_to_next > transition_duration {
        return 0.0;
    }
    (1.0 - time_to_next / transition_duration).clamp(0.0, 1.0)
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Index (in time order) of the latest keyframe at or before `time`.
pub fn active_keyframe_index(keyframes: &[Keyframe], time: f64) -> Option<usize> {
    let mut times: Vec<f64> = keyframes.iter().map(|k| k.time).collect();
    times.sort_by(|a, b| a.total_cmp(b));
    times.partition_point(|&t| t <= time).checked_sub(1)
}

/// Snaps `time` to the nearest beat when it is within `threshold` seconds.
/// Equidistant beats resolve to the one listed first.
pub fn snap_to_beat(time: f64, beats: &[f64], threshold: f64) -> f64 {
    let mut nearest: Option<(f64, f64)> = None;
    for &beat in beats {
        let distance = (time - beat).abs();
        match nearest {
            Some((_, best)) if distance >= best => {}
            _ => nearest = Some((beat, distance)),
        }
    }
    match nearest {
        Some((beat, distance)) if distance <= threshold => beat,
        _ => time,
    }
}

/// One keyframe per beat, cycling through `styles`.
pub fn generate_beat_keyframes(
    beats: &[f64],
    styles: &[VisualStyle],
    base_settings: &KeyframeSettings,
) -> Vec<Keyframe> {
    if styles.is_empty() {
        return Vec::new();
    }
    beats
        .iter()
        .enumerate()
        .map(|(i, &beat)| Keyframe::new(beat, styles[i % styles.len()], base_settings.clone()))
        .collect()
}
