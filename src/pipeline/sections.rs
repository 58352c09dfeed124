//! Beat-section planning for the AI-hybrid pipeline.

/// Section boundaries for one image per `beats_per_image` beats.
///
/// Returns `N + 1` non-decreasing timestamps starting at 0; image `k` is held
/// from `boundaries[k]` to `boundaries[k + 1]`. Beats at or past `duration`
/// never open a section. With no beats the whole track is one section.
pub fn build_sections(beats: &[f64], duration: f64, beats_per_image: usize) -> Vec<f64> {
    let stride = beats_per_image.max(1);
    let mut boundaries = vec![0.0];
    boundaries.extend(
        beats
            .iter()
            .copied()
            .skip(stride)
            .step_by(stride)
            .take_while(|&beat| beat < duration),
    );
    if boundaries.last().is_some_and(|&last| last < duration) {
        boundaries.push(duration);
    }
    boundaries
}

/// Display duration of every section, in order.
pub fn section_durations(boundaries: &[f64]) -> Vec<f64> {
    boundaries.windows(2).map(|w| w[1] - w[0]).collect()
}
