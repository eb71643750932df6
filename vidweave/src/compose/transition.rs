//! Transition compositor.
//!
//! Pure, state-free combination of two adjacent clips. Unsupported
//! transitions degrade to plain concatenation rather than erroring.

use tracing::warn;

use crate::compose::clip::Clip;
use crate::domain::Transition;

/// Default transition window in seconds.
pub const DEFAULT_TRANSITION_WINDOW: f64 = 0.5;

/// Combine two adjacent clips according to `transition`.
///
/// Duration laws:
/// - `none` (and every degraded variant): dur(a) + dur(b)
/// - `fade`: dur(a) + dur(b), fades applied inside the existing tail/head
/// - `crossfade`: dur(a) + dur(b) − overlap, where the overlap is the
///   requested window unless that reaches the smaller clip duration, in
///   which case it is half that smaller duration
/// - `slide_left`: dur(a) + window; `b` is visible only while sliding in
///   (literal asymmetric contract)
pub fn apply(a: Clip, b: Clip, transition: Transition, window: f64) -> Clip {
    match transition {
        Transition::None => concat(a, b),
        Transition::Fade => fade(a, b, window),
        Transition::Crossfade => crossfade(a, b, window),
        Transition::SlideLeft => slide_left(a, b, window),
        other => {
            warn!(transition = %other, "transition not composited; degrading to concatenation");
            concat(a, b)
        }
    }
}

fn concat(a: Clip, mut b: Clip) -> Clip {
    let mut combined = a;
    b.shift(combined.duration);
    combined.duration += b.duration;
    combined.segments.extend(b.segments);
    combined
}

fn fade(mut a: Clip, mut b: Clip, window: f64) -> Clip {
    if let Some(last) = a.segments.last_mut() {
        last.fade_out = Some(window.min(last.duration));
    }
    if let Some(first) = b.segments.first_mut() {
        first.fade_in = Some(window.min(first.duration));
    }
    concat(a, b)
}

fn crossfade(mut a: Clip, mut b: Clip, window: f64) -> Clip {
    let smaller = a.duration.min(b.duration);
    let overlap = if window >= smaller {
        smaller * 0.5
    } else {
        window
    };

    if let Some(last) = a.segments.last_mut() {
        last.fade_out = Some(overlap.min(last.duration));
    }
    if let Some(first) = b.segments.first_mut() {
        first.fade_in = Some(overlap.min(first.duration));
    }

    b.shift(a.duration - overlap);
    let duration = a.duration + b.duration - overlap;
    let mut segments = a.segments;
    segments.extend(b.segments);
    Clip { segments, duration }
}

fn slide_left(a: Clip, mut b: Clip, window: f64) -> Clip {
    b.truncate(window);
    if let Some(first) = b.segments.first_mut() {
        first.slide_in = Some(window);
    }
    b.shift(a.duration);
    let duration = a.duration + window;
    let mut segments = a.segments;
    segments.extend(b.segments);
    Clip { segments, duration }
}
