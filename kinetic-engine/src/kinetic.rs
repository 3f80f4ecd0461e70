//! Shared state of the motion-driven voices plus the 7-note scale helpers.

use kinetic_core::prelude::*;
use kinetic_motion::acc::{BEATS_SCALE_END_ANGLE, BEATS_SCALE_START_ANGLE};

use crate::instrument::ControlInput;

pub const NOTES_NUM: usize = 7;
pub const NOTES_FREQUENCIES: [Frequency; NOTES_NUM] = [110.0, 220.0, 330.0, 440.0, 550.0, 660.0, 770.0];

/// How long a voice fades when it loses focus.
pub const INSTRUMENT_FADE_OUT_DURATION: Time = 1.0;
/// How long the mixer keeps an unfocused voice before dropping it.
pub const INSTRUMENT_STOP_TIMEOUT: Time = 3.0;

/// Focus flag and the latest orientation.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct KineticState {
    focused: bool,
    input: ControlInput,
}

impl KineticState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gain_focus(&mut self) {
        self.focused = true;
    }

    pub fn lose_focus(&mut self) {
        self.focused = false;
    }

    #[inline] pub fn update_input(&mut self, input: &ControlInput) { self.input = *input; }
    #[inline] pub fn input(&self) -> &ControlInput { &self.input }
    #[inline] pub fn is_focused(&self) -> bool { self.focused }
}

pub fn note_from_norm(norm_freq: f64) -> usize {
    ((norm_freq * NOTES_NUM as f64).floor().max(0.0) as usize).min(NOTES_NUM - 1)
}

/// Centre of the note's band.
pub fn norm_from_note(note: usize) -> f64 {
    (note as f64 + 0.5) / NOTES_NUM as f64
}

/// 1 at `norm_pos`, falling linearly to 0 one and a half note widths away.
pub fn note_response(norm_freq: f64, norm_pos: f64, note_size: f64) -> f64 {
    1.0 - ((norm_freq - norm_pos).abs() / (note_size * 1.5)).min(1.0)
}

pub fn norm_from_axis_x_angle(angle: f64) -> f64 {
    clamp01((angle - BEATS_SCALE_START_ANGLE) / (BEATS_SCALE_END_ANGLE - BEATS_SCALE_START_ANGLE))
}

pub fn note_frequency(norm_freq: f64) -> Frequency {
    NOTES_FREQUENCIES[note_from_norm(norm_freq)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn notes_cover_the_unit_range() {
        assert_eq!(note_from_norm(0.0), 0);
        assert_eq!(note_from_norm(0.15), 1);
        assert_eq!(note_from_norm(1.0), 6);
        assert_eq!(note_from_norm(-0.3), 0);
        for n in 0..NOTES_NUM {
            assert_eq!(note_from_norm(norm_from_note(n)), n);
        }
        assert_eq!(note_frequency(0.99), 770.0);
    }

    #[test]
    fn response_peaks_at_the_note() {
        let size = 1.0 / NOTES_NUM as f64;
        assert!(approx_eq!(f64, note_response(0.5, 0.5, size), 1.0));
        assert!(approx_eq!(f64, note_response(0.5 + 0.75 * size, 0.5, size), 0.5, epsilon = 1e-12));
        assert_eq!(note_response(0.0, 1.0, size), 0.0);
    }

    #[test]
    fn tilt_window_maps_to_unit_range() {
        assert_eq!(norm_from_axis_x_angle(-20.0), 0.0);
        assert!(approx_eq!(f64, norm_from_axis_x_angle(50.0), 0.5));
        assert_eq!(norm_from_axis_x_angle(170.0), 1.0);
    }

    #[test]
    fn focus_follows_gain_and_lose() {
        let mut k = KineticState::new();
        assert!(!k.is_focused());
        k.gain_focus();
        assert!(k.is_focused());
        k.update_input(&ControlInput { geo_angle: 30.0, ..ControlInput::default() });
        k.lose_focus();
        assert!(!k.is_focused());
        assert_eq!(k.input().geo_angle, 30.0);
    }
}
