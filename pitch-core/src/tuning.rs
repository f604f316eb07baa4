//! # Musical Tuning Module
//!
//! Converts between frequencies, MIDI note numbers and note names using
//! twelve-tone equal temperament with A4 = 440 Hz.
//!
//! ## Features
//! - Fractional MIDI number for any frequency
//! - Nearest semitone with cent deviation
//! - Note names with octave ("A4", "C#3")
//! - Note name to MIDI lookups for target notes

use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// Reference pitch of A4 in Hz.
pub const A4_FREQUENCY: f64 = 440.0;

/// MIDI number of A4.
pub const A4_MIDI: f64 = 69.0;

/// Chromatic note names starting at C.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// A frequency placed on the chromatic scale.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteReading {
    /// Fractional MIDI note number.
    pub midi: f64,
    /// Closest whole MIDI note.
    pub nearest_midi: i32,
    /// Offset from the nearest note, roughly in [-50, 50].
    pub cents: f64,
    /// Name of the nearest note with its octave.
    pub note_name: String,
}

/// Lookup table from note names to MIDI numbers, covering MIDI 0 to 127.
///
/// Both sharp and flat spellings are present ("A#4" and "Bb4").
static NOTE_MAP: Lazy<BTreeMap<String, i32>> = Lazy::new(|| {
    const FLAT_NAMES: [&str; 12] = [
        "C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B",
    ];
    let mut map = BTreeMap::new();
    for midi in 0..128i32 {
        let index = midi.rem_euclid(12) as usize;
        let octave = midi.div_euclid(12) - 1;
        map.insert(format!("{}{}", NOTE_NAMES[index], octave), midi);
        map.insert(format!("{}{}", FLAT_NAMES[index], octave), midi);
    }
    map
});

/// Fractional MIDI note number of a frequency: `69 + 12 * log2(f / 440)`.
pub fn midi_from_frequency(frequency: f64) -> f64 {
    A4_MIDI + 12.0 * (frequency / A4_FREQUENCY).log2()
}

/// Frequency in Hz of a (possibly fractional) MIDI note number.
pub fn frequency_from_midi(midi: f64) -> f64 {
    A4_FREQUENCY * 2.0_f64.powf((midi - A4_MIDI) / 12.0)
}

/// Name and octave of a MIDI note, e.g. 69 -> "A4", 61 -> "C#4".
///
/// Octaves follow the convention where MIDI 60 is C4, so MIDI 0 is "C-1".
pub fn note_name_from_midi(midi: i32) -> String {
    let index = midi.rem_euclid(12) as usize;
    let octave = midi.div_euclid(12) - 1;
    format!("{}{}", NOTE_NAMES[index], octave)
}

/// Places a frequency on the chromatic scale.
///
/// Returns `None` for non-positive or non-finite frequencies.
pub fn map_frequency(frequency: f64) -> Option<NoteReading> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return None;
    }
    let midi = midi_from_frequency(frequency);
    if !midi.is_finite() {
        return None;
    }
    let nearest = midi.round();
    Some(NoteReading {
        midi,
        nearest_midi: nearest as i32,
        cents: (midi - nearest) * 100.0,
        note_name: note_name_from_midi(nearest as i32),
    })
}

/// Finds the closest equal-tempered note to a frequency.
///
/// # Returns
/// * `Some((note_name, target_frequency))` - Closest note and its exact frequency
/// * `None` - The frequency is not a positive finite number
pub fn nearest_note(frequency: f64) -> Option<(String, f64)> {
    let reading = map_frequency(frequency)?;
    Some((
        reading.note_name,
        frequency_from_midi(reading.nearest_midi as f64),
    ))
}

/// Looks up the MIDI number of a note name such as "A4", "C#3" or "Bb2".
pub fn midi_from_note_name(name: &str) -> Option<i32> {
    NOTE_MAP.get(name.trim()).copied()
}

/// Deviation of `frequency` from `target` in cents.
///
/// Positive values are sharp, negative values flat.
pub fn cents_between(frequency: f64, target: f64) -> f64 {
    1200.0 * (frequency / target).log2()
}
