//! Turbo color map (dark blue -> cyan -> green -> yellow -> red).

use image::Rgb;
use std::sync::OnceLock;

// Degree-5 polynomial fit of the Turbo map, one row per channel, lowest order first.
const RED: [f64; 6] = [
    0.13572138,
    4.61539260,
    -42.66032258,
    132.13108234,
    -152.94239396,
    59.28637943,
];
const GREEN: [f64; 6] = [
    0.09140261,
    2.19418839,
    4.84296658,
    -14.18503333,
    4.27729857,
    2.82956604,
];
const BLUE: [f64; 6] = [
    0.10667330,
    12.64194608,
    -60.58204836,
    110.36276771,
    -89.90310912,
    27.34824973,
];

fn channel(coeffs: &[f64; 6], x: f64) -> u8 {
    let v = coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c);
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn table() -> &'static [Rgb<u8>; 256] {
    static TABLE: OnceLock<[Rgb<u8>; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [Rgb([0, 0, 0]); 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let x = i as f64 / 255.0;
            *entry = Rgb([channel(&RED, x), channel(&GREEN, x), channel(&BLUE, x)]);
        }
        table
    })
}

/// Map a byte intensity to an RGB color; 0 is coolest, 255 warmest.
pub fn turbo(value: u8) -> Rgb<u8> {
    table()[value as usize]
}
