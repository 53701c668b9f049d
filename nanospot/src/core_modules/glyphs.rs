//! Minimal 3x5 bitmap font for stamping region ids onto greyscale overlays.

use image::{GrayImage, Luma};

pub const GLYPH_WIDTH: u32 = 3;
pub const GLYPH_HEIGHT: u32 = 5;
/// Horizontal advance per character, glyph plus one column of spacing.
pub const GLYPH_ADVANCE: u32 = GLYPH_WIDTH + 1;

// Row bitmaps, most significant of the three bits is the left column.
const DIGITS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111], // 0
    [0b010, 0b110, 0b010, 0b010, 0b111], // 1
    [0b111, 0b001, 0b111, 0b100, 0b111], // 2
    [0b111, 0b001, 0b111, 0b001, 0b111], // 3
    [0b101, 0b101, 0b111, 0b001, 0b001], // 4
    [0b111, 0b100, 0b111, 0b001, 0b111], // 5
    [0b111, 0b100, 0b111, 0b101, 0b111], // 6
    [0b111, 0b001, 0b010, 0b010, 0b010], // 7
    [0b111, 0b101, 0b111, 0b101, 0b111], // 8
    [0b111, 0b101, 0b111, 0b001, 0b111], // 9
];

fn glyph(c: char) -> [u8; 5] {
    match c.to_digit(10) {
        Some(d) => DIGITS[d as usize],
        None => [0b000, 0b000, 0b010, 0b000, 0b000],
    }
}

/// Pixel width of `text` at `scale`.
pub fn text_width(text: &str, scale: u32) -> u32 {
    let scale = scale.max(1);
    let n = text.chars().count() as u32;
    if n == 0 { 0 } else { n * GLYPH_ADVANCE * scale - scale }
}

/// Draws `text` with its bottom-left corner at `(col, row)`, clipping to the image.
pub fn draw_text(image: &mut GrayImage, text: &str, col: i64, row: i64, value: u8, scale: u32) {
    let scale = scale.max(1) as i64;
    let (width, height) = (image.width() as i64, image.height() as i64);
    let top = row - GLYPH_HEIGHT as i64 * scale + 1;

    let mut cx = col;
    for ch in text.chars() {
        for (gy, bits) in glyph(ch).iter().enumerate() {
            for gx in 0..GLYPH_WIDTH as i64 {
                if (bits >> (GLYPH_WIDTH as i64 - 1 - gx)) & 1 == 0 {
                    continue;
                }
                for sy in 0..scale {
                    for sx in 0..scale {
                        let px = cx + gx * scale + sx;
                        let py = top + gy as i64 * scale + sy;
                        if px >= 0 && px < width && py >= 0 && py < height {
                            image.put_pixel(px as u32, py as u32, Luma([value]));
                        }
                    }
                }
            }
        }
        cx += GLYPH_ADVANCE as i64 * scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_is_drawn_where_expected() {
        let mut img = GrayImage::new(5, 6);
        draw_text(&mut img, "1", 0, 4, 255, 1);
        // Bottom row of "1" is fully set.
        for x in 0..3 {
            assert_eq!(img.get_pixel(x, 4)[0], 255);
        }
        // Top row only has the centre column.
        assert_eq!(img.get_pixel(0, 0)[0], 0);
        assert_eq!(img.get_pixel(1, 0)[0], 255);
        assert_eq!(img.get_pixel(0, 5)[0], 0);
    }

    #[test]
    fn clipping_does_not_panic() {
        let mut img = GrayImage::new(4, 4);
        draw_text(&mut img, "888", -2, 1, 255, 2);
        draw_text(&mut img, "888", 100, 100, 255, 1);
    }

    #[test]
    fn width_accounts_for_spacing() {
        assert_eq!(text_width("001", 1), 11);
        assert_eq!(text_width("001", 2), 22);
        assert_eq!(text_width("", 1), 0);
    }
}
