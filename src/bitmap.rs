//! Map bitmap unpacking and rendering
//!
//! The robot packs four 2-bit gray levels in every byte, most significant
//! bits first. Levels map to 0/85/170/255 and are then colorized between a
//! floor color and white, with white made fully transparent.

/// Gradient end used for gray level 0
pub const FLOOR_COLOR: [u8; 3] = [0x1C, 0x89, 0xE3];

/// Gradient end used for gray level 255
pub const BACKGROUND_COLOR: [u8; 3] = [0xFF, 0xFF, 0xFF];

/// Gray value step between two consecutive 2-bit levels
const LEVEL_STEP: u8 = 85;

/// Unpack 2-bit samples into 8-bit gray values
pub fn unpack(packed: &[u8]) -> Vec<u8> {
    let mut gray = Vec::with_capacity(packed.len() * 4);
    for byte in packed {
        for shift in [6u8, 4, 2, 0] {
            gray.push(((byte >> shift) & 0b11) * LEVEL_STEP);
        }
    }
    gray
}

/// RGBA color of a gray value on the floor-to-background gradient
pub fn colorize(level: u8) -> [u8; 4] {
    let channel = |from: u8, to: u8| -> u8 {
        let from = i32::from(from);
        let to = i32::from(to);
        let value = from + i32::from(level) * (to - from) / 255;
        value.clamp(0, 255) as u8
    };

    let rgb = [
        channel(FLOOR_COLOR[0], BACKGROUND_COLOR[0]),
        channel(FLOOR_COLOR[1], BACKGROUND_COLOR[1]),
        channel(FLOOR_COLOR[2], BACKGROUND_COLOR[2]),
    ];

    if rgb == [0xFF, 0xFF, 0xFF] {
        [0xFF, 0xFF, 0xFF, 0x00]
    } else {
        [rgb[0], rgb[1], rgb[2], 0xFF]
    }
}

/// Decoded RGBA map image, already scaled for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapImage {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl MapImage {
    /// Colorize a gray bitmap and upscale it by `scale` (nearest neighbor)
    ///
    /// `gray` must hold at least `width * height` samples, extra samples are
    /// ignored.
    pub fn render(gray: &[u8], width: u32, height: u32, scale: u32) -> Self {
        let scale = scale.max(1);
        let out_width = width * scale;
        let out_height = height * scale;
        let mut rgba = Vec::with_capacity(out_width as usize * out_height as usize * 4);

        for y in 0..out_height {
            let src_row = (y / scale) as usize * width as usize;
            for x in 0..out_width {
                let level = gray.get(src_row + (x / scale) as usize).copied().unwrap_or(0xFF);
                rgba.extend_from_slice(&colorize(level));
            }
        }

        Self {
            width: out_width,
            height: out_height,
            rgba,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA bytes, row-major
    pub fn as_rgba(&self) -> &[u8] {
        &self.rgba
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let px = self.rgba.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_and_empty_bytes() {
        assert_eq!(unpack(&[0xFF]), vec![255, 255, 255, 255]);
        assert_eq!(unpack(&[0x00]), vec![0, 0, 0, 0]);
    }

    #[test]
    fn samples_are_msb_first() {
        // 0b00_01_10_11
        assert_eq!(unpack(&[0x1B]), vec![0, 85, 170, 255]);
    }

    #[test]
    fn white_is_transparent() {
        assert_eq!(colorize(255), [0xFF, 0xFF, 0xFF, 0x00]);
        assert_eq!(colorize(0), [0x1C, 0x89, 0xE3, 0xFF]);
        assert_eq!(colorize(170)[3], 0xFF);
    }

    #[test]
    fn render_upscales_nearest_neighbor() {
        let gray = [0, 255, 255, 0];
        let image = MapImage::render(&gray, 2, 2, 4);
        assert_eq!(image.width(), 8);
        assert_eq!(image.height(), 8);
        assert_eq!(image.as_rgba().len(), 8 * 8 * 4);

        assert_eq!(image.pixel(0, 0), Some(colorize(0)));
        assert_eq!(image.pixel(3, 3), Some(colorize(0)));
        assert_eq!(image.pixel(4, 0), Some(colorize(255)));
        assert_eq!(image.pixel(0, 7), Some(colorize(255)));
        assert_eq!(image.pixel(7, 7), Some(colorize(0)));
        assert_eq!(image.pixel(8, 0), None);
    }
}
