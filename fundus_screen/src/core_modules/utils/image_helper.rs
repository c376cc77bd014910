// In-memory encoders for raw pixel buffers. Used to build fixtures and to round-trip
// artifacts returned by the classifier without touching the filesystem.

pub mod image_helper {
    use image::codecs::jpeg::JpegEncoder;
    use image::codecs::png::PngEncoder;
    use image::{ExtendedColorType, ImageEncoder, ImageError};

    /// Encodes a raw buffer (row-major, `color` layout) as PNG.
    pub fn encode_png(
        width: u32,
        height: u32,
        buffer: &[u8],
        color: ExtendedColorType,
    ) -> Result<Vec<u8>, ImageError> {
        let mut output = Vec::new();
        PngEncoder::new(&mut output).write_image(buffer, width, height, color)?;
        Ok(output)
    }

    /// Encodes a raw RGB8 or L8 buffer as JPEG at the given quality (1-100).
    pub fn encode_jpeg(
        width: u32,
        height: u32,
        buffer: &[u8],
        color: ExtendedColorType,
        quality: u8,
    ) -> Result<Vec<u8>, ImageError> {
        let mut output = Vec::new();
        JpegEncoder::new_with_quality(&mut output, quality).write_image(buffer, width, height, color)?;
        Ok(output)
    }

    /// A horizontal RGB gradient cycling 0..=255 across each row.
    pub fn gradient_rgb(width: u32, height: u32) -> Vec<u8> {
        let mut buffer = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..height {
            for x in 0..width {
                let intensity = (x % 256) as u8;
                buffer.extend_from_slice(&[intensity, intensity / 2, 255 - intensity]);
            }
        }
        buffer
    }

    /// A single flat RGB color.
    pub fn solid_rgb(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        rgb.iter()
            .copied()
            .cycle()
            .take((width * height * 3) as usize)
            .collect()
    }
}

#[cfg(test)]
mod tests {

    use super::image_helper::*;
    use image::{ColorType, ExtendedColorType};

    #[test]
    fn png_round_trips_dimensions_and_color() {
        let buffer = gradient_rgb(320, 240);
        let bytes = encode_png(320, 240, &buffer, ExtendedColorType::Rgb8).expect("Error encoding PNG.");

        let decoded = image::load_from_memory(&bytes).expect("Error decoding PNG.");
        assert_eq!((decoded.width(), decoded.height()), (320, 240));
        assert_eq!(decoded.color(), ColorType::Rgb8);
        assert_eq!(decoded.to_rgb8().into_raw(), buffer);
    }

    #[test]
    fn grayscale_png_stays_single_channel() {
        let buffer = vec![128u8; 64 * 64];
        let bytes = encode_png(64, 64, &buffer, ExtendedColorType::L8).expect("Error encoding PNG.");
        let decoded = image::load_from_memory(&bytes).expect("Error decoding PNG.");
        assert_eq!(decoded.color(), ColorType::L8);
    }

    #[test]
    fn jpeg_encodes_rgb() {
        let buffer = solid_rgb(200, 200, [200, 40, 10]);
        let bytes = encode_jpeg(200, 200, &buffer, ExtendedColorType::Rgb8, 90).expect("Error encoding JPEG.");
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&bytes).expect("Error decoding JPEG.");
        assert_eq!((decoded.width(), decoded.height()), (200, 200));
    }
}
