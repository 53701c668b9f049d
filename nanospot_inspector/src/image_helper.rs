pub mod image_helper {
    use image::{GrayImage, ImageEncoder};
    use std::path::Path;

    /// Writes a single-channel image as an 8-bit greyscale PNG.
    pub fn save(path: &Path, image: &GrayImage) -> Result<(), image::error::ImageError> {
        let output = std::fs::File::create(path)?;
        let encoder = image::codecs::png::PngEncoder::new(output);

        encoder.write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::L8,
        )?;

        Ok(())
    }

    /// Turns a sample name into something safe to use in a file name.
    pub fn file_stem(sample_name: &str) -> String {
        sample_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect()
    }
}
