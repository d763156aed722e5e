use image::DynamicImage;
use std::io::{self, Write};
use crossterm::{
    terminal::{self, ClearType},
    cursor,
};

const ASCII_RAMP: &[u8] = b" .:-=+*#%@";
const DEFAULT_WIDTH: usize = 80;
const DEFAULT_HEIGHT: usize = 30;

/// Renders preview frames as text for terminals without image support.
pub struct AsciiRenderer {
    width: usize,
    height: usize,
}

impl AsciiRenderer {
    pub fn new(width: Option<usize>, height: Option<usize>) -> Self {
        let (term_width, term_height) = terminal::size()
            .map(|(w, h)| (w as usize, h as usize))
            .unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));

        Self {
            width: width.unwrap_or(term_width.min(DEFAULT_WIDTH)).max(1),
            height: height.unwrap_or(term_height.saturating_sub(3).min(DEFAULT_HEIGHT)).max(1),
        }
    }

    /// Frame as rows joined by `\r\n`, with `banner` centered on the top row.
    pub fn render(&self, image: &DynamicImage, banner: &str) -> String {
        let mut grid = self.image_to_ascii(image);
        self.overlay_text(&mut grid, banner, self.width / 2, 0);
        self.grid_to_string(&grid)
    }

    fn image_to_ascii(&self, image: &DynamicImage) -> Vec<Vec<char>> {
        let mut grid = vec![vec![' '; self.width]; self.height];

        let gray = image.to_luma8();
        let (img_width, img_height) = gray.dimensions();
        if img_width == 0 || img_height == 0 {
            return grid;
        }

        for (term_y, row) in grid.iter_mut().enumerate() {
            for (term_x, cell) in row.iter_mut().enumerate() {
                let img_x = (term_x as f32 / self.width as f32 * img_width as f32) as u32;
                let img_y = (term_y as f32 / self.height as f32 * img_height as f32) as u32;

                let brightness = gray.get_pixel(img_x.min(img_width - 1), img_y.min(img_height - 1))[0];
                let idx = (brightness as usize * (ASCII_RAMP.len() - 1)) / 255;
                *cell = ASCII_RAMP[idx] as char;
            }
        }

        grid
    }

    fn overlay_text(&self, grid: &mut [Vec<char>], text: &str, center_x: usize, y: usize) {
        let Some(row) = grid.get_mut(y) else { return };

        let start_x = center_x.saturating_sub(text.chars().count() / 2);
        for (i, ch) in text.chars().enumerate() {
            if let Some(cell) = row.get_mut(start_x + i) {
                *cell = ch;
            }
        }
    }

    fn grid_to_string(&self, grid: &[Vec<char>]) -> String {
        grid.iter()
            .map(|row| row.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join("\r\n")
    }
}

pub fn clear_screen() -> io::Result<()> {
    crossterm::execute!(
        io::stdout(),
        terminal::Clear(ClearType::All),
        cursor::MoveTo(0, 0)
    )?;
    io::stdout().flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn maps_brightness_to_ramp_ends() {
        let renderer = AsciiRenderer::new(Some(4), Some(2));
        let mut img = GrayImage::new(4, 2);
        for x in 0..4 {
            img.put_pixel(x, 1, Luma([255]));
        }

        let text = renderer.render(&DynamicImage::ImageLuma8(img), "");
        let rows: Vec<&str> = text.split("\r\n").collect();
        assert_eq!(rows, vec!["    ", "@@@@"]);
    }

    #[test]
    fn banner_is_centered_on_top_row() {
        let renderer = AsciiRenderer::new(Some(10), Some(2));
        let text = renderer.render(&DynamicImage::new_luma8(10, 2), "OK");
        let top = text.split("\r\n").next().unwrap();
        assert_eq!(top, "    OK    ");
    }

    #[test]
    fn empty_image_renders_blank() {
        let renderer = AsciiRenderer::new(Some(3), Some(1));
        assert_eq!(renderer.render(&DynamicImage::new_luma8(0, 0), ""), "   ");
    }
}
