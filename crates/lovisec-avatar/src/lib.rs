//! Deterministic pixel avatars.
//!
//! A seed string is hashed into a hue and a 5×5 cell pattern whose bottom two
//! rows mirror the top two. The pattern is rendered as a blocky PNG, so the
//! same seed and size always produce the same bytes.

pub mod color;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use thiserror::Error;

use crate::color::Rgb;

pub const GRID_SIZE: usize = 5;
pub const DEFAULT_SIZE: u32 = 80;
pub const MAX_SIZE: u32 = 4096;

#[derive(Debug, Error)]
pub enum AvatarError {
    #[error("avatar size must be greater than zero")]
    ZeroSize,

    #[error("avatar size {0} exceeds the 4096px limit")]
    TooLarge(u32),

    #[error("PNG encoding failed: {0}")]
    Encode(#[from] png::EncodingError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Empty,
    Base,
    Dark,
    Light,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub background: Rgb,
    pub base: Rgb,
    pub dark: Rgb,
    pub light: Rgb,
}

impl Palette {
    pub fn from_hue(hue: u16) -> Self {
        Self {
            background: Rgb::from_hsl(hue, 40, 90),
            base: Rgb::from_hsl(hue, 70, 50),
            dark: Rgb::from_hsl(hue, 70, 35),
            light: Rgb::from_hsl(hue, 70, 65),
        }
    }

    fn color(&self, cell: Cell) -> Rgb {
        match cell {
            Cell::Empty => self.background,
            Cell::Base => self.base,
            Cell::Dark => self.dark,
            Cell::Light => self.light,
        }
    }
}

/// Layout and colours derived from one seed, independent of output size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Avatar {
    hue: u16,
    grid: [[Cell; GRID_SIZE]; GRID_SIZE],
}

impl Avatar {
    pub fn from_seed(seed: &str) -> Self {
        let hash = seed_hash(seed);
        let hue = (hash.unsigned_abs() % 360) as u16;
        // Shifts only ever see the low 32 bits.
        let bits = hash as i32;

        let mut grid = [[Cell::Empty; GRID_SIZE]; GRID_SIZE];
        for (i, row) in grid.iter_mut().take(3).enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                let value = ((bits >> (i * GRID_SIZE + j)) % 3).abs();
                *cell = match value {
                    0 => Cell::Empty,
                    1 => Cell::Base,
                    2 => Cell::Dark,
                    _ => Cell::Light,
                };
            }
        }
        grid[3] = grid[1];
        grid[4] = grid[0];

        Self { hue, grid }
    }

    pub fn hue(&self) -> u16 {
        self.hue
    }

    pub fn palette(&self) -> Palette {
        Palette::from_hue(self.hue)
    }

    pub fn cell(&self, row: usize, col: usize) -> Cell {
        self.grid[row][col]
    }

    /// Row-major RGB pixels for a `size × size` image, nearest-neighbour scaled.
    pub fn render_rgb(&self, size: u32) -> Result<Vec<u8>, AvatarError> {
        check_size(size)?;

        let palette = self.palette();
        let size = size as usize;
        let mut pixels = Vec::with_capacity(size * size * 3);

        for y in 0..size {
            let row = (y * GRID_SIZE / size).min(GRID_SIZE - 1);
            for x in 0..size {
                let col = (x * GRID_SIZE / size).min(GRID_SIZE - 1);
                pixels.extend_from_slice(&palette.color(self.grid[row][col]).to_array());
            }
        }

        Ok(pixels)
    }

    pub fn to_png(&self, size: u32) -> Result<Vec<u8>, AvatarError> {
        let pixels = self.render_rgb(size)?;

        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, size, size);
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&pixels)?;
            writer.finish()?;
        }

        Ok(out)
    }

    pub fn to_data_url(&self, size: u32) -> Result<String, AvatarError> {
        let png = self.to_png(size)?;
        Ok(format!("data:image/png;base64,{}", BASE64.encode(png)))
    }
}

/// Render the avatar for `seed` as an embeddable `data:` URL.
pub fn generate(seed: &str, size: u32) -> Result<String, AvatarError> {
    Avatar::from_seed(seed).to_data_url(size)
}

/// Render the avatar for `seed` as raw PNG bytes.
pub fn generate_png(seed: &str, size: u32) -> Result<Vec<u8>, AvatarError> {
    Avatar::from_seed(seed).to_png(size)
}

/// Rolling `hash * 31 + code` over UTF-16 code units.
///
/// The accumulator is kept unwrapped between steps and only the shifted term
/// is truncated to 32 bits, so avatars match the ones the web client draws.
pub fn seed_hash(seed: &str) -> i64 {
    seed.encode_utf16().fold(0i64, |acc, unit| {
        let shifted = i64::from((acc as i32).wrapping_shl(5));
        i64::from(unit).wrapping_add(shifted.wrapping_sub(acc))
    })
}

fn check_size(size: u32) -> Result<(), AvatarError> {
    match size {
        0 => Err(AvatarError::ZeroSize),
        s if s > MAX_SIZE => Err(AvatarError::TooLarge(s)),
        _ => Ok(()),
    }
}
