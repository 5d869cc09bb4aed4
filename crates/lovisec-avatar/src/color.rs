/// 8-bit RGB triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Convert CSS-style `hsl(hue, saturation%, lightness%)` to RGB.
    pub fn from_hsl(hue: u16, saturation: u8, lightness: u8) -> Self {
        let h = f64::from(hue % 360) / 60.0;
        let s = f64::from(saturation.min(100)) / 100.0;
        let l = f64::from(lightness.min(100)) / 100.0;

        let chroma = (1.0 - (2.0 * l - 1.0).abs()) * s;
        let x = chroma * (1.0 - (h % 2.0 - 1.0).abs());
        let (r, g, b) = match h as u8 {
            0 => (chroma, x, 0.0),
            1 => (x, chroma, 0.0),
            2 => (0.0, chroma, x),
            3 => (0.0, x, chroma),
            4 => (x, 0.0, chroma),
            _ => (chroma, 0.0, x),
        };
        let m = l - chroma / 2.0;

        Self(channel(r + m), channel(g + m), channel(b + m))
    }

    pub fn to_array(self) -> [u8; 3] {
        [self.0, self.1, self.2]
    }
}

fn channel(v: f64) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_hues() {
        assert_eq!(Rgb::from_hsl(0, 100, 50), Rgb(255, 0, 0));
        assert_eq!(Rgb::from_hsl(120, 100, 50), Rgb(0, 255, 0));
        assert_eq!(Rgb::from_hsl(240, 100, 50), Rgb(0, 0, 255));
    }

    #[test]
    fn lightness_extremes() {
        assert_eq!(Rgb::from_hsl(200, 70, 0), Rgb(0, 0, 0));
        assert_eq!(Rgb::from_hsl(200, 70, 100), Rgb(255, 255, 255));
    }
}
