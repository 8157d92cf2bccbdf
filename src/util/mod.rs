mod stats;

pub use stats::Stats;

pub type Rgba = rgb::RGBA<f32>;
pub type Rgb = rgb::RGB<f32>;

/// Componentwise product of two colors.
pub fn modulate(a: Rgb, b: Rgb) -> Rgb {
    Rgb::new(a.r * b.r, a.g * b.g, a.b * b.b)
}

pub fn with_alpha(color: Rgb, alpha: f32) -> Rgba {
    Rgba::new(color.r, color.g, color.b, alpha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;

    #[test]
    fn modulate_componentwise() {
        let result = modulate(Rgb::new(0.5, 1.0, 0.0), Rgb::new(0.5, 0.25, 3.0));
        assert!(result == Rgb::new(0.25, 0.25, 0.0));
    }

    #[test]
    fn with_alpha_keeps_color() {
        let result = with_alpha(Rgb::new(0.1, 0.2, 0.3), 1.0);
        assert!(result == Rgba::new(0.1, 0.2, 0.3, 1.0));
    }
}
