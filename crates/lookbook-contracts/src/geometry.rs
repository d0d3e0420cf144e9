use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Item location as reported by the model.
///
/// Values are either fractions of the image dimensions or absolute pixels;
/// [`BoxUnits`] says which, or lets [`BoundingBox::to_pixel_rect`] guess.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoxUnits {
    /// Fractional when both `width <= 1` and `height <= 1`, pixels otherwise.
    #[default]
    Auto,
    Normalized,
    Pixel,
}

impl BoxUnits {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoxUnits::Auto => "auto",
            BoxUnits::Normalized => "normalized",
            BoxUnits::Pixel => "pixel",
        }
    }
}

impl fmt::Display for BoxUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BoxUnits {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BoxUnits::Auto),
            "normalized" | "fraction" => Ok(BoxUnits::Normalized),
            "pixel" | "pixels" | "px" => Ok(BoxUnits::Pixel),
            other => Err(format!(
                "unknown box units '{other}' (expected auto, normalized or pixel)"
            )),
        }
    }
}

/// In-bounds crop rectangle, at least 1x1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn right(&self) -> u32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.top + self.height
    }

    pub fn as_bounding_box(&self) -> BoundingBox {
        BoundingBox {
            x: f64::from(self.left),
            y: f64::from(self.top),
            width: f64::from(self.width),
            height: f64::from(self.height),
        }
    }
}

impl BoundingBox {
    pub fn looks_normalized(&self) -> bool {
        self.width <= 1.0 && self.height <= 1.0
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    /// Convert to a pixel rectangle clamped to an `image_width` x
    /// `image_height` image.
    ///
    /// Returns `None` for non-finite coordinates or an empty image; every
    /// other input, however far out of range, yields a valid crop region.
    pub fn to_pixel_rect(
        &self,
        image_width: u32,
        image_height: u32,
        units: BoxUnits,
    ) -> Option<PixelRect> {
        if image_width == 0 || image_height == 0 || !self.is_finite() {
            return None;
        }

        let normalized = match units {
            BoxUnits::Auto => self.looks_normalized(),
            BoxUnits::Normalized => true,
            BoxUnits::Pixel => false,
        };
        let (x, y, width, height) = if normalized {
            let w = f64::from(image_width);
            let h = f64::from(image_height);
            (
                (self.x * w).round(),
                (self.y * h).round(),
                (self.width * w).round(),
                (self.height * h).round(),
            )
        } else {
            (
                self.x.round(),
                self.y.round(),
                self.width.round(),
                self.height.round(),
            )
        };

        let left = clamp_to_u32(x, 0, image_width - 1);
        let top = clamp_to_u32(y, 0, image_height - 1);
        let max_width = image_width - left;
        let max_height = image_height - top;

        Some(PixelRect {
            left,
            top,
            width: clamp_to_u32(width, 1, max_width),
            height: clamp_to_u32(height, 1, max_height),
        })
    }
}

// `value` is finite here; the float-to-int cast saturates, the clamp bounds it.
fn clamp_to_u32(value: f64, min: u32, max: u32) -> u32 {
    value.clamp(f64::from(min), f64::from(max)) as u32
}

#[cfg(test)]
mod tests {
    use super::{BoundingBox, BoxUnits, PixelRect};

    #[test]
    fn box_units_parse_from_flag_values() {
        assert_eq!("auto".parse::<BoxUnits>(), Ok(BoxUnits::Auto));
        assert_eq!(" Normalized ".parse::<BoxUnits>(), Ok(BoxUnits::Normalized));
        assert_eq!("px".parse::<BoxUnits>(), Ok(BoxUnits::Pixel));
        assert!("percent".parse::<BoxUnits>().is_err());
        assert_eq!(BoxUnits::Pixel.to_string(), "pixel");
    }

    fn bbox(x: f64, y: f64, width: f64, height: f64) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width,
            height,
        }
    }

    fn assert_in_bounds(rect: PixelRect, image_width: u32, image_height: u32) {
        assert!(rect.left <= image_width - 1, "{rect:?}");
        assert!(rect.top <= image_height - 1, "{rect:?}");
        assert!(rect.width >= 1 && rect.height >= 1, "{rect:?}");
        assert!(rect.right() <= image_width, "{rect:?}");
        assert!(rect.bottom() <= image_height, "{rect:?}");
    }

    #[test]
    fn fractional_box_scales_to_image_dimensions() {
        let rect = bbox(0.1, 0.2, 0.5, 0.9)
            .to_pixel_rect(1000, 800, BoxUnits::Auto)
            .unwrap();
        assert_eq!(
            rect,
            PixelRect {
                left: 100,
                top: 160,
                width: 500,
                height: 640,
            }
        );
    }

    #[test]
    fn box_overflowing_the_corner_is_clamped() {
        let rect = bbox(0.9, 0.9, 0.5, 0.5)
            .to_pixel_rect(500, 500, BoxUnits::Auto)
            .unwrap();
        assert_eq!(
            rect,
            PixelRect {
                left: 450,
                top: 450,
                width: 50,
                height: 50,
            }
        );
    }

    #[test]
    fn large_values_are_taken_as_pixels() {
        let rect = bbox(120.4, 80.6, 300.0, 200.0)
            .to_pixel_rect(640, 480, BoxUnits::Auto)
            .unwrap();
        assert_eq!(
            rect,
            PixelRect {
                left: 120,
                top: 81,
                width: 300,
                height: 200,
            }
        );
    }

    #[test]
    fn only_one_small_side_is_not_fractional() {
        let rect = bbox(10.0, 10.0, 0.5, 40.0)
            .to_pixel_rect(100, 100, BoxUnits::Auto)
            .unwrap();
        assert_eq!(rect.left, 10);
        assert_eq!(rect.width, 1);
        assert_eq!(rect.height, 40);
    }

    #[test]
    fn adversarial_boxes_always_produce_valid_crops() {
        let cases = [
            bbox(-5.0, -5.0, 0.2, 0.2),
            bbox(-0.5, 2.0, 0.0, 0.0),
            bbox(1.5, 1.5, 1.0, 1.0),
            bbox(5000.0, 5000.0, 5000.0, 5000.0),
            bbox(-1e300, 1e300, -1e300, 1e300),
            bbox(0.0, 0.0, -10.0, -10.0),
            bbox(f64::MAX, f64::MIN, f64::MAX, f64::MAX),
            bbox(0.999, 0.999, 0.001, 0.001),
        ];
        for (image_width, image_height) in [(1, 1), (2, 3), (500, 500), (1920, 1080)] {
            for case in cases {
                let rect = case
                    .to_pixel_rect(image_width, image_height, BoxUnits::Auto)
                    .unwrap();
                assert_in_bounds(rect, image_width, image_height);
            }
        }
    }

    #[test]
    fn non_finite_boxes_and_empty_images_are_rejected() {
        assert!(bbox(f64::NAN, 0.0, 0.5, 0.5)
            .to_pixel_rect(100, 100, BoxUnits::Auto)
            .is_none());
        assert!(bbox(0.0, 0.0, f64::INFINITY, 0.5)
            .to_pixel_rect(100, 100, BoxUnits::Auto)
            .is_none());
        assert!(bbox(0.1, 0.1, 0.5, 0.5)
            .to_pixel_rect(0, 100, BoxUnits::Auto)
            .is_none());
    }

    #[test]
    fn clamped_pixel_boxes_are_fixed_points() {
        let image = (640, 480);
        let boxes = [
            bbox(0.1, 0.1, 0.3, 0.3),
            bbox(600.0, 10.0, 400.0, 12.0),
            bbox(-20.0, 470.0, 50.0, 50.0),
            bbox(0.0, 0.0, 640.0, 480.0),
        ];
        for original in boxes {
            let once = original
                .to_pixel_rect(image.0, image.1, BoxUnits::Auto)
                .unwrap();
            let twice = once
                .as_bounding_box()
                .to_pixel_rect(image.0, image.1, BoxUnits::Auto)
                .unwrap();
            assert_eq!(once, twice, "from {original:?}");
        }
    }

    #[test]
    fn explicit_units_bypass_the_heuristic() {
        let one_pixel = bbox(10.0, 20.0, 1.0, 1.0);
        let auto = one_pixel
            .to_pixel_rect(100, 100, BoxUnits::Auto)
            .unwrap();
        let pixel = one_pixel
            .to_pixel_rect(100, 100, BoxUnits::Pixel)
            .unwrap();
        assert_eq!(auto.left, 99);
        assert_eq!(
            pixel,
            PixelRect {
                left: 10,
                top: 20,
                width: 1,
                height: 1,
            }
        );

        let forced = bbox(0.5, 0.5, 2.0, 2.0)
            .to_pixel_rect(10, 10, BoxUnits::Normalized)
            .unwrap();
        assert_eq!(
            forced,
            PixelRect {
                left: 5,
                top: 5,
                width: 5,
                height: 5,
            }
        );
    }
}
