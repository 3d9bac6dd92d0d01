use crate::ImageSize;

/// Borrowed 8-bit grayscale frame, row-major, `data.len() == width * height`.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8],
}

impl<'a> GrayImageView<'a> {
    /// `None` if the buffer length does not match the dimensions.
    pub fn new(width: usize, height: usize, data: &'a [u8]) -> Option<Self> {
        (width.checked_mul(height)? == data.len()).then_some(Self {
            width,
            height,
            data,
        })
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.width as u32, self.height as u32)
    }

    // Pixels outside the frame are clamped to the border.
    #[inline]
    fn get(&self, x: i64, y: i64) -> f64 {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[y * self.width + x] as f64
    }

    #[inline]
    pub fn sample_bilinear(&self, x: f64, y: f64) -> f64 {
        if self.width == 0 || self.height == 0 {
            return 0.0;
        }
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let p00 = self.get(x0, y0);
        let p10 = self.get(x0 + 1, y0);
        let p01 = self.get(x0, y0 + 1);
        let p11 = self.get(x0 + 1, y0 + 1);

        let a = p00 + fx * (p10 - p00);
        let b = p01 + fx * (p11 - p01);
        a + fy * (b - a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let data = [0u8, 100, 200, 50];
        let view = GrayImageView::new(2, 2, &data).unwrap();
        assert_eq!(0.0, view.sample_bilinear(0.0, 0.0));
        assert_eq!(50.0, view.sample_bilinear(0.5, 0.0));
        assert_eq!(87.5, view.sample_bilinear(0.5, 0.5));
        assert!(GrayImageView::new(3, 2, &data).is_none());
    }
}
