//! Grayscale crop extraction and the 3x3 operators behind the quality metrics.
//!
//! Borders are handled by reflecting about the edge pixel (`dcba|bcd`), so a
//! flat image produces exactly zero response everywhere.

use crate::types::BoundingBox;
use image::GrayImage;

/// A grayscale region copied out of a larger image.
#[derive(Debug, Clone)]
pub struct Crop {
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
}

impl Crop {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    fn at(&self, x: isize, y: isize) -> f32 {
        let x = reflect(x, self.width);
        let y = reflect(y, self.height);
        self.data[y * self.width + x]
    }
}

/// Copy the pixels covered by `bbox`, clipped to the image bounds.
///
/// Coordinates are truncated toward zero. A box entirely outside the image
/// yields an empty crop.
pub fn crop(image: &GrayImage, bbox: &BoundingBox) -> Crop {
    let (img_w, img_h) = (image.width() as i64, image.height() as i64);
    let x1 = (bbox.x as i64).clamp(0, img_w);
    let y1 = (bbox.y as i64).clamp(0, img_h);
    let x2 = ((bbox.x + bbox.width) as i64).clamp(0, img_w);
    let y2 = ((bbox.y + bbox.height) as i64).clamp(0, img_h);

    if x2 <= x1 || y2 <= y1 {
        return Crop { data: Vec::new(), width: 0, height: 0 };
    }

    let width = (x2 - x1) as usize;
    let height = (y2 - y1) as usize;
    let mut data = Vec::with_capacity(width * height);
    for y in y1..y2 {
        for x in x1..x2 {
            data.push(image.get_pixel(x as u32, y as u32).0[0] as f32);
        }
    }
    Crop { data, width, height }
}

/// Reflect-101 border: index -1 maps to 1, index n maps to n-2.
fn reflect(i: isize, n: usize) -> usize {
    let n = n as isize;
    if n == 1 {
        return 0;
    }
    let mut i = i;
    while i < 0 || i >= n {
        if i < 0 {
            i = -i;
        }
        if i >= n {
            i = 2 * (n - 1) - i;
        }
    }
    i as usize
}

pub fn mean(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().map(|&v| v as f64).sum::<f64>() as f32 / values.len() as f32)
}

/// Population standard deviation.
pub fn std_dev(values: &[f32]) -> Option<f32> {
    variance(values).map(f32::sqrt)
}

/// Population variance.
pub fn variance(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let m = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = values.iter().map(|&v| (v as f64 - m).powi(2)).sum::<f64>() / n;
    Some(var as f32)
}

/// 4-neighbour Laplacian response for every pixel.
pub fn laplacian(crop: &Crop) -> Vec<f32> {
    let mut out = Vec::with_capacity(crop.data.len());
    for y in 0..crop.height as isize {
        for x in 0..crop.width as isize {
            let v = crop.at(x - 1, y) + crop.at(x + 1, y) + crop.at(x, y - 1) + crop.at(x, y + 1)
                - 4.0 * crop.at(x, y);
            out.push(v);
        }
    }
    out
}

/// Sobel gradient magnitude for every pixel.
pub fn sobel_magnitude(crop: &Crop) -> Vec<f32> {
    let mut out = Vec::with_capacity(crop.data.len());
    for y in 0..crop.height as isize {
        for x in 0..crop.width as isize {
            let gx = (crop.at(x + 1, y - 1) + 2.0 * crop.at(x + 1, y) + crop.at(x + 1, y + 1))
                - (crop.at(x - 1, y - 1) + 2.0 * crop.at(x - 1, y) + crop.at(x - 1, y + 1));
            let gy = (crop.at(x - 1, y + 1) + 2.0 * crop.at(x, y + 1) + crop.at(x + 1, y + 1))
                - (crop.at(x - 1, y - 1) + 2.0 * crop.at(x, y - 1) + crop.at(x + 1, y - 1));
            out.push((gx * gx + gy * gy).sqrt());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn flat(w: u32, h: u32, v: u8) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([v]))
    }

    #[test]
    fn test_reflect_101() {
        assert_eq!(reflect(-1, 5), 1);
        assert_eq!(reflect(5, 5), 3);
        assert_eq!(reflect(2, 5), 2);
        assert_eq!(reflect(-3, 1), 0);
    }

    #[test]
    fn test_crop_clipped_to_bounds() {
        let img = flat(10, 10, 7);
        let c = crop(&img, &BoundingBox::new(8.0, 8.0, 5.0, 5.0));
        assert_eq!((c.width, c.height), (2, 2));
        assert!(c.data.iter().all(|&v| v == 7.0));
    }

    #[test]
    fn test_crop_outside_is_empty() {
        let img = flat(10, 10, 7);
        assert!(crop(&img, &BoundingBox::new(20.0, 20.0, 5.0, 5.0)).is_empty());
        assert!(crop(&img, &BoundingBox::new(2.0, 2.0, 0.0, 5.0)).is_empty());
    }

    #[test]
    fn test_flat_image_has_no_response() {
        let c = crop(&flat(6, 5, 90), &BoundingBox::new(0.0, 0.0, 6.0, 5.0));
        assert!(laplacian(&c).iter().all(|&v| v == 0.0));
        assert!(sobel_magnitude(&c).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_vertical_edge_sobel() {
        let mut img = flat(4, 3, 0);
        for y in 0..3 {
            for x in 2..4 {
                img.put_pixel(x, y, Luma([100]));
            }
        }
        let c = crop(&img, &BoundingBox::new(0.0, 0.0, 4.0, 3.0));
        let mag = sobel_magnitude(&c);
        // Pixel (1, 1) sits left of the step: gx = 4 * 100.
        assert!((mag[4 + 1] - 400.0).abs() < 1e-4);
    }

    #[test]
    fn test_stats() {
        assert!(mean(&[]).is_none());
        assert_eq!(mean(&[1.0, 3.0]), Some(2.0));
        assert_eq!(variance(&[1.0, 3.0]), Some(1.0));
        assert_eq!(std_dev(&[2.0, 2.0, 2.0]), Some(0.0));
    }
}
