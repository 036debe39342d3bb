//! Colour segmentation: BGR frame in, binary mask out.

use opencv::{
    core::{self, Mat, Point, Scalar, Size},
    imgproc,
};

use crate::color::HsvRange;

/// Side of the Gaussian kernel applied before thresholding.
pub const BLUR_KERNEL: i32 = 11;
const MORPH_KERNEL: i32 = 3;
const ERODE_ITERATIONS: i32 = 2;
const DILATE_ITERATIONS: i32 = 5;

/// Produce the binary mask of pixels matching `range`.
///
/// Fixed stage order: convert to HSV, Gaussian blur, inclusive in-range
/// threshold (which also reduces to a single 8-bit channel), erode, dilate.
/// Pure function of its inputs: the same frame and range always produce a
/// bit-identical mask.
pub fn segment(frame: &Mat, range: HsvRange) -> opencv::Result<Mat> {
    let mut hsv = Mat::default();
    imgproc::cvt_color(frame, &mut hsv, imgproc::COLOR_BGR2HSV, 0)?;

    let mut blurred = Mat::default();
    imgproc::gaussian_blur(
        &hsv,
        &mut blurred,
        Size::new(BLUR_KERNEL, BLUR_KERNEL),
        0.0,
        0.0,
        core::BORDER_DEFAULT,
    )?;

    let lower = scalar_from(range.lower);
    let upper = scalar_from(range.upper);
    let mut mask = Mat::default();
    core::in_range(&blurred, &lower, &upper, &mut mask)?;

    let kernel = imgproc::get_structuring_element(
        imgproc::MORPH_RECT,
        Size::new(MORPH_KERNEL, MORPH_KERNEL),
        Point::new(-1, -1),
    )?;
    let border = imgproc::morphology_default_border_value()?;

    let mut eroded = Mat::default();
    imgproc::erode(
        &mask,
        &mut eroded,
        &kernel,
        Point::new(-1, -1),
        ERODE_ITERATIONS,
        core::BORDER_CONSTANT,
        border,
    )?;

    let mut cleaned = Mat::default();
    imgproc::dilate(
        &eroded,
        &mut cleaned,
        &kernel,
        Point::new(-1, -1),
        DILATE_ITERATIONS,
        core::BORDER_CONSTANT,
        border,
    )?;

    Ok(cleaned)
}

fn scalar_from(hsv: [u8; 3]) -> Scalar {
    Scalar::new(hsv[0] as f64, hsv[1] as f64, hsv[2] as f64, 0.0)
}

#[cfg(test)]
mod tests {
    use opencv::prelude::*;

    use super::*;
    use crate::color::ColorClass;

    /// Uniform BGR frame whose every pixel converts to the given HSV value.
    fn uniform_bgr(h: u8, s: u8, v: u8, width: i32, height: i32) -> Mat {
        let hsv = Mat::new_rows_cols_with_default(
            height,
            width,
            core::CV_8UC3,
            Scalar::new(h as f64, s as f64, v as f64, 0.0),
        )
        .unwrap();
        let mut bgr = Mat::default();
        imgproc::cvt_color(&hsv, &mut bgr, imgproc::COLOR_HSV2BGR, 0).unwrap();
        bgr
    }

    fn foreground_pixels(mask: &Mat) -> i32 {
        core::count_non_zero(mask).unwrap()
    }

    #[test]
    fn in_range_frame_is_fully_selected() {
        // comfortably inside the red range so HSV<->BGR rounding cannot
        // push pixels over a bound
        let frame = uniform_bgr(130, 220, 200, 64, 48);
        let mask = segment(&frame, ColorClass::Red.hsv_range()).unwrap();

        assert_eq!(mask.typ(), core::CV_8UC1);
        assert_eq!((mask.cols(), mask.rows()), (64, 48));
        assert_eq!(foreground_pixels(&mask), 64 * 48);
    }

    #[test]
    fn out_of_range_frame_is_fully_rejected() {
        // hue 60 sits far outside red's 120..=140 band
        let frame = uniform_bgr(60, 220, 200, 64, 48);
        let mask = segment(&frame, ColorClass::Red.hsv_range()).unwrap();
        assert_eq!(foreground_pixels(&mask), 0);
    }

    #[test]
    fn segmentation_is_deterministic() {
        let mut hsv = Mat::new_rows_cols_with_default(96, 128, core::CV_8UC3, Scalar::all(0.0))
            .unwrap();
        imgproc::circle(
            &mut hsv,
            Point::new(64, 48),
            18,
            Scalar::new(130.0, 220.0, 200.0, 0.0),
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )
        .unwrap();
        let mut frame = Mat::default();
        imgproc::cvt_color(&hsv, &mut frame, imgproc::COLOR_HSV2BGR, 0).unwrap();

        let first = segment(&frame, ColorClass::Red.hsv_range()).unwrap();
        let second = segment(&frame, ColorClass::Red.hsv_range()).unwrap();

        let mut diff = Mat::default();
        core::absdiff(&first, &second, &mut diff).unwrap();
        assert_eq!(core::count_non_zero(&diff).unwrap(), 0);
    }

    #[test]
    fn range_selection_depends_only_on_the_range() {
        let frame = uniform_bgr(130, 220, 200, 32, 32);
        let as_red = segment(&frame, ColorClass::Red.hsv_range()).unwrap();
        let as_green = segment(&frame, ColorClass::Green.hsv_range()).unwrap();

        assert_eq!(foreground_pixels(&as_red), 32 * 32);
        assert_eq!(foreground_pixels(&as_green), 0);
    }
}
