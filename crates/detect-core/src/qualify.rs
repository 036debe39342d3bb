//! Shape qualification over a segmented mask.

use opencv::{
    core::{Mat, Point, Point2f, Vector},
    imgproc,
};

/// Minimum enclosing-circle radius, in pixels, for a contour to count as an
/// object rather than noise.
pub const MIN_QUALIFYING_RADIUS: f32 = 10.0;

/// A region that passed qualification. Valid only for the frame it came from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualifyingRegion {
    /// Centre of the minimum enclosing circle, in pixel coordinates.
    pub center: (f32, f32),
    /// Radius of the minimum enclosing circle, in pixels.
    pub radius: f32,
}

/// Find the first qualifying object in a binary mask, if any.
///
/// Extracts external contours only (holes and nested shapes are ignored)
/// and applies the first-match policy of [`first_qualifying`].
pub fn qualify(mask: &Mat) -> opencv::Result<Option<QualifyingRegion>> {
    let mut contours: Vector<Vector<Point>> = Vector::new();
    imgproc::find_contours(
        mask,
        &mut contours,
        imgproc::RETR_EXTERNAL,
        imgproc::CHAIN_APPROX_SIMPLE,
        Point::new(0, 0),
    )?;
    first_qualifying(&contours)
}

/// First contour, in the given order, whose minimum enclosing circle exceeds
/// [`MIN_QUALIFYING_RADIUS`].
///
/// The scan stops at the first hit; later contours are never inspected, even
/// if larger. One frame therefore yields at most one region.
pub fn first_qualifying(
    contours: &Vector<Vector<Point>>,
) -> opencv::Result<Option<QualifyingRegion>> {
    for contour in contours.iter() {
        let mut center = Point2f::new(0.0, 0.0);
        let mut radius = 0.0f32;
        imgproc::min_enclosing_circle(&contour, &mut center, &mut radius)?;
        if radius > MIN_QUALIFYING_RADIUS {
            return Ok(Some(QualifyingRegion {
                center: (center.x, center.y),
                radius,
            }));
        }
    }
    Ok(None)
}
