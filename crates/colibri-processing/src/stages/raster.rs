//! Triangle rasterization on the CPU.

use colibri_core::{UVec2, Vec2, Vec3};

const INSIDE_EPSILON: f32 = -1e-5;

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b - a).perp_dot(p - a)
}

/// Maps normalized coordinates (v up) to continuous pixel coordinates (y down).
pub(super) fn uv_to_pixel(uv: Vec2, size: UVec2) -> Vec2 {
    Vec2::new(uv.x * size.x as f32, (1.0 - uv.y) * size.y as f32)
}

/// Calls `visit(x, y, barycentric)` for every pixel of an image of `size`
/// whose center lies inside the triangle.
pub(super) fn rasterize_triangle(
    points: [Vec2; 3],
    size: UVec2,
    mut visit: impl FnMut(u32, u32, Vec3),
) {
    let [a, b, c] = points;
    let area = edge(a, b, c);
    if area.abs() < 1e-12 || size.x == 0 || size.y == 0 {
        return;
    }
    let min = a.min(b).min(c);
    let max = a.max(b).max(c);
    let x0 = (min.x - 0.5).ceil().max(0.0);
    let y0 = (min.y - 0.5).ceil().max(0.0);
    let x1 = (max.x - 0.5).floor().min((size.x - 1) as f32);
    let y1 = (max.y - 0.5).floor().min((size.y - 1) as f32);
    if x1 < x0 || y1 < y0 {
        return;
    }
    for y in y0 as u32..=y1 as u32 {
        for x in x0 as u32..=x1 as u32 {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let wa = edge(b, c, p) / area;
            let wb = edge(c, a, p) / area;
            let wc = 1.0 - wa - wb;
            if wa >= INSIDE_EPSILON && wb >= INSIDE_EPSILON && wc >= INSIDE_EPSILON {
                visit(x, y, Vec3::new(wa, wb, wc));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_full_coverage_of_square() {
        let size = UVec2::new(4, 4);
        let mut hits = vec![0u32; 16];
        let corners = [
            Vec2::new(0.0, 0.0),
            Vec2::new(4.0, 0.0),
            Vec2::new(4.0, 4.0),
            Vec2::new(0.0, 4.0),
        ];
        for tri in [[corners[0], corners[1], corners[2]], [corners[0], corners[2], corners[3]]] {
            rasterize_triangle(tri, size, |x, y, w| {
                assert!((w.x + w.y + w.z - 1.0).abs() < 1e-5);
                hits[(y * 4 + x) as usize] += 1;
            });
        }
        // Pixels on the shared diagonal are visited by both triangles.
        assert!(hits.iter().all(|&h| h >= 1));
    }

    #[test]
    fn test_barycentric_interpolates_corners() {
        let tri = [Vec2::new(0.0, 0.0), Vec2::new(8.0, 0.0), Vec2::new(0.0, 8.0)];
        let mut found = false;
        rasterize_triangle(tri, UVec2::new(8, 8), |x, y, w| {
            let p = tri[0] * w.x + tri[1] * w.y + tri[2] * w.z;
            assert!((p - Vec2::new(x as f32 + 0.5, y as f32 + 0.5)).length() < 1e-4);
            found = true;
        });
        assert!(found);
    }

    #[test]
    fn test_offscreen_and_degenerate() {
        let mut count = 0;
        let off = [Vec2::new(-5.0, -5.0), Vec2::new(-1.0, -5.0), Vec2::new(-1.0, -1.0)];
        rasterize_triangle(off, UVec2::new(4, 4), |_, _, _| count += 1);
        let flat = [Vec2::ZERO, Vec2::new(1.0, 1.0), Vec2::new(2.0, 2.0)];
        rasterize_triangle(flat, UVec2::new(4, 4), |_, _, _| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_uv_to_pixel() {
        let p = uv_to_pixel(Vec2::new(0.25, 1.0), UVec2::new(8, 4));
        assert!((p - Vec2::new(2.0, 0.0)).length() < 1e-6);
    }

    proptest! {
        #[test]
        fn prop_visited_pixels_lie_inside(
            ax in 0.0f32..16.0, ay in 0.0f32..16.0,
            bx in 0.0f32..16.0, by in 0.0f32..16.0,
            cx in 0.0f32..16.0, cy in 0.0f32..16.0,
        ) {
            let tri = [Vec2::new(ax, ay), Vec2::new(bx, by), Vec2::new(cx, cy)];
            let mut visits = Vec::new();
            rasterize_triangle(tri, UVec2::new(16, 16), |x, y, w| visits.push((x, y, w)));
            for (x, y, w) in visits {
                prop_assert!(x < 16 && y < 16);
                prop_assert!(w.min_element() >= INSIDE_EPSILON);
                prop_assert!((w.element_sum() - 1.0).abs() < 1e-4);
            }
        }
    }
}
