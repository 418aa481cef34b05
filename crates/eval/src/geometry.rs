//! Shape containment and coordinate checks for `inside` and AreaMapping.
//!
//! Coordinates follow the HTML image-map conventions: `rect` is
//! left, top, right, bottom; `circle` is x, y, r; `ellipse` is x, y, hr, vr;
//! `poly` is a list of x, y vertices.

use crate::types::Shape;

impl Shape {
    /// Whether the point lies inside (or on the edge of) the shape.
    /// Malformed coordinate lists contain nothing.
    pub fn contains(&self, coords: &[i64], x: i64, y: i64) -> bool {
        let (px, py) = (x as f64, y as f64);
        match (self, coords) {
            (Shape::Default, _) => true,
            (Shape::Rect, [left, top, right, bottom]) => {
                x >= *left && x <= *right && y >= *top && y <= *bottom
            }
            (Shape::Circle, [cx, cy, r]) => {
                let dx = px - *cx as f64;
                let dy = py - *cy as f64;
                dx * dx + dy * dy <= (*r as f64) * (*r as f64)
            }
            (Shape::Ellipse, [cx, cy, hr, vr]) => {
                if *hr == 0 || *vr == 0 {
                    return false;
                }
                let dx = (px - *cx as f64) / *hr as f64;
                let dy = (py - *cy as f64) / *vr as f64;
                dx * dx + dy * dy <= 1.0
            }
            (Shape::Poly, c) if c.len() >= 6 && c.len() % 2 == 0 => poly_contains(c, px, py),
            _ => false,
        }
    }

    /// Problems with a coordinate list for this shape, empty when valid.
    pub fn coord_problems(&self, coords: &[i64]) -> Vec<String> {
        let mut problems = Vec::new();
        let expected = match self {
            Shape::Default => Some(0),
            Shape::Rect | Shape::Ellipse => Some(4),
            Shape::Circle => Some(3),
            Shape::Poly => None,
        };
        match expected {
            Some(n) if coords.len() != n => {
                problems.push(format!(
                    "{} needs {} coordinates, found {}",
                    self.name(),
                    n,
                    coords.len()
                ));
                return problems;
            }
            Some(_) => {}
            None => {
                let closed = coords.len() > 1
                    && coords[0] == coords[coords.len() - 2]
                    && coords[1] == coords[coords.len() - 1];
                let minimum = if closed { 8 } else { 6 };
                if coords.len() < minimum {
                    problems.push(format!(
                        "poly needs at least {} coordinates, found {}",
                        minimum,
                        coords.len()
                    ));
                    return problems;
                }
                if coords.len() % 2 != 0 {
                    problems.push(format!(
                        "poly needs an even number of coordinates, found {}",
                        coords.len()
                    ));
                }
            }
        }
        if let Some((i, c)) = coords.iter().enumerate().find(|(_, c)| **c < 0) {
            problems.push(format!("coordinate {} ({}) cannot be negative", i + 1, c));
        }
        match (self, coords) {
            (Shape::Rect, [left, top, right, bottom]) => {
                if left >= right {
                    problems.push(format!("left-x {} must be less than right-x {}", left, right));
                }
                if top >= bottom {
                    problems.push(format!("top-y {} must be less than bottom-y {}", top, bottom));
                }
            }
            (Shape::Circle, [_, _, r]) if *r < 1 => {
                problems.push(format!("radius {} must be positive", r));
            }
            (Shape::Ellipse, [_, _, hr, vr]) => {
                if *hr < 1 {
                    problems.push(format!("h-radius {} must be positive", hr));
                }
                if *vr < 1 {
                    problems.push(format!("v-radius {} must be positive", vr));
                }
            }
            _ => {}
        }
        problems
    }
}

/// Angle-sum test: the signed angles subtended at the point by each edge
/// add up to zero only when the point is outside. A point on a vertex is
/// inside.
fn poly_contains(coords: &[i64], px: f64, py: f64) -> bool {
    let mut vertices: Vec<(f64, f64)> = coords
        .chunks(2)
        .map(|c| (c[0] as f64, c[1] as f64))
        .collect();
    if vertices.first() != vertices.last() {
        if let Some(first) = vertices.first().copied() {
            vertices.push(first);
        }
    }

    let mut sum = 0.0;
    for edge in vertices.windows(2) {
        let (ax, ay) = edge[0];
        let (cx, cy) = edge[1];
        if (ax == px && ay == py) || (cx == px && cy == py) {
            return true;
        }
        let a = (px - cx).hypot(py - cy);
        let b = (cx - ax).hypot(cy - ay);
        let c = (ax - px).hypot(ay - py);
        let cos = ((a * a - b * b + c * c) / (2.0 * a * c)).clamp(-1.0, 1.0);
        let angle = cos.acos().to_degrees();
        let orientation = (cx - px) * (py - ay) - (cy - py) * (px - ax);
        if orientation >= 0.0 {
            sum += angle;
        } else {
            sum -= angle;
        }
    }
    // Accumulated rounding noise stays well below a millionth of a degree.
    sum.abs() >= 5e-7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_contains_everything() {
        assert!(Shape::Default.contains(&[], -100, 5000));
    }

    #[test]
    fn rect_is_inclusive() {
        let r = [10, 10, 20, 20];
        assert!(Shape::Rect.contains(&r, 10, 20));
        assert!(Shape::Rect.contains(&r, 15, 15));
        assert!(!Shape::Rect.contains(&r, 21, 15));
    }

    #[test]
    fn circle_and_ellipse() {
        assert!(Shape::Circle.contains(&[0, 0, 5], 3, 4));
        assert!(!Shape::Circle.contains(&[0, 0, 5], 4, 4));
        assert!(Shape::Ellipse.contains(&[10, 10, 4, 2], 14, 10));
        assert!(!Shape::Ellipse.contains(&[10, 10, 4, 2], 10, 13));
    }

    #[test]
    fn polygon_inside_outside_and_vertex() {
        let square = [0, 0, 10, 0, 10, 10, 0, 10];
        assert!(Shape::Poly.contains(&square, 5, 5));
        assert!(!Shape::Poly.contains(&square, 15, 5));
        assert!(Shape::Poly.contains(&square, 10, 10));
        let closed = [0, 0, 10, 0, 10, 10, 0, 10, 0, 0];
        assert!(Shape::Poly.contains(&closed, 2, 8));
        let triangle = [0, 0, 10, 0, 0, 10];
        assert!(!Shape::Poly.contains(&triangle, 8, 8));
    }

    #[test]
    fn malformed_coords_contain_nothing() {
        assert!(!Shape::Rect.contains(&[1, 2, 3], 2, 2));
        assert!(!Shape::Poly.contains(&[0, 0, 1, 1], 0, 0));
    }

    #[test]
    fn coordinate_problems() {
        assert!(Shape::Rect.coord_problems(&[0, 0, 10, 10]).is_empty());
        assert_eq!(Shape::Rect.coord_problems(&[10, 0, 10, 10]).len(), 1);
        assert_eq!(Shape::Circle.coord_problems(&[5, 5, 0]).len(), 1);
        assert_eq!(Shape::Circle.coord_problems(&[5, 5]).len(), 1);
        assert_eq!(Shape::Ellipse.coord_problems(&[5, 5, 0, 0]).len(), 2);
        assert!(Shape::Poly.coord_problems(&[0, 0, 5, 0, 5, 5]).is_empty());
        assert_eq!(Shape::Poly.coord_problems(&[0, 0, 5, 0, 0, 0]).len(), 1);
        assert_eq!(Shape::Poly.coord_problems(&[0, 0, 5, 0, 5, 5, 1]).len(), 1);
        assert_eq!(Shape::Rect.coord_problems(&[-1, 0, 10, 10]).len(), 1);
        assert!(Shape::Default.coord_problems(&[]).is_empty());
    }
}
