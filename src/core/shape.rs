//! Shapes and Collision
//!
//! Geometry primitives (axis-aligned box, circle, chain of circles) and a
//! pure collision test between any two of them.
//!
//! Only box-box overlaps produce a separation vector. Every pair that
//! involves a circle or a chain answers "collided or not" and leaves
//! pushback to the caller.

use serde::{Serialize, Deserialize};

use super::vec2::Vec2;

/// Axis-aligned box given by its top-left corner and its size.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Aabb {
    /// Top-left corner.
    pub corner: Vec2,
    /// Width and height.
    pub size: Vec2,
}

impl Aabb {
    /// Create a box from corner and size.
    #[inline]
    pub const fn new(corner: Vec2, size: Vec2) -> Self {
        Self { corner, size }
    }

    /// Opposite corner (bottom-right).
    #[inline]
    pub fn far_corner(&self) -> Vec2 {
        self.corner + self.size
    }

    /// Centre point.
    #[inline]
    pub fn center(&self) -> Vec2 {
        self.corner + self.size.scale(0.5)
    }

    /// Point containment, edges included.
    pub fn contains(&self, p: Vec2) -> bool {
        let far = self.far_corner();
        p.x >= self.corner.x && p.x <= far.x && p.y >= self.corner.y && p.y <= far.y
    }
}

/// Circle given by centre and radius.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Circle {
    /// Centre point.
    pub center: Vec2,
    /// Radius.
    pub radius: f64,
}

impl Circle {
    /// Create a circle.
    #[inline]
    pub const fn new(center: Vec2, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Bounding box.
    pub fn bounds(&self) -> Aabb {
        let r = Vec2::new(self.radius, self.radius);
        Aabb::new(self.center - r, r.scale(2.0))
    }
}

/// Collision shape exposed by a collidable entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Axis-aligned box.
    Box(Aabb),
    /// Single circle.
    Circle(Circle),
    /// Ordered list of circles (a jointed chain, e.g. a segmented body).
    Chain(Vec<Circle>),
}

impl Shape {
    /// Centre of the shape. For a chain this is the first element's centre.
    pub fn center(&self) -> Vec2 {
        match self {
            Shape::Box(b) => b.center(),
            Shape::Circle(c) => c.center,
            Shape::Chain(chain) => chain.first().map(|c| c.center).unwrap_or(Vec2::ZERO),
        }
    }
}

/// Which sides of the first shape are touching the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Contact {
    /// Touching on the top side.
    pub up: bool,
    /// Touching on the bottom side.
    pub down: bool,
    /// Touching on the left side.
    pub left: bool,
    /// Touching on the right side.
    pub right: bool,
}

impl Contact {
    /// True when any flag is set.
    pub fn any(&self) -> bool {
        self.up || self.down || self.left || self.right
    }
}

/// Result of testing shape `a` against shape `b`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Collision {
    /// Shapes intersect.
    pub collided: bool,
    /// Translation to apply to `a` to push it out of `b`.
    /// Always zero unless both shapes are boxes.
    pub separation: Vec2,
    /// Side of `a` in contact with `b`.
    pub contact: Contact,
}

impl Collision {
    /// No intersection.
    pub const NONE: Self = Self {
        collided: false,
        separation: Vec2::ZERO,
        contact: Contact { up: false, down: false, left: false, right: false },
    };

    /// Intersection without a resolution vector.
    pub const HIT: Self = Self {
        collided: true,
        separation: Vec2::ZERO,
        contact: Contact { up: false, down: false, left: false, right: false },
    };

    /// Zero the components of a velocity (or acceleration) that point
    /// into a touched side.
    pub fn clamp(&self, mut v: Vec2) -> Vec2 {
        if (v.x < 0.0 && self.contact.left) || (v.x > 0.0 && self.contact.right) {
            v.x = 0.0;
        }
        if (v.y < 0.0 && self.contact.up) || (v.y > 0.0 && self.contact.down) {
            v.y = 0.0;
        }
        v
    }
}

/// Box-box overlap, edges inclusive.
#[inline]
pub fn boxes_overlap(a: &Aabb, b: &Aabb) -> bool {
    let (a_far, b_far) = (a.far_corner(), b.far_corner());
    a_far.y >= b.corner.y && a.corner.y <= b_far.y && a_far.x >= b.corner.x && a.corner.x <= b_far.x
}

/// Box-circle intersection via the box point closest to the centre.
#[inline]
pub fn box_circle_overlap(a: &Aabb, c: &Circle) -> bool {
    let closest = c.center.clamp(a.corner, a.far_corner());
    closest.distance_squared(c.center) < c.radius * c.radius
}

/// Circle-circle intersection.
#[inline]
pub fn circles_overlap(a: &Circle, b: &Circle) -> bool {
    let reach = a.radius + b.radius;
    a.center.distance_squared(b.center) < reach * reach
}

/// Resolve a box-box overlap.
///
/// Four axis pushes are considered in the order down, up, left, right and
/// the one with the smallest L1 norm wins; on ties the earlier one is kept.
fn resolve_boxes(a: &Aabb, b: &Aabb) -> Collision {
    if !boxes_overlap(a, b) {
        return Collision::NONE;
    }

    let candidates = [
        (
            Vec2::new(0.0, b.corner.y - a.corner.y - a.size.y),
            Contact { down: true, ..Contact::default() },
        ),
        (
            Vec2::new(0.0, b.corner.y + b.size.y - a.corner.y),
            Contact { up: true, ..Contact::default() },
        ),
        (
            Vec2::new(b.corner.x + b.size.x - a.corner.x, 0.0),
            Contact { left: true, ..Contact::default() },
        ),
        (
            Vec2::new(b.corner.x - a.corner.x - a.size.x, 0.0),
            Contact { right: true, ..Contact::default() },
        ),
    ];

    let mut best = candidates[0];
    for candidate in &candidates[1..] {
        if candidate.0.manhattan() < best.0.manhattan() {
            best = *candidate;
        }
    }

    Collision {
        collided: true,
        separation: best.0,
        contact: best.1,
    }
}

fn hit_if(overlap: bool) -> Collision {
    if overlap {
        Collision::HIT
    } else {
        Collision::NONE
    }
}

/// Test shape `a` against shape `b`.
///
/// Pure and stateless. The result describes `a`'s side of the contact.
pub fn collide(a: &Shape, b: &Shape) -> Collision {
    match (a, b) {
        (Shape::Box(a), Shape::Box(b)) => resolve_boxes(a, b),
        (Shape::Box(a), Shape::Circle(c)) | (Shape::Circle(c), Shape::Box(a)) => {
            hit_if(box_circle_overlap(a, c))
        }
        (Shape::Circle(a), Shape::Circle(b)) => hit_if(circles_overlap(a, b)),
        (Shape::Chain(chain), other) | (other, Shape::Chain(chain)) => {
            let hit = chain.iter().any(|link| {
                collide(&Shape::Circle(*link), other).collided
            });
            hit_if(hit)
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn square(x: f64, y: f64, side: f64) -> Shape {
        Shape::Box(Aabb::new(Vec2::new(x, y), Vec2::new(side, side)))
    }

    fn circle(x: f64, y: f64, r: f64) -> Circle {
        Circle::new(Vec2::new(x, y), r)
    }

    #[test]
    fn test_box_box_overlap_picks_smallest_push() {
        let a = square(0.0, 0.0, 10.0);
        let b = square(5.0, 5.0, 10.0);

        let hit = collide(&a, &b);
        assert!(hit.collided);
        // down (0,-5) and right (-5,0) tie; down comes first
        assert_eq!(hit.separation, Vec2::new(0.0, -5.0));
        assert_eq!(hit.contact, Contact { down: true, ..Contact::default() });
    }

    #[test]
    fn test_box_box_reverse_direction() {
        let a = square(5.0, 5.0, 10.0);
        let b = square(0.0, 0.0, 10.0);

        let hit = collide(&a, &b);
        assert!(hit.collided);
        assert_eq!(hit.separation, Vec2::new(0.0, 5.0));
        assert!(hit.contact.up);
        assert!(!hit.contact.down && !hit.contact.left && !hit.contact.right);
    }

    #[test]
    fn test_box_box_side_push() {
        // A slightly overlaps B from the left, deep vertical overlap
        let a = Shape::Box(Aabb::new(Vec2::new(0.0, 0.0), Vec2::new(10.0, 30.0)));
        let b = Shape::Box(Aabb::new(Vec2::new(8.0, 0.0), Vec2::new(10.0, 30.0)));

        let hit = collide(&a, &b);
        assert_eq!(hit.separation, Vec2::new(-2.0, 0.0));
        assert!(hit.contact.right);
    }

    #[test]
    fn test_box_box_no_overlap() {
        let a = square(0.0, 0.0, 10.0);
        let b = square(20.0, 20.0, 5.0);

        let hit = collide(&a, &b);
        assert!(!hit.collided);
        assert_eq!(hit.separation, Vec2::ZERO);
        assert!(!hit.contact.any());
    }

    #[test]
    fn test_box_box_touching_edges_collide() {
        let a = square(0.0, 0.0, 10.0);
        let b = square(10.0, 0.0, 10.0);

        let hit = collide(&a, &b);
        assert!(hit.collided);
        assert_eq!(hit.separation, Vec2::ZERO);
    }

    #[test]
    fn test_box_circle_is_boolean() {
        let a = square(0.0, 0.0, 10.0);
        let near = Shape::Circle(circle(12.0, 5.0, 3.0));
        let far = Shape::Circle(circle(20.0, 5.0, 3.0));

        let hit = collide(&a, &near);
        assert!(hit.collided);
        assert_eq!(hit.separation, Vec2::ZERO);
        assert!(!hit.contact.any());

        assert!(collide(&near, &a).collided);
        assert!(!collide(&a, &far).collided);
    }

    #[test]
    fn test_circle_circle() {
        let a = Shape::Circle(circle(0.0, 0.0, 5.0));
        let b = Shape::Circle(circle(8.0, 0.0, 5.0));
        let c = Shape::Circle(circle(10.0, 0.0, 5.0));

        assert!(collide(&a, &b).collided);
        // exactly touching does not count
        assert!(!collide(&a, &c).collided);
    }

    #[test]
    fn test_chain_any_link() {
        let chain = Shape::Chain(vec![circle(0.0, 0.0, 5.0), circle(50.0, 0.0, 5.0)]);
        let near_tail = Shape::Circle(circle(55.0, 0.0, 2.0));
        let near_nothing = Shape::Circle(circle(25.0, 0.0, 2.0));
        let other_chain = Shape::Chain(vec![circle(100.0, 0.0, 5.0), circle(52.0, 0.0, 5.0)]);

        assert!(collide(&chain, &near_tail).collided);
        assert!(collide(&near_tail, &chain).collided);
        assert!(!collide(&chain, &near_nothing).collided);
        assert!(collide(&chain, &other_chain).collided);
        assert!(collide(&chain, &square(-2.0, -2.0, 1.0)).collided);
        assert_eq!(collide(&chain, &other_chain).separation, Vec2::ZERO);
    }

    #[test]
    fn test_negative_size_box_does_not_panic() {
        let inverted = Shape::Box(Aabb::new(Vec2::new(0.0, 0.0), Vec2::new(-10.0, -10.0)));
        let near = Shape::Circle(circle(-1.0, -1.0, 3.0));
        let chain = Shape::Chain(vec![circle(50.0, 50.0, 5.0), circle(-1.0, -1.0, 5.0)]);

        assert!(collide(&inverted, &near).collided);
        assert!(collide(&near, &inverted).collided);
        assert!(collide(&chain, &inverted).collided);
        assert!(!collide(&inverted, &Shape::Circle(circle(100.0, 100.0, 1.0))).collided);
    }

    #[test]
    fn test_clamp_zeroes_velocity_into_contact() {
        let grounded = Collision {
            collided: true,
            separation: Vec2::new(0.0, -1.0),
            contact: Contact { down: true, ..Contact::default() },
        };
        assert_eq!(grounded.clamp(Vec2::new(3.0, 2.0)), Vec2::new(3.0, 0.0));
        // moving away from the floor is untouched
        assert_eq!(grounded.clamp(Vec2::new(3.0, -2.0)), Vec2::new(3.0, -2.0));

        let wall = Collision {
            collided: true,
            separation: Vec2::new(1.0, 0.0),
            contact: Contact { left: true, ..Contact::default() },
        };
        assert_eq!(wall.clamp(Vec2::new(-4.0, 1.0)), Vec2::new(0.0, 1.0));
    }

    proptest! {
        #[test]
        fn prop_box_separation_resolves_overlap(
            ax in -100.0f64..100.0, ay in -100.0f64..100.0,
            bx in -100.0f64..100.0, by in -100.0f64..100.0,
            aw in 1.0f64..50.0, ah in 1.0f64..50.0,
            bw in 1.0f64..50.0, bh in 1.0f64..50.0,
        ) {
            let a = Aabb::new(Vec2::new(ax, ay), Vec2::new(aw, ah));
            let b = Aabb::new(Vec2::new(bx, by), Vec2::new(bw, bh));
            let hit = collide(&Shape::Box(a), &Shape::Box(b));

            prop_assert_eq!(hit.collided, boxes_overlap(&a, &b));
            if hit.collided {
                // exactly one side flagged, push is axis aligned
                let c = hit.contact;
                let flags = [c.up, c.down, c.left, c.right].iter().filter(|f| **f).count();
                prop_assert_eq!(flags, 1);
                prop_assert!(hit.separation.x == 0.0 || hit.separation.y == 0.0);

                // after the push the boxes only touch
                let moved = Aabb::new(a.corner + hit.separation, a.size);
                let overlap_x = moved.far_corner().x.min(b.far_corner().x) - moved.corner.x.max(b.corner.x);
                let overlap_y = moved.far_corner().y.min(b.far_corner().y) - moved.corner.y.max(b.corner.y);
                prop_assert!(overlap_x <= 1e-9 || overlap_y <= 1e-9);
            } else {
                prop_assert!(!hit.contact.any());
            }
        }

        #[test]
        fn prop_circle_tests_are_symmetric(
            x in -50.0f64..50.0, y in -50.0f64..50.0, r in 0.5f64..20.0,
            bx in -50.0f64..50.0, by in -50.0f64..50.0, side in 1.0f64..30.0,
        ) {
            let c = Shape::Circle(circle(x, y, r));
            let b = square(bx, by, side);
            prop_assert_eq!(collide(&c, &b).collided, collide(&b, &c).collided);
        }
    }
}
