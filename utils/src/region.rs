// Region tracking helpers
//
// Rectangle sets are the currency of damage tracking: surface
// damage, opaque/input regions, plane damage and clip regions
// are all `Region` values in integer pixel coordinates.
//
// Austin Shafer - 2024

use crate::{partial_max, partial_min};

/// A rectangular region
///
/// This can be used to track input regions,
/// damage boxes, etc. It is determinined by
/// the corders of a rectangle:
///   r_pos: the upper left corner's position on the desktop
///   r_size:  the distance from the left to the lower right
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Rect<T> {
    pub r_pos: (T, T),
    pub r_size: (T, T),
}

impl<T> Rect<T> {
    pub fn new(x: T, y: T, width: T, height: T) -> Rect<T> {
        Rect {
            r_pos: (x, y),
            r_size: (width, height),
        }
    }
}

impl Rect<i32> {
    pub fn x1(&self) -> i32 {
        self.r_pos.0
    }
    pub fn y1(&self) -> i32 {
        self.r_pos.1
    }
    pub fn x2(&self) -> i32 {
        self.r_pos.0 + self.r_size.0
    }
    pub fn y2(&self) -> i32 {
        self.r_pos.1 + self.r_size.1
    }

    /// A rectangle with no area contributes nothing to a region
    pub fn is_empty(&self) -> bool {
        self.r_size.0 <= 0 || self.r_size.1 <= 0
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x1() && x < self.x2() && y >= self.y1() && y < self.y2()
    }

    /// Get the overlapping area of two rects, if there is any
    pub fn intersect(&self, other: &Rect<i32>) -> Option<Rect<i32>> {
        let x1 = partial_max(self.x1(), other.x1());
        let y1 = partial_max(self.y1(), other.y1());
        let x2 = partial_min(self.x2(), other.x2());
        let y2 = partial_min(self.y2(), other.y2());

        if x1 < x2 && y1 < y2 {
            return Some(Rect::new(x1, y1, x2 - x1, y2 - y1));
        }
        None
    }

    /// Remove `clip` from this rect
    ///
    /// Returns the remaining area as up to four disjoint rects:
    /// the bands above and below the clip, and the left/right
    /// slivers beside it.
    pub fn subtract(&self, clip: &Rect<i32>) -> Vec<Rect<i32>> {
        let mut ret = Vec::new();

        let inter = match self.intersect(clip) {
            Some(i) => i,
            None => {
                ret.push(*self);
                return ret;
            }
        };

        // top band
        if inter.y1() > self.y1() {
            ret.push(Rect::new(
                self.x1(),
                self.y1(),
                self.r_size.0,
                inter.y1() - self.y1(),
            ));
        }
        // bottom band
        if inter.y2() < self.y2() {
            ret.push(Rect::new(
                self.x1(),
                inter.y2(),
                self.r_size.0,
                self.y2() - inter.y2(),
            ));
        }
        // left sliver
        if inter.x1() > self.x1() {
            ret.push(Rect::new(
                self.x1(),
                inter.y1(),
                inter.x1() - self.x1(),
                inter.r_size.1,
            ));
        }
        // right sliver
        if inter.x2() < self.x2() {
            ret.push(Rect::new(
                inter.x2(),
                inter.y1(),
                self.x2() - inter.x2(),
                inter.r_size.1,
            ));
        }

        ret
    }
}

/// Half of i32 range, so that offsetting an "infinite" region
/// by screen coordinates cannot overflow.
const REGION_BOUND: i32 = 1 << 30;

/// A set of integer rectangles
///
/// The rects held are always pairwise disjoint, so area and
/// emptiness checks are exact. Operations keep outward integer
/// bounds, fractional inputs must be expanded by the caller
/// before they get here.
#[derive(Debug, Clone)]
pub struct Region {
    r_rects: Vec<Rect<i32>>,
}

impl Region {
    pub fn empty() -> Self {
        Self {
            r_rects: Vec::new(),
        }
    }

    pub fn from_rect(rect: Rect<i32>) -> Self {
        let mut ret = Self::empty();
        ret.add(&rect);
        ret
    }

    /// The "everything" region, used for wl_surface input region
    /// semantics where a null region means infinite.
    pub fn infinite() -> Self {
        Self::from_rect(Rect::new(
            -REGION_BOUND,
            -REGION_BOUND,
            i32::MAX,
            i32::MAX,
        ))
    }

    pub fn is_empty(&self) -> bool {
        self.r_rects.is_empty()
    }

    pub fn clear(&mut self) {
        self.r_rects.clear();
    }

    pub fn rects(&self) -> &[Rect<i32>] {
        self.r_rects.as_slice()
    }

    pub fn area(&self) -> i64 {
        self.r_rects
            .iter()
            .map(|r| r.r_size.0 as i64 * r.r_size.1 as i64)
            .sum()
    }

    /// Union a single rect into this region
    ///
    /// Only the parts of `rect` not already covered are added, so
    /// the disjointness of the rect list is kept.
    pub fn add(&mut self, rect: &Rect<i32>) {
        if rect.is_empty() {
            return;
        }

        let mut pieces = vec![*rect];
        for existing in self.r_rects.iter() {
            let mut next = Vec::new();
            for p in pieces.iter() {
                next.extend(p.subtract(existing));
            }
            pieces = next;
            if pieces.is_empty() {
                return;
            }
        }

        self.r_rects.extend(pieces);
    }

    pub fn subtract_rect(&mut self, rect: &Rect<i32>) {
        if rect.is_empty() {
            return;
        }

        let mut next = Vec::with_capacity(self.r_rects.len());
        for r in self.r_rects.iter() {
            next.extend(r.subtract(rect));
        }
        self.r_rects = next;
    }

    pub fn union(&mut self, other: &Region) {
        for r in other.r_rects.iter() {
            self.add(r);
        }
    }

    pub fn subtract(&mut self, other: &Region) {
        for r in other.r_rects.iter() {
            self.subtract_rect(r);
        }
    }

    pub fn intersect_rect(&mut self, rect: &Rect<i32>) {
        let mut next = Vec::with_capacity(self.r_rects.len());
        for r in self.r_rects.iter() {
            if let Some(i) = r.intersect(rect) {
                next.push(i);
            }
        }
        self.r_rects = next;
    }

    pub fn intersect(&mut self, other: &Region) {
        let mut next = Vec::new();
        for r in self.r_rects.iter() {
            for o in other.r_rects.iter() {
                if let Some(i) = r.intersect(o) {
                    next.push(i);
                }
            }
        }
        self.r_rects = next;
    }

    pub fn translate(&mut self, dx: i32, dy: i32) {
        for r in self.r_rects.iter_mut() {
            r.r_pos.0 += dx;
            r.r_pos.1 += dy;
        }
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        self.r_rects.iter().any(|r| r.contains_point(x, y))
    }

    pub fn intersects_rect(&self, rect: &Rect<i32>) -> bool {
        self.r_rects.iter().any(|r| r.intersect(rect).is_some())
    }

    /// The bounding box of the whole set
    pub fn extents(&self) -> Rect<i32> {
        if self.is_empty() {
            return Rect::new(0, 0, 0, 0);
        }

        let mut x1 = i32::MAX;
        let mut y1 = i32::MAX;
        let mut x2 = i32::MIN;
        let mut y2 = i32::MIN;
        for r in self.r_rects.iter() {
            x1 = partial_min(x1, r.x1());
            y1 = partial_min(y1, r.y1());
            x2 = partial_max(x2, r.x2());
            y2 = partial_max(y2, r.y2());
        }

        Rect::new(x1, y1, x2 - x1, y2 - y1)
    }

    /// Symmetric difference: area covered by exactly one of the two
    pub fn xor(&self, other: &Region) -> Region {
        let mut a = self.clone();
        a.subtract(other);
        let mut b = other.clone();
        b.subtract(self);
        b.union(&a);
        b
    }
}

/// Two regions are equal when they cover the same pixels, however
/// differently their rect lists happen to be fragmented.
impl PartialEq for Region {
    fn eq(&self, other: &Self) -> bool {
        self.xor(other).is_empty()
    }
}
