// Transform math for the scene graph
//
// A view's transform is a full 4x4 matrix, but almost every view
// in practice is only translated. The matrix carries a bitset of
// the transform kinds that went into it so region math can take
// an exact integer fast path for translate-only transforms and
// fall back to outward axis-aligned bounds for everything else.
//
// Austin Shafer - 2024
use cgmath::{Matrix4, Rad, SquareMatrix, Vector3, Vector4};
use utils::region::{Rect, Region};

bitflags! {
    /// Which kinds of transform have been composed into a matrix
    pub struct TransformKind: u32 {
        const TRANSLATE = 0x1;
        const SCALE     = 0x2;
        const ROTATE    = 0x4;
        const COMPLEX   = 0x8;
    }
}

/// The eight output/buffer symmetries of the wire protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum OutputTransform {
    Normal = 0,
    Rotated90 = 1,
    Rotated180 = 2,
    Rotated270 = 3,
    Flipped = 4,
    Flipped90 = 5,
    Flipped180 = 6,
    Flipped270 = 7,
}

impl OutputTransform {
    pub fn from_i32(val: i32) -> Option<Self> {
        match val {
            0 => Some(OutputTransform::Normal),
            1 => Some(OutputTransform::Rotated90),
            2 => Some(OutputTransform::Rotated180),
            3 => Some(OutputTransform::Rotated270),
            4 => Some(OutputTransform::Flipped),
            5 => Some(OutputTransform::Flipped90),
            6 => Some(OutputTransform::Flipped180),
            7 => Some(OutputTransform::Flipped270),
            _ => None,
        }
    }

    /// 90 and 270 degree variants swap buffer width and height
    pub fn swaps_dimensions(&self) -> bool {
        match self {
            OutputTransform::Rotated90
            | OutputTransform::Rotated270
            | OutputTransform::Flipped90
            | OutputTransform::Flipped270 => true,
            _ => false,
        }
    }
}

/// A 4x4 transform with a kind discriminant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    t_matrix: Matrix4<f32>,
    t_kind: TransformKind,
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            t_matrix: Matrix4::identity(),
            t_kind: TransformKind::empty(),
        }
    }

    pub fn translate(x: f32, y: f32) -> Self {
        Self {
            t_matrix: Matrix4::from_translation(Vector3::new(x, y, 0.0)),
            t_kind: TransformKind::TRANSLATE,
        }
    }

    pub fn scale(x: f32, y: f32) -> Self {
        Self {
            t_matrix: Matrix4::from_nonuniform_scale(x, y, 1.0),
            t_kind: TransformKind::SCALE,
        }
    }

    pub fn rotate(radians: f32) -> Self {
        Self {
            t_matrix: Matrix4::from_angle_z(Rad(radians)),
            t_kind: TransformKind::ROTATE,
        }
    }

    /// Wrap an arbitrary matrix. We cannot classify it, so it
    /// always takes the slow path.
    pub fn from_matrix(mat: Matrix4<f32>) -> Self {
        Self {
            t_matrix: mat,
            t_kind: TransformKind::COMPLEX,
        }
    }

    pub fn kind(&self) -> TransformKind {
        self.t_kind
    }

    pub fn matrix(&self) -> &Matrix4<f32> {
        &self.t_matrix
    }

    /// self applied after `other`: (self * other)(p) = self(other(p))
    pub fn multiply(&self, other: &Transform) -> Transform {
        Transform {
            t_matrix: self.t_matrix * other.t_matrix,
            t_kind: self.t_kind | other.t_kind,
        }
    }

    /// True when this matrix only moves points by an integer amount
    pub fn is_integer_translate(&self) -> bool {
        if !(self.t_kind & !TransformKind::TRANSLATE).is_empty() {
            return false;
        }
        let (tx, ty) = self.offset();
        tx.fract() == 0.0 && ty.fract() == 0.0
    }

    pub fn offset(&self) -> (f32, f32) {
        (self.t_matrix.w.x, self.t_matrix.w.y)
    }

    pub fn apply_point(&self, x: f32, y: f32) -> (f32, f32) {
        let v = self.t_matrix * Vector4::new(x, y, 0.0, 1.0);
        (v.x, v.y)
    }

    /// Screen-aligned bound of a transformed rectangle
    ///
    /// Exact for integer translations. Any other transform maps
    /// the four corners and rounds the covering box outward.
    pub fn transform_rect_bounds(&self, rect: &Rect<i32>) -> Rect<i32> {
        if rect.is_empty() {
            return Rect::new(0, 0, 0, 0);
        }

        if self.is_integer_translate() {
            let (tx, ty) = self.offset();
            return Rect::new(
                rect.r_pos.0 + tx as i32,
                rect.r_pos.1 + ty as i32,
                rect.r_size.0,
                rect.r_size.1,
            );
        }

        let corners = [
            self.apply_point(rect.x1() as f32, rect.y1() as f32),
            self.apply_point(rect.x2() as f32, rect.y1() as f32),
            self.apply_point(rect.x1() as f32, rect.y2() as f32),
            self.apply_point(rect.x2() as f32, rect.y2() as f32),
        ];

        let mut x1 = f32::MAX;
        let mut y1 = f32::MAX;
        let mut x2 = f32::MIN;
        let mut y2 = f32::MIN;
        for (x, y) in corners.iter() {
            x1 = utils::partial_min(x1, *x);
            y1 = utils::partial_min(y1, *y);
            x2 = utils::partial_max(x2, *x);
            y2 = utils::partial_max(y2, *y);
        }

        let ix1 = x1.floor() as i32;
        let iy1 = y1.floor() as i32;
        Rect::new(ix1, iy1, x2.ceil() as i32 - ix1, y2.ceil() as i32 - iy1)
    }

    /// Transform a whole region, rect by rect
    ///
    /// Integer translations preserve the region exactly. Other
    /// transforms expand each rect outward, so the result may
    /// over-cover, which is the right direction for damage.
    pub fn transform_region(&self, region: &Region) -> Region {
        let mut ret = Region::empty();

        if self.is_integer_translate() {
            let (tx, ty) = self.offset();
            let mut moved = region.clone();
            moved.translate(tx as i32, ty as i32);
            return moved;
        }

        for r in region.rects().iter() {
            ret.add(&self.transform_rect_bounds(r));
        }
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_only_is_exact() {
        let t = Transform::translate(10.0, -5.0);
        assert!(t.is_integer_translate());
        assert_eq!(
            t.transform_rect_bounds(&Rect::new(0, 0, 64, 32)),
            Rect::new(10, -5, 64, 32)
        );
    }

    #[test]
    fn composition_unions_kinds() {
        let t = Transform::translate(1.0, 1.0);
        let s = Transform::scale(2.0, 2.0);
        let c = t.multiply(&s);
        assert_eq!(c.kind(), TransformKind::TRANSLATE | TransformKind::SCALE);
        assert!(!c.is_integer_translate());
    }

    #[test]
    fn identity_composes_to_translate() {
        let parent = Transform::identity();
        let local = Transform::identity();
        let global = parent
            .multiply(&Transform::translate(7.0, 9.0))
            .multiply(&local);
        assert_eq!(global.apply_point(0.0, 0.0), (7.0, 9.0));
        assert!(global.is_integer_translate());
    }

    #[test]
    fn fractional_translate_takes_slow_path() {
        let t = Transform::translate(0.5, 0.0);
        assert!(!t.is_integer_translate());
        // outward rounding covers the fractional spill
        assert_eq!(
            t.transform_rect_bounds(&Rect::new(0, 0, 10, 10)),
            Rect::new(0, 0, 11, 10)
        );
    }

    #[test]
    fn scale_bounds_round_outward() {
        let s = Transform::scale(1.5, 1.0);
        assert_eq!(
            s.transform_rect_bounds(&Rect::new(0, 0, 3, 3)),
            Rect::new(0, 0, 5, 3)
        );
    }

    #[test]
    fn region_translation_is_lossless() {
        let mut reg = Region::from_rect(Rect::new(0, 0, 16, 16));
        reg.add(&Rect::new(32, 32, 8, 8));

        let t = Transform::translate(100.0, 200.0);
        let moved = t.transform_region(&reg);
        assert_eq!(moved.area(), reg.area());
        assert!(moved.contains_point(132, 232));
    }

    #[test]
    fn output_transform_validation() {
        assert_eq!(OutputTransform::from_i32(0), Some(OutputTransform::Normal));
        assert_eq!(
            OutputTransform::from_i32(7),
            Some(OutputTransform::Flipped270)
        );
        assert_eq!(OutputTransform::from_i32(8), None);
        assert_eq!(OutputTransform::from_i32(-1), None);

        assert!(OutputTransform::Rotated90.swaps_dimensions());
        assert!(!OutputTransform::Rotated180.swaps_dimensions());
    }
}
