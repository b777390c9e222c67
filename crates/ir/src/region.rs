//! The strided-access region descriptor and its algebra.
//!
//! A region describes which elements of a flat vector value an access
//! touches: `num_elements` elements in rows of `width`, stepping
//! `stride` elements within a row and `vstride` elements between row
//! starts, beginning at a constant byte `offset`. If `index` is set the
//! access is indirect: the hardware adds the runtime byte offset in
//! `index`, and `offset` becomes a constant delta from it.

use crate::{
    func::Value,
    typ::{ElemKind, Type},
};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Region {
    pub elem: ElemKind,
    pub num_elements: u32,
    /// Row length in elements. Equal to `num_elements` when the region
    /// is a single row.
    pub width: u32,
    /// Step between consecutive elements of a row, in elements.
    pub stride: i32,
    /// Step between consecutive row starts, in elements. Only
    /// meaningful when there is more than one row.
    pub vstride: i32,
    /// Constant byte offset; a delta from `index` when indirect.
    pub offset: i32,
    /// Runtime byte-offset operand for indirect accesses.
    pub index: Option<Value>,
    /// Row length of the parent value in elements, when the access is
    /// known not to cross parent rows. Needed to interpret indirect
    /// strides.
    pub parent_width: Option<u32>,
    /// Per-lane predicate controlling a write.
    pub mask: Option<Value>,
}

impl Region {
    /// Region covering the whole of a value of type `typ`, one row,
    /// unit stride.
    pub fn whole(typ: Type) -> Self {
        Region {
            elem: typ.elem(),
            num_elements: typ.len(),
            width: typ.len(),
            stride: 1,
            vstride: 0,
            offset: 0,
            index: None,
            parent_width: None,
            mask: None,
        }
    }

    /// One-row direct region.
    pub fn row(elem: ElemKind, num: u32, stride: i32, offset: i32) -> Self {
        Region {
            elem,
            num_elements: num,
            width: num,
            stride,
            vstride: 0,
            offset,
            index: None,
            parent_width: None,
            mask: None,
        }
    }

    /// Two-dimensional direct region.
    pub fn grid(elem: ElemKind, num: u32, width: u32, stride: i32, vstride: i32, offset: i32) -> Self {
        Region {
            elem,
            num_elements: num,
            width,
            stride,
            vstride,
            offset,
            index: None,
            parent_width: None,
            mask: None,
        }
    }

    #[must_use]
    pub fn with_index(mut self, index: Value) -> Self {
        self.index = Some(index);
        self
    }

    #[must_use]
    pub fn with_mask(mut self, mask: Value) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn elem_bytes(&self) -> u32 {
        self.elem
            .bytes()
            .expect("byte-addressed region over predicate elements")
    }

    pub fn is_indirect(&self) -> bool {
        self.index.is_some()
    }

    pub fn num_rows(&self) -> u32 {
        debug_assert_eq!(self.num_elements % self.width, 0);
        self.num_elements / self.width
    }

    pub fn is_2d(&self) -> bool {
        self.width != self.num_elements
    }

    /// Single row, unit stride.
    pub fn is_contiguous(&self) -> bool {
        self.stride == 1 && self.width == self.num_elements
    }

    /// Reads a single element (possibly replicated over all lanes).
    pub fn is_scalar(&self) -> bool {
        self.stride == 0 && (self.vstride == 0 || self.width == self.num_elements)
    }

    /// Produces more lanes than it reads distinct elements: zero stride
    /// with several columns, or zero vstride with several rows.
    pub fn is_replicating(&self) -> bool {
        (self.stride == 0 && self.width > 1) || (self.vstride == 0 && self.num_rows() > 1)
    }

    /// Exactly covers a value of `total` elements.
    pub fn is_whole(&self, total: u32) -> bool {
        self.is_contiguous() && !self.is_indirect() && self.offset == 0 && self.num_elements == total
    }

    pub fn access_type(&self) -> Type {
        Type::vec(self.elem, self.num_elements)
    }

    /// Reinterpret the region with a different element type, rescaling
    /// counts and strides so that the same byte range is addressed.
    /// Fails when the rescale is not exact.
    pub fn change_element_type(&self, new_elem: ElemKind) -> Option<Region> {
        let old_bytes = self.elem.bytes()?;
        let new_bytes = new_elem.bytes()?;

        if new_bytes == old_bytes {
            let mut r = self.clone();
            r.elem = new_elem;
            return Some(r);
        }

        // Reinterpreting at a different width requires an element-aligned
        // start for the new type.
        if self.offset % new_bytes as i32 != 0 {
            return None;
        }

        if self.is_scalar() && self.num_elements == 1 {
            // A true scalar read can only be reinterpreted at equal width.
            return None;
        }
        if !self.is_contiguous() {
            return None;
        }

        let total_bytes = self.num_elements as u64 * old_bytes as u64;
        if total_bytes % new_bytes as u64 != 0 {
            return None;
        }
        let new_num = (total_bytes / new_bytes as u64) as u32;

        Some(Region {
            elem: new_elem,
            num_elements: new_num,
            width: new_num,
            stride: 1,
            vstride: 0,
            offset: self.offset,
            index: self.index,
            parent_width: self.parent_width,
            mask: self.mask,
        })
    }

    /// Byte extent `[lo, hi)` of a direct access with non-negative
    /// strides, relative to the start of the accessed value.
    pub fn byte_extent(&self) -> Option<(i64, i64)> {
        if self.is_indirect() || self.stride < 0 || self.vstride < 0 {
            return None;
        }
        let b = self.elem_bytes() as i64;
        let last = (self.num_rows() as i64 - 1) * self.vstride as i64
            + (self.width as i64 - 1) * self.stride as i64;
        Some((self.offset as i64, self.offset as i64 + last * b + b))
    }

    /// Whether the accessed bytes straddle a register-unit boundary.
    pub fn crosses_grf(&self, grf_bytes: u32) -> bool {
        match self.byte_extent() {
            Some((lo, hi)) => lo.div_euclid(grf_bytes as i64) != (hi - 1).div_euclid(grf_bytes as i64),
            // Unknown extent: assume the worst.
            None => true,
        }
    }

    /// Legality as a "raw" operand: direct, unpredicated, contiguous,
    /// starting on a register-unit boundary.
    pub fn is_ok_for_raw(&self, grf_bytes: u32) -> bool {
        !self.is_indirect()
            && self.mask.is_none()
            && self.is_contiguous()
            && self.offset % grf_bytes as i32 == 0
    }

    /// Make the element types of two regions agree, preferring to widen
    /// the smaller element so no extra bitcasts are needed downstream.
    pub fn normalize_element_types(a: &Region, b: &Region) -> Option<(Region, Region)> {
        let ab = a.elem.bytes()?;
        let bb = b.elem.bytes()?;
        if ab == bb {
            let mut b2 = b.clone();
            b2.elem = a.elem;
            return Some((a.clone(), b2));
        }
        if ab < bb {
            if let Some(a2) = a.change_element_type(b.elem) {
                return Some((a2, b.clone()));
            }
            let b2 = b.change_element_type(a.elem)?;
            Some((a.clone(), b2))
        } else {
            if let Some(b2) = b.change_element_type(a.elem) {
                return Some((a.clone(), b2));
            }
            let a2 = a.change_element_type(b.elem)?;
            Some((a2, b.clone()))
        }
    }

    /// Combine an outer region applied to the result of an inner-region
    /// access into a single region with the same net effect.
    ///
    /// `outer` is the region of the access that produced (or consumes)
    /// the intermediate value; `inner` is the region applied on top of
    /// it. Pure and speculative: returns `None` whenever exact
    /// semantics cannot be preserved, and never mutates its inputs.
    ///
    /// If the result is indirect through `inner`'s index, the caller
    /// must recompute that index through `outer`'s layout before using
    /// the region (the returned descriptor carries the operand
    /// unadjusted).
    pub fn combine(outer: &Region, inner: &Region) -> Option<Region> {
        // At most one dynamically-varying index is supported.
        if outer.is_indirect() && inner.is_indirect() {
            return None;
        }
        // A predicated outer access cannot be combined safely.
        if outer.mask.is_some() {
            return None;
        }

        let (outer, inner) = Region::normalize_element_types(outer, inner)?;
        let b = outer.elem_bytes() as i64;

        // Inner offsets index elements of the outer access's result.
        if inner.offset as i64 % b != 0 {
            return None;
        }
        let inner_off = inner.offset as i64 / b;

        let offset = if !outer.is_2d() {
            outer.offset as i64 + inner_off * outer.stride as i64 * b
        } else {
            let row = inner_off.div_euclid(outer.width as i64);
            let col = inner_off.rem_euclid(outer.width as i64);
            outer.offset as i64 + (row * outer.vstride as i64 + col * outer.stride as i64) * b
        };
        let offset = i32::try_from(offset).ok()?;

        let combined = if !outer.is_2d() {
            // A 1D outer region composes by scaling both strides.
            Some(Region {
                elem: outer.elem,
                num_elements: inner.num_elements,
                width: inner.width,
                stride: inner.stride * outer.stride,
                vstride: inner.vstride * outer.stride,
                offset,
                index: None,
                parent_width: None,
                mask: inner.mask,
            })
        } else if inner.is_scalar() {
            // A splat reads one element; any outer shape can serve it.
            Some(Region {
                elem: outer.elem,
                num_elements: inner.num_elements,
                width: inner.width,
                stride: 0,
                vstride: 0,
                offset,
                index: None,
                parent_width: None,
                mask: inner.mask,
            })
        } else if inner.is_indirect() {
            Self::combine_2d_indirect(&outer, &inner, offset)
        } else if !inner.is_2d() {
            Self::combine_2d_1d(&outer, &inner, inner_off, offset)
        } else {
            Self::combine_2d_2d(&outer, &inner, offset)
        }?;

        let mut combined = combined;
        combined.index = outer.index.or(inner.index);
        if combined.index.is_none() {
            combined.parent_width = None;
        } else if combined.parent_width.is_none() {
            combined.parent_width = outer.parent_width.or(inner.parent_width);
        }

        // An indirect replicating access cannot be expressed as one
        // access and would force the rewriter to split what it just
        // merged.
        if combined.is_indirect() && combined.is_replicating() {
            return None;
        }

        Some(combined)
    }

    /// Indirect inner region through a 2D outer region.
    fn combine_2d_indirect(outer: &Region, inner: &Region, offset: i32) -> Option<Region> {
        // The constant delta and the runtime index would both need the
        // row/column decomposition; only a zero delta composes exactly.
        if inner.offset != 0 {
            return None;
        }
        let pw = inner.parent_width?;
        // Rows of the inner access must advance by whole outer rows,
        // and outer rows must consist of whole parent rows.
        if inner.vstride < 0 || inner.vstride as u32 % outer.width != 0 || outer.width % pw != 0 {
            return None;
        }
        let row_scale = inner.vstride as u32 / outer.width;
        Some(Region {
            elem: outer.elem,
            num_elements: inner.num_elements,
            width: inner.width,
            stride: inner.stride * outer.stride,
            vstride: row_scale as i32 * outer.vstride,
            offset,
            index: None,
            parent_width: Some(pw),
            mask: inner.mask,
        })
    }

    /// 1D direct inner region through a 2D outer region. Three shapes
    /// are expressible; everything else fails.
    fn combine_2d_1d(outer: &Region, inner: &Region, inner_off: i64, offset: i32) -> Option<Region> {
        if inner.stride < 0 {
            return None;
        }
        let ow = outer.width as i64;
        let col0 = inner_off.rem_euclid(ow);
        let n = inner.num_elements as i64;
        let s = inner.stride as i64;

        // Whole span inside one outer row.
        if col0 + (n - 1) * s < ow {
            return Some(Region {
                elem: outer.elem,
                num_elements: inner.num_elements,
                width: inner.num_elements,
                stride: inner.stride * outer.stride,
                vstride: 0,
                offset,
                index: None,
                parent_width: None,
                mask: inner.mask,
            });
        }

        // Splits evenly across exactly two adjacent rows at the midpoint.
        if n % 2 == 0 {
            let w = n / 2;
            let e0_row = inner_off.div_euclid(ow);
            let emid = inner_off + w * s;
            let emid_row = emid.div_euclid(ow);
            let emid_col = emid.rem_euclid(ow);
            if emid_row == e0_row + 1
                && col0 + (w - 1) * s < ow
                && emid_col + (w - 1) * s < ow
            {
                let vstride = outer.vstride as i64 + (emid_col - col0) * outer.stride as i64;
                return Some(Region {
                    elem: outer.elem,
                    num_elements: inner.num_elements,
                    width: w as u32,
                    stride: inner.stride * outer.stride,
                    vstride: i32::try_from(vstride).ok()?,
                    offset,
                    index: None,
                    parent_width: None,
                    mask: inner.mask,
                });
            }
        }

        // Splits evenly across N adjacent rows, starting at the same
        // column in each: one row of the result per outer row.
        if s > 0 && ow % s == 0 {
            let w = ow / s;
            if w > 0 && n % w == 0 && col0 < s {
                return Some(Region {
                    elem: outer.elem,
                    num_elements: inner.num_elements,
                    width: w as u32,
                    stride: inner.stride * outer.stride,
                    vstride: outer.vstride,
                    offset,
                    index: None,
                    parent_width: None,
                    mask: inner.mask,
                });
            }
        }

        None
    }

    /// 2D direct inner region through a 2D outer region.
    fn combine_2d_2d(outer: &Region, inner: &Region, offset: i32) -> Option<Region> {
        if inner.vstride < 0 || inner.stride < 0 {
            return None;
        }
        // Inner rows must advance by whole outer rows.
        if inner.vstride as u32 % outer.width != 0 {
            return None;
        }
        // Each inner row must stay inside one outer row, starting at the
        // same column in every row (guaranteed by the whole-row advance).
        let ow = outer.width as i64;
        let col0 = (inner.offset as i64 / outer.elem_bytes() as i64).rem_euclid(ow);
        if col0 + (inner.width as i64 - 1) * inner.stride as i64 >= ow {
            return None;
        }
        let row_scale = inner.vstride as u32 / outer.width;
        Some(Region {
            elem: outer.elem,
            num_elements: inner.num_elements,
            width: inner.width,
            stride: inner.stride * outer.stride,
            vstride: row_scale as i32 * outer.vstride,
            offset,
            index: None,
            parent_width: None,
            mask: inner.mask,
        })
    }
}
