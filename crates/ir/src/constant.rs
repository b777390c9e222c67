use crate::typ::{ElemKind, Type};

/// A constant vector value, interned in the function group's constant
/// pool. Element payloads are stored as raw bit patterns.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConstData {
    pub typ: Type,
    pub kind: ConstKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConstKind {
    Undef,
    /// Every lane holds the same bit pattern.
    Splat(u64),
    /// One bit pattern per lane.
    Elems(Vec<u64>),
}

impl ConstData {
    pub fn undef(typ: Type) -> Self {
        ConstData {
            typ,
            kind: ConstKind::Undef,
        }
    }

    pub fn splat(typ: Type, bits: u64) -> Self {
        ConstData {
            typ,
            kind: ConstKind::Splat(bits),
        }
    }

    pub fn is_undef(&self) -> bool {
        matches!(self.kind, ConstKind::Undef)
    }

    /// The common bit pattern of all lanes, if there is one.
    /// An `Elems` constant whose lanes are all equal counts as a splat.
    pub fn as_splat(&self) -> Option<u64> {
        match &self.kind {
            ConstKind::Undef => None,
            ConstKind::Splat(bits) => Some(*bits),
            ConstKind::Elems(elems) => {
                let first = *elems.first()?;
                elems.iter().all(|&e| e == first).then_some(first)
            }
        }
    }

    /// The splat value sign-extended from the element width to i64.
    /// `None` for non-splats, undef, predicates, and float elements.
    pub fn as_splat_int(&self) -> Option<i64> {
        let elem = self.typ.elem();
        if !elem.is_integer() {
            return None;
        }
        let bits = self.as_splat()?;
        let width = elem.bytes().unwrap() * 8;
        if width == 64 {
            return Some(bits as i64);
        }
        let shift = 64 - width;
        Some(((bits << shift) as i64) >> shift)
    }

    pub fn is_all_ones_pred(&self) -> bool {
        self.typ.elem() == ElemKind::Bool && self.as_splat() == Some(1)
    }

    pub fn is_all_zeros_pred(&self) -> bool {
        self.typ.elem() == ElemKind::Bool && self.as_splat() == Some(0)
    }

    /// True for undef and for splats: values whose region reads are
    /// insensitive to the access pattern.
    pub fn is_pattern_insensitive(&self) -> bool {
        self.is_undef() || self.as_splat().is_some()
    }
}
