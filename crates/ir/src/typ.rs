/// Element type of a vector value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElemKind {
    I8,
    I16,
    I32,
    I64,
    F16,
    F32,
    F64,
    /// Predicate element: one execution-mask bit per lane.
    /// Has no byte size and cannot appear in byte-addressed regions.
    Bool,
}

impl ElemKind {
    /// Size of one element in bytes. `None` for predicate elements,
    /// which are bit- rather than byte-addressed.
    pub fn bytes(self) -> Option<u32> {
        match self {
            ElemKind::I8 => Some(1),
            ElemKind::I16 | ElemKind::F16 => Some(2),
            ElemKind::I32 | ElemKind::F32 => Some(4),
            ElemKind::I64 | ElemKind::F64 => Some(8),
            ElemKind::Bool => None,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ElemKind::F16 | ElemKind::F32 | ElemKind::F64)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ElemKind::I8 | ElemKind::I16 | ElemKind::I32 | ElemKind::I64
        )
    }

    pub fn is_predicate(self) -> bool {
        matches!(self, ElemKind::Bool)
    }
}

/// Type of an IR value.
///
/// Every data value is a flat vector (scalars are vectors of length 1).
/// `Ctl` is the opaque struct produced by the goto/join control
/// instructions; it is consumed only by the extract projections.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Vec { elem: ElemKind, len: u32 },
    Ctl,
}

impl Type {
    pub fn vec(elem: ElemKind, len: u32) -> Self {
        Type::Vec { elem, len }
    }

    pub fn scalar(elem: ElemKind) -> Self {
        Type::Vec { elem, len: 1 }
    }

    pub fn pred(len: u32) -> Self {
        Type::Vec {
            elem: ElemKind::Bool,
            len,
        }
    }

    pub fn elem(&self) -> ElemKind {
        match self {
            Type::Vec { elem, .. } => *elem,
            Type::Ctl => panic!("control struct has no element type"),
        }
    }

    pub fn len(&self) -> u32 {
        match self {
            Type::Vec { len, .. } => *len,
            Type::Ctl => panic!("control struct has no lane count"),
        }
    }

    pub fn is_predicate(&self) -> bool {
        matches!(
            self,
            Type::Vec {
                elem: ElemKind::Bool,
                ..
            }
        )
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Vec { len: 1, .. })
    }

    pub fn is_ctl(&self) -> bool {
        matches!(self, Type::Ctl)
    }

    /// Total size of the value in bytes. `None` for predicates and the
    /// control struct.
    pub fn total_bytes(&self) -> Option<u32> {
        match self {
            Type::Vec { elem, len } => elem.bytes().map(|b| b * len),
            Type::Ctl => None,
        }
    }

    #[must_use]
    pub fn with_elem(&self, elem: ElemKind) -> Self {
        Type::Vec {
            elem,
            len: self.len(),
        }
    }

    #[must_use]
    pub fn with_len(&self, len: u32) -> Self {
        Type::Vec {
            elem: self.elem(),
            len,
        }
    }
}
