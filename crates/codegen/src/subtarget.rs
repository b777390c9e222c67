/// Capability and alignment descriptor for one SIMD execution target.
/// Consumed read-only by the baling and collapsing decisions.
#[derive(Clone, Debug)]
pub struct Subtarget {
    /// Native vector-register width in bytes; the alignment granule
    /// for raw operands.
    pub grf_bytes: u32,
    /// Representable immediate-offset range for indexed accesses.
    pub addr_offset_min: i64,
    pub addr_offset_max: i64,
    /// Whether an indirect access may straddle a register boundary.
    pub indirect_may_cross_grf: bool,
    /// Whether integer high-multiply is native.
    pub has_int_mul_high: bool,
    /// Whether 64-bit float arithmetic is native.
    pub has_fp64: bool,
}

impl Subtarget {
    /// The baseline target: 32-byte registers, no cross-register
    /// indirect accesses.
    pub fn base() -> Self {
        Subtarget {
            grf_bytes: 32,
            addr_offset_min: -512,
            addr_offset_max: 511,
            indirect_may_cross_grf: false,
            has_int_mul_high: true,
            has_fp64: true,
        }
    }

    /// Wide variant: 64-byte registers, cross-register indirect allowed.
    pub fn wide() -> Self {
        Subtarget {
            grf_bytes: 64,
            addr_offset_min: -512,
            addr_offset_max: 511,
            indirect_may_cross_grf: true,
            has_int_mul_high: true,
            has_fp64: false,
        }
    }

    pub fn is_addr_offset_ok(&self, offset: i64) -> bool {
        (self.addr_offset_min..=self.addr_offset_max).contains(&offset)
    }
}
