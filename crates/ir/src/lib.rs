#[macro_export]
macro_rules! entity_ref {
    {
        $(#[$attr:meta])*
        pub struct $ident:ident;
    } => {
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, PartialOrd, Ord, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(transparent)]
        $(#[$attr])*
        pub struct $ident(u32);

        impl ::cranelift_entity::EntityRef for $ident {
            fn new(i: usize) -> Self {
                if i >= u32::MAX as usize {
                    // u32::MAX is a reserved value
                    panic!(concat!("too many entity refs of type ", stringify!($ident)));
                }
                Self(i as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl ::cranelift_entity::packed_option::ReservedValue for $ident {
            fn is_reserved_value(&self) -> bool {
                self.0 == u32::MAX
            }

            fn reserved_value() -> Self {
                Self(u32::MAX)
            }
        }
    };
}

pub mod builder;
pub mod constant;
pub mod formatter;
pub mod func;
pub mod hash;
pub mod instr;
pub mod region;
pub mod typ;
pub mod validation;

pub use constant::{ConstData, ConstKind};
pub use func::{Block, ConstId, Func, FuncGroup, FuncId, GlobalId, Inst, Use, Value, ValueDef};
pub use instr::InstrData;
pub use region::Region;
pub use typ::{ElemKind, Type};
