//! Codegen decision core for the vector backend.
//!
//! Three cooperating analyses decide how the legalized vector IR maps
//! onto machine instructions:
//!
//! * [`baling`] groups chains of instructions that must be emitted as
//!   one machine instruction and records, per instruction, which
//!   operand edges are fused.
//! * [`collapse`] merges nested region accesses into single combined
//!   regions before emission decisions are made.
//! * [`liveness`] computes interval live ranges over the global
//!   instruction numbering, feeding the register allocator's
//!   interference and coalescing queries.
//!
//! Ordering discipline: baling must be (re)run before emission
//! consumes its side table; liveness must be rebuilt after any pass
//! that inserts, deletes, or moves instructions. Passes that mutate
//! the IR (collapse) refresh the baling info for the instructions they
//! touch through [`baling::Baling::reanalyze`].

pub mod bale;
pub mod baling;
pub mod collapse;
pub mod ident;
pub mod live_range;
pub mod liveness;
pub mod numbering;
pub mod subtarget;

pub use bale::{Bale, BaleInfo, BaleKind};
pub use baling::{Baling, GroupBaling};
pub use liveness::Liveness;
pub use numbering::Numbering;
pub use subtarget::Subtarget;
