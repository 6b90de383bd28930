//! Native call bridge
//!
//! - `types`: type descriptors resolved to owned libffi type nodes
//! - `layout`: argument block offsets and scratch storage
//! - `marshal`: script value <-> native memory conversion
//! - `descriptor`: compiled call interfaces, including variadic extension
//! - `caller`: outbound native function objects
//! - `callbacks`: inbound trampolines for script functions
//! - `int64` / `pointer`: native-width integer and pointer wrappers
//!
//! # Safety
//!
//! Every `unsafe` block lives in this module (plus the exceptor). Callers of
//! the safe API are trusted on one point only: a native address paired with
//! a signature must really be a function of that signature.

pub mod callbacks;
pub mod caller;
pub mod descriptor;
pub mod int64;
pub mod layout;
pub mod marshal;
pub mod pointer;
pub mod types;

pub use callbacks::NativeCallback;
pub use caller::{CallOptions, CodeTraps, ExceptionBehavior, NativeFunction, ReturnShape, Scheduling};
pub use descriptor::{CallDescriptor, CallPlan, VARIADIC_MARKER};
pub use int64::{Int64, UInt64};
pub use pointer::NativePointer;
pub use types::{PrimitiveKind, TypeArena, TypeId, TypeNode};
