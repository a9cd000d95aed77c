//! Function registry for the Quarry compiler.
//!
//! Architecture role:
//! - typed UDF/UDAF call descriptors the expression compiler and group-by
//!   planner bind against at analysis time
//! - the implicit-conversion table and common-class rule used for overload
//!   resolution, join-key unification, and parameter coercion
//!
//! Key modules:
//! - [`registry`]
//! - [`types`]

pub mod registry;
pub mod types;

pub use registry::{
    Registry, UdafDescriptor, UdfDescriptor, ITERATE, MERGE, TERMINATE, TERMINATE_PARTIAL,
};
pub use types::{common_class, implicit_convertible, is_numeric, is_primitive, type_name,
    wider_numeric};
