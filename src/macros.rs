//! # Internal Macros
//!
//! Accessor generation for zerocopy structs whose fields use little-endian
//! wrapper types (`U16`, `U32`, `U64`). On-disk headers in this crate are
//! read-only, so only getters are generated.
//!
//! ```ignore
//! use zerocopy::little_endian::{U16, U64};
//!
//! #[repr(C)]
//! struct PageHeader {
//!     lsn: U64,
//!     lower: U16,
//! }
//!
//! impl PageHeader {
//!     zerocopy_getters! {
//!         lsn: u64,
//!         lower: u16,
//!     }
//! }
//! ```

/// Generates getter methods for zerocopy little-endian fields.
#[macro_export]
macro_rules! zerocopy_getters {
    ($($field:ident : $native_ty:ty),* $(,)?) => {
        $(
            #[inline]
            pub fn $field(&self) -> $native_ty {
                self.$field.get()
            }
        )*
    };
}
