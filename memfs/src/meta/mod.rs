//! File metadata
//!
//! Submodules:
//! - `fd`: bounded descriptor pool
//! - `table`: fixed-capacity file table and its entries
pub mod fd;
pub mod table;
