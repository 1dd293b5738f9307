pub mod hash;
pub mod table;
