pub mod address_space;
pub mod process;
pub mod segment;
