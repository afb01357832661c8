pub mod branch;
pub mod tenant;
