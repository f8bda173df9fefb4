pub mod id;
pub mod sign;
