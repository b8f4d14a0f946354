pub mod approval;
pub mod role;
