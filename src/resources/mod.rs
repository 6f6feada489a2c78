pub mod bridge;
pub mod machine;
pub mod subnet;
