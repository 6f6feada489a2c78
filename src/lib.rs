pub mod constants;
pub mod controller;
pub mod driver;
pub mod machinery;
pub mod resources;
pub mod utils;
