pub mod context;
pub mod gates;
pub mod projects;
