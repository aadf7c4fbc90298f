pub mod bootstrap;
pub mod plan;
pub mod untar;
