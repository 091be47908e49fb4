pub mod frame;
pub mod geometry;
pub mod initializer;
pub mod io;
