pub mod length;
pub mod lowercase;
