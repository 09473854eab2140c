pub mod block;
pub mod emit;
