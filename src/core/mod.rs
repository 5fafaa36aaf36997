pub mod gpu_2d;
pub mod gpu_3d;
pub mod memory;
