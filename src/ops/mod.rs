pub mod adjustments;
pub mod sampler;
pub mod text;
