//! WGSL shader sources embedded at compile time.

/// Container for all shader source code.
pub struct Shaders;

impl Shaders {
    /// The four equalisation stages, one entry point each.
    pub const EQUALIZE: &'static str = include_str!("equalize.wgsl");
}
