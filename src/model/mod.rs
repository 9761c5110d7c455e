mod padding;
mod transformer;
mod vgg;

pub use padding::*;
pub use transformer::*;
pub use vgg::*;
