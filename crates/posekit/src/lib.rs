#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use posekit_pnp as pnp;

#[doc(inline)]
pub use posekit_metrics as metrics;

#[doc(inline)]
pub use posekit_eval as eval;
