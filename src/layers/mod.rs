//! Layer abstractions and implementations
//!
//! This module provides the [`Layer`] trait and the concrete layers that can be
//! chained inside a [`Network`](crate::network::Network). All shapes are const
//! generic parameters; activation, optimizer and error metric are type
//! parameters resolved at compile time.

mod r#trait;
pub mod conv2;
pub mod dense;
pub mod depthwise;
pub mod downscale2;
pub mod local2;
pub mod params;
pub mod upscale2;
pub mod utility;
pub mod variation;

pub use conv2::{index_c, Conv2Layer};
pub use dense::DenseLayer;
pub use depthwise::DepthwiseConv2Layer;
pub use downscale2::{Add, Avg, Downscale2Layer, Max, Min, Pooling};
pub use local2::Local2Layer;
pub use params::{Init, Params, Scaling};
pub use r#trait::{Layer, LayerKind, Signal};
pub use upscale2::Upscale2Layer;
pub use utility::{EffectLayer, ErrorLayer, FilterLayer};
pub use variation::VariationLayer;
