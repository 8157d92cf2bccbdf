pub mod backend;
pub mod camera;
pub mod geometry;
pub mod renderer;
pub mod resolve;
pub mod scene;
mod util;

pub use backend::{BackendConfig, Dispatch, Intersector, TriangleBvh, WorkerPool};
pub use camera::CameraParams;
pub use renderer::{Effect, OverflowPolicy, RenderError, RenderSettings, WavefrontRenderer};
pub use resolve::{Normalization, ResolvedImage};
pub use scene::{Scene, aggregate::SceneBuffers};
pub use util::{Rgb, Rgba, Stats};
