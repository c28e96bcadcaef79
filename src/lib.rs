//! A GPU command-token compilation and replay engine.
//!
//! Compiles a large static scene (tens of thousands of independently
//! transformed mesh objects) into a binary command-token stream addressed
//! through raw GPU virtual addresses, deduplicating pipeline state into
//! captured state objects along the way, and replays the whole stream, or
//! any contiguous window of it, with a single driver call per frame.
//!
//! The vendor driver (bindless buffers/textures, state capture, token
//! replay) is consumed through the [`Driver`] trait; an in-memory
//! [`RecordingDriver`] backs headless validation and tests.
//!
//! Typical frame loop, once a [`SceneTree`] is loaded and uploaded:
//!
//! ```no_run
//! # use drawstream::*;
//! # use glam::Mat4;
//! # let mut driver = RecordingDriver::new();
//! # let mut scene = SceneTree::new();
//! # let registry = ShaderRegistry::new();
//! scene.upload_meshes(&mut driver);
//! let mut engine = TokenEngine::new(&mut driver, 1920, 1080)?;
//!
//! // per frame:
//! engine.update_scene_uniforms(&mut driver, Mat4::IDENTITY);
//! engine.bind_for_capture(&mut driver);
//! engine.compile(&mut driver, &scene, &registry);
//! engine.replay(&mut driver);
//! engine.blit_to_target(&mut driver);
//! # Ok::<(), CapabilityError>(())
//! ```

pub use glam;

pub mod cache;
pub mod driver;
pub mod engine;
pub mod loader;
pub mod mesh;
pub mod recording;
pub mod scene;
pub mod shaders;
pub mod token;

pub use cache::{StateCache, StateFingerprint};
pub use driver::{
    BufferId, CommandListHandle, Driver, DriverLimits, FramebufferHandle, GpuAddress,
    ProgramHandle, ShaderStage, StateHandle, StippleParams, TextureGpuHandle, TextureId,
    TokenSegments,
};
pub use engine::{
    CapabilityError, EngineStats, FallbackTarget, TokenEngine, TokenSequence, UBO_MATERIAL,
    UBO_OBJECT, UBO_SCENE,
};
pub use loader::{load_directory, LoadError, ObjectDescriptor};
pub use mesh::{AttribMask, Mesh, PrimitiveTopology, TopologyClass};
pub use recording::RecordingDriver;
pub use scene::{LeafData, LineStyle, SceneNode, SceneTree};
pub use shaders::ShaderRegistry;
