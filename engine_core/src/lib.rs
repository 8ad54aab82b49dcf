#![forbid(unsafe_code)]
//! Shared engine services: the logging facade and the texture manager.

pub mod logging;
pub mod textures;

pub use textures::{DirTextureSource, Texture, TextureManager, TextureSource, DEFAULT_TEXTURE_NAME};
