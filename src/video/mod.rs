mod assets;
mod generator;
pub mod probe;

pub use assets::AssetServer;
pub use generator::VideoGenerator;
