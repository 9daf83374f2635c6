mod gemini;
mod tts;

pub use gemini::GeminiClient;
pub use tts::GoogleTts;
