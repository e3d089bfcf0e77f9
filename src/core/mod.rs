pub mod audio;
pub mod carrier;
pub mod packet;
pub mod recorder;
pub mod streamer;
pub mod talking;
pub mod telephony;
pub mod transformer;
pub mod transport;

// Re-export commonly used types for convenience
pub use audio::{AudioConfig, AudioError, AudioFormat};
pub use carrier::{CarrierKind, CarrierOptions, create_streamer};
pub use streamer::{CallIdentity, StreamError, Streamer};
pub use talking::{CallServices, Talking, TalkingError};
pub use transformer::{SpeechToText, TextToSpeech, TransformerError};
