//! Voice module: speech synthesis, transcription of spoken input, and the
//! WAV container the synthesized PCM is wrapped in before playback.

pub mod stt;
pub mod tts;
pub mod types;
pub mod wav;

pub use stt::{MockSttProvider, SttProvider};
pub use tts::{MockSpeechBehavior, MockSpeechProvider, SpeechProvider};
pub use types::{AudioAsset, PcmAudio, WavFormat};
pub use wav::{WavHeader, WavSummary, encode_wav, inspect, parse_header};
