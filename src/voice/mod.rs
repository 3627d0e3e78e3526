//! Voice processing module
//!
//! Transcription of uploaded audio and synthesis of spoken replies. Both
//! stage audio through scratch files that never outlive a single call.

mod format;
mod stt;
mod tts;

pub use format::AudioFormat;
pub use stt::{SpeechToText, SttProvider, Transcriber, Transcription, TranscriptionAdapter};
pub use tts::{
    AUDIO_MPEG, SynthesisAdapter, SynthesizedAudio, Synthesizer, TextToSpeech, TtsProvider,
};
