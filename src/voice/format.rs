//! Audio container formats accepted for transcription

use std::fmt;

/// Container format of uploaded audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    #[default]
    Wav,
    Mp3,
    Webm,
    Ogg,
    M4a,
    Flac,
}

impl AudioFormat {
    /// Guess the format from a file name, extension or MIME type
    ///
    /// Unknown or missing hints fall back to WAV.
    #[must_use]
    pub fn from_hint(hint: Option<&str>) -> Self {
        hint.and_then(Self::detect).unwrap_or_default()
    }

    /// Recognize a file name, extension or MIME type, if it names a known format
    #[must_use]
    pub fn detect(hint: &str) -> Option<Self> {
        let hint = hint.trim().to_ascii_lowercase();

        // MIME types: audio/webm;codecs=opus, audio/mpeg, ...
        let token = hint
            .split(';')
            .next()
            .unwrap_or_default()
            .rsplit(['/', '.'])
            .next()
            .unwrap_or_default();

        match token {
            "wav" | "wave" | "x-wav" | "vnd.wave" => Some(Self::Wav),
            "mp3" | "mpeg" | "mpga" => Some(Self::Mp3),
            "webm" => Some(Self::Webm),
            "ogg" | "oga" | "opus" => Some(Self::Ogg),
            "m4a" | "mp4" | "x-m4a" | "aac" => Some(Self::M4a),
            "flac" | "x-flac" => Some(Self::Flac),
            _ => None,
        }
    }

    /// Pick the format of an upload from its file name, then its content type
    #[must_use]
    pub fn from_upload(file_name: Option<&str>, content_type: Option<&str>) -> Self {
        file_name
            .and_then(Self::detect)
            .or_else(|| content_type.and_then(Self::detect))
            .unwrap_or_default()
    }

    /// File extension without the dot
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Webm => "webm",
            Self::Ogg => "ogg",
            Self::M4a => "m4a",
            Self::Flac => "flac",
        }
    }

    /// MIME type sent to providers
    #[must_use]
    pub const fn mime(self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Mp3 => "audio/mpeg",
            Self::Webm => "audio/webm",
            Self::Ogg => "audio/ogg",
            Self::M4a => "audio/mp4",
            Self::Flac => "audio/flac",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guesses_from_file_names() {
        assert_eq!(AudioFormat::from_hint(Some("recording.webm")), AudioFormat::Webm);
        assert_eq!(AudioFormat::from_hint(Some("VOICE.MP3")), AudioFormat::Mp3);
        assert_eq!(AudioFormat::from_hint(Some("clip.flac")), AudioFormat::Flac);
    }

    #[test]
    fn guesses_from_mime_types() {
        assert_eq!(AudioFormat::from_hint(Some("audio/webm;codecs=opus")), AudioFormat::Webm);
        assert_eq!(AudioFormat::from_hint(Some("audio/mpeg")), AudioFormat::Mp3);
        assert_eq!(AudioFormat::from_hint(Some("audio/ogg")), AudioFormat::Ogg);
    }

    #[test]
    fn falls_back_to_wav() {
        assert_eq!(AudioFormat::from_hint(None), AudioFormat::Wav);
        assert_eq!(AudioFormat::from_hint(Some("")), AudioFormat::Wav);
        assert_eq!(AudioFormat::from_hint(Some("blob")), AudioFormat::Wav);
        assert_eq!(AudioFormat::from_hint(Some("application/octet-stream")), AudioFormat::Wav);
    }

    #[test]
    fn upload_prefers_name_then_content_type() {
        assert_eq!(AudioFormat::from_upload(Some("blob"), Some("audio/webm")), AudioFormat::Webm);
        assert_eq!(AudioFormat::from_upload(Some("take.mp3"), Some("audio/webm")), AudioFormat::Mp3);
        assert_eq!(AudioFormat::from_upload(None, Some("audio/ogg;codecs=opus")), AudioFormat::Ogg);
        assert_eq!(AudioFormat::from_upload(Some("blob"), Some("application/octet-stream")), AudioFormat::Wav);
        assert_eq!(AudioFormat::detect("blob"), None);
        assert_eq!(AudioFormat::detect("audio/wav"), Some(AudioFormat::Wav));
    }
}
