//! Shared test utilities
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parley_gateway::llm::FragmentStream;
use parley_gateway::voice::Transcription;
use parley_gateway::{
    AudioFormat, ChatBackend, CompletionAdapter, CompletionOptions, Error, Orchestrator, Result,
    ScratchDir, SynthesisAdapter, Synthesizer, Transcriber, TranscriptionAdapter, Turn,
};

/// What the mock chat backend does on every call
#[derive(Clone)]
pub enum ChatScript {
    Reply(String),
    Fail(String),
    Fragments(Vec<String>),
}

/// Chat backend that answers from a script and records every prompt
pub struct MockChat {
    script: ChatScript,
    prompts: Mutex<Vec<Vec<Turn>>>,
}

impl MockChat {
    pub fn new(script: ChatScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(text: &str) -> Arc<Self> {
        Self::new(ChatScript::Reply(text.to_string()))
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::new(ChatScript::Fail(message.to_string()))
    }

    pub fn streaming(fragments: &[&str]) -> Arc<Self> {
        Self::new(ChatScript::Fragments(
            fragments.iter().map(ToString::to_string).collect(),
        ))
    }

    /// Prompts seen so far, in call order
    pub fn prompts(&self) -> Vec<Vec<Turn>> {
        self.prompts.lock().unwrap().clone()
    }

    fn record(&self, turns: &[Turn]) {
        self.prompts.lock().unwrap().push(turns.to_vec());
    }
}

#[async_trait]
impl ChatBackend for MockChat {
    async fn complete(&self, turns: &[Turn], _options: &CompletionOptions) -> Result<String> {
        self.record(turns);
        match &self.script {
            ChatScript::Reply(text) => Ok(text.clone()),
            ChatScript::Fail(message) => Err(Error::upstream(message.clone())),
            ChatScript::Fragments(fragments) => Ok(fragments.concat()),
        }
    }

    async fn complete_stream(
        &self,
        turns: &[Turn],
        _options: &CompletionOptions,
    ) -> Result<FragmentStream> {
        self.record(turns);
        match &self.script {
            ChatScript::Reply(text) => Ok(Box::pin(futures::stream::iter(vec![Ok(text.clone())]))),
            ChatScript::Fail(message) => Err(Error::upstream(message.clone())),
            ChatScript::Fragments(fragments) => Ok(Box::pin(futures::stream::iter(
                fragments.clone().into_iter().map(Ok).collect::<Vec<_>>(),
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Transcriber that returns fixed text and records the files it was handed
pub struct MockTranscriber {
    text: Option<String>,
    seen: Mutex<Vec<(PathBuf, AudioFormat, bool)>>,
}

impl MockTranscriber {
    pub fn returning(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: Some(text.to_string()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            text: None,
            seen: Mutex::new(Vec::new()),
        })
    }

    /// `(path, format, file existed during the call)` per call
    pub fn seen(&self) -> Vec<(PathBuf, AudioFormat, bool)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, path: &Path, format: AudioFormat) -> Result<Transcription> {
        self.seen
            .lock()
            .unwrap()
            .push((path.to_path_buf(), format, path.exists()));

        match &self.text {
            Some(text) => Ok(Transcription {
                text: text.clone(),
                ..Transcription::default()
            }),
            None => Err(Error::upstream("transcription service unavailable")),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Synthesizer that returns fixed bytes
pub struct MockSynthesizer {
    audio: Option<Vec<u8>>,
}

impl MockSynthesizer {
    pub fn returning(audio: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            audio: Some(audio.to_vec()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self { audio: None })
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, _text: &str, _language: &str) -> Result<Vec<u8>> {
        self.audio
            .clone()
            .ok_or_else(|| Error::upstream("synthesis service unavailable"))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Default seed used by every test orchestrator
pub fn seed() -> Turn {
    Turn::assistant("You are a helpful assistant. Ask me anything.")
}

/// Wire mocks into an orchestrator whose scratch files live in `scratch`
pub fn build_orchestrator(
    chat: Arc<MockChat>,
    transcriber: Arc<MockTranscriber>,
    synthesizer: Arc<MockSynthesizer>,
    scratch: &Path,
    stream: bool,
) -> Orchestrator {
    let options = CompletionOptions {
        stream,
        ..CompletionOptions::default()
    };
    let scratch = ScratchDir::at(scratch);

    Orchestrator::new(
        seed(),
        CompletionAdapter::new(chat, options).with_timeout(Duration::from_secs(5)),
        TranscriptionAdapter::new(transcriber, scratch.clone()),
        SynthesisAdapter::new(synthesizer, scratch),
    )
}

/// Number of entries left in a directory
pub fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map_or(0, Iterator::count)
}
