use std::path::PathBuf;
use std::sync::Arc;

use super::composer::AudioClip;
use crate::error::{MicAccessError, RecorderError};

/// Source of audio captures. Opening it is where permission is requested.
pub trait Microphone: Send + Sync {
    fn open(&self) -> Result<Box<dyn AudioStream>, MicAccessError>;
}

/// An open capture. Implementations release the device when dropped.
pub trait AudioStream: Send {
    fn finish(self: Box<Self>) -> Vec<u8>;
}

enum RecorderState {
    Idle,
    Recording(Box<dyn AudioStream>),
}

/// Two-state recorder: `Idle -> Recording -> Idle`.
pub struct AudioRecorder {
    microphone: Arc<dyn Microphone>,
    state: RecorderState,
}

impl AudioRecorder {
    pub fn new(microphone: Arc<dyn Microphone>) -> Self {
        Self {
            microphone,
            state: RecorderState::Idle,
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, RecorderState::Recording(_))
    }

    /// Label for the record button.
    pub fn label(&self) -> &'static str {
        if self.is_recording() { "Stop" } else { "Record" }
    }

    pub fn start(&mut self) -> Result<(), RecorderError> {
        if self.is_recording() {
            return Err(RecorderError::AlreadyRecording);
        }

        let stream = self.microphone.open().map_err(|err| {
            log::error!("Error accessing microphone: {err}");
            err
        })?;
        self.state = RecorderState::Recording(stream);
        log::info!("Recording started");
        Ok(())
    }

    /// Finish the current capture. Does nothing when idle.
    pub fn stop(&mut self) -> Option<AudioClip> {
        match std::mem::replace(&mut self.state, RecorderState::Idle) {
            RecorderState::Recording(stream) => {
                let clip = AudioClip::new(stream.finish());
                log::info!("Recording stopped ({} bytes)", clip.payload.len());
                Some(clip)
            }
            RecorderState::Idle => None,
        }
    }
}

/// Plays back a prerecorded file as if it had been captured live.
pub struct FileMicrophone {
    source: Option<PathBuf>,
}

impl FileMicrophone {
    pub fn new(source: Option<PathBuf>) -> Self {
        Self { source }
    }
}

impl Microphone for FileMicrophone {
    fn open(&self) -> Result<Box<dyn AudioStream>, MicAccessError> {
        let path = self.source.as_ref().ok_or(MicAccessError::Unavailable)?;
        let bytes = std::fs::read(path)
            .map_err(|err| MicAccessError::Denied(format!("{}: {err}", path.display())))?;
        Ok(Box::new(FileStream { bytes }))
    }
}

struct FileStream {
    bytes: Vec<u8>,
}

impl AudioStream for FileStream {
    fn finish(self: Box<Self>) -> Vec<u8> {
        self.bytes
    }
}
