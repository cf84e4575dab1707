use std::{cell::Cell, rc::Rc};

use futures::future::{FutureExt, LocalBoxFuture};
use js_sys::Uint8Array;
use wasm_bindgen::{closure::Closure, JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    AudioBuffer, AudioBufferSourceNode, AudioContext, AudioContextState, AudioScheduledSourceNode,
};

use super::{PlayerError, PlayerErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

/// A single-use scheduled source. Once started it can never be restarted.
pub trait ScheduledSource {
    /// Whether the source has rendered through to its end.
    fn has_played(&self) -> bool;

    /// Fails when the source was already stopped.
    fn stop(&self) -> Result<(), PlayerError>;
}

/// The audio graph every controller of a session shares.
pub trait AudioBackend: 'static {
    type Buffer: 'static;
    type Source: ScheduledSource + 'static;

    /// Monotonic context time in seconds.
    fn current_time(&self) -> f64;

    fn state(&self) -> ContextState;

    /// Requests the context to start rendering. Only effective inside a user
    /// gesture on most browsers.
    fn resume(&self);

    fn close(&self);

    fn decode(&self, bytes: Vec<u8>) -> LocalBoxFuture<'static, Result<Self::Buffer, PlayerError>>;

    /// Builds a fresh source for `buffer` and starts it at context time `when`.
    fn schedule_once(&self, buffer: &Self::Buffer, when: f64) -> Result<Self::Source, PlayerError>;

    /// Starts a silent one-sample source immediately.
    fn dry_fire(&self) -> Result<Self::Source, PlayerError>;
}

fn audio_error(action: &str, err: JsValue) -> PlayerError {
    PlayerError::new_code(PlayerErrorCode::Audio, format!("{}: {:?}", action, err))
}

pub struct WebAudioBackend {
    context: AudioContext,
}

impl WebAudioBackend {
    pub fn new() -> Result<WebAudioBackend, PlayerError> {
        let context =
            AudioContext::new().map_err(|err| audio_error("failed to create AudioContext", err))?;
        Ok(WebAudioBackend { context })
    }

    fn start_source(&self, buffer: &AudioBuffer, when: f64) -> Result<WebAudioSource, PlayerError> {
        let node = self
            .context
            .create_buffer_source()
            .map_err(|err| audio_error("failed to create source", err))?;
        node.set_buffer(Some(buffer));
        node.connect_with_audio_node(&self.context.destination())
            .map_err(|err| audio_error("failed to connect source to destination", err))?;

        let ended = Rc::new(Cell::new(false));
        let on_ended = {
            let ended = ended.clone();
            Closure::<dyn FnMut()>::new(move || ended.set(true))
        };
        let scheduled: &AudioScheduledSourceNode = node.as_ref();
        scheduled.set_onended(Some(on_ended.as_ref().unchecked_ref()));
        scheduled
            .start_with_when(when)
            .map_err(|err| audio_error("failed to start source", err))?;

        Ok(WebAudioSource {
            node,
            ended,
            _on_ended: on_ended,
        })
    }
}

impl AudioBackend for WebAudioBackend {
    type Buffer = AudioBuffer;
    type Source = WebAudioSource;

    fn current_time(&self) -> f64 {
        self.context.current_time()
    }

    fn state(&self) -> ContextState {
        match self.context.state() {
            AudioContextState::Running => ContextState::Running,
            AudioContextState::Closed => ContextState::Closed,
            _ => ContextState::Suspended,
        }
    }

    fn resume(&self) {
        if let Err(err) = self.context.resume() {
            log::warn!("failed to resume AudioContext: {:?}", err);
        }
    }

    fn close(&self) {
        if self.state() == ContextState::Closed {
            return;
        }
        if let Err(err) = self.context.close() {
            log::warn!("failed to close AudioContext: {:?}", err);
        }
    }

    fn decode(&self, bytes: Vec<u8>) -> LocalBoxFuture<'static, Result<AudioBuffer, PlayerError>> {
        let context = self.context.clone();
        async move {
            let array = Uint8Array::from(&bytes[..]);
            let promise = context
                .decode_audio_data(&array.buffer())
                .map_err(|err| PlayerError::new_code(PlayerErrorCode::Decode, format!("{:?}", err)))?;
            let decoded = JsFuture::from(promise)
                .await
                .map_err(|err| PlayerError::new_code(PlayerErrorCode::Decode, format!("{:?}", err)))?;
            Ok(AudioBuffer::from(decoded))
        }
        .boxed_local()
    }

    fn schedule_once(&self, buffer: &AudioBuffer, when: f64) -> Result<WebAudioSource, PlayerError> {
        self.start_source(buffer, when)
    }

    fn dry_fire(&self) -> Result<WebAudioSource, PlayerError> {
        let buffer = self
            .context
            .create_buffer(1, 1, 22050.0)
            .map_err(|err| audio_error("failed to create silent buffer", err))?;
        self.start_source(&buffer, 0.0)
    }
}

pub struct WebAudioSource {
    node: AudioBufferSourceNode,
    ended: Rc<Cell<bool>>,
    _on_ended: Closure<dyn FnMut()>,
}

impl WebAudioSource {
    fn scheduled(&self) -> &AudioScheduledSourceNode {
        self.node.as_ref()
    }
}

impl ScheduledSource for WebAudioSource {
    fn has_played(&self) -> bool {
        self.ended.get()
    }

    fn stop(&self) -> Result<(), PlayerError> {
        let result = self.scheduled().stop_with_when(0.0);
        let _ = self.node.disconnect();
        result.map_err(|err| audio_error("failed to stop source", err))
    }
}

impl Drop for WebAudioSource {
    fn drop(&mut self) {
        self.scheduled().set_onended(None);
    }
}
