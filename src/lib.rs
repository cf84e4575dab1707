mod js_api;
pub mod player;
#[cfg(any(test, feature = "testing"))]
#[doc(hidden)]
pub mod testing;
mod utils;

use std::rc::Rc;

use js_api::{object_to_pairs, DomStatusSink, SessionSnapshot};
use js_sys::{Object, Promise};
use url::Url;
use utils::{init_logging, set_panic_hook};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

use player::{
    api_client::FetchApiClient,
    audio_backend::WebAudioBackend,
    clock::BrowserClock,
    config::{EmbedParams, EngineConfig},
    cycle::BrowserSpawner,
    PlayerError, PlayerErrorCode, PlayerSession, SessionDeps,
};

fn page_url() -> Result<Url, PlayerError> {
    let href = web_sys::window()
        .ok_or_else(|| PlayerError::new("no window".to_string()))?
        .location()
        .href()
        .map_err(|err| PlayerError::new(format!("cannot read page location: {:?}", err)))?;
    Url::parse(&href).map_err(|err| {
        PlayerError::new_code(PlayerErrorCode::InvalidUrl, format!("{}: {}", href, err))
    })
}

/// Browser entry point. Owns one session and its audio context.
#[wasm_bindgen]
pub struct ChainPlayer {
    session: PlayerSession<WebAudioBackend>,
    params: EmbedParams,
}

#[wasm_bindgen]
impl ChainPlayer {
    /// `params` overrides the page's query string; `engine_config` is an
    /// optional TOML document.
    #[wasm_bindgen(constructor)]
    pub fn new(params: Option<Object>, engine_config: Option<String>) -> Result<ChainPlayer, JsValue> {
        let config = match engine_config {
            Some(source) => EngineConfig::from_toml(&source)?,
            None => EngineConfig::default(),
        };
        init_logging(config.level_filter()?);

        let page_url = page_url()?;
        let params = match params {
            Some(params) => EmbedParams::from_pairs(object_to_pairs(&params))?,
            None => EmbedParams::from_url(&page_url)?,
        };
        let api_base = params.api_base_or(&page_url)?;
        log::info!("chain player using API at {}", api_base);

        let session = PlayerSession::new(
            config.clone(),
            SessionDeps {
                clock: Rc::new(BrowserClock),
                api: Rc::new(FetchApiClient::new(api_base)?),
                audio: Rc::new(WebAudioBackend::new()?),
                status: Rc::new(DomStatusSink::new(params.debug, config.debug_log_capacity)),
                spawner: Rc::new(BrowserSpawner),
            },
        )?;
        if let Some(origin) = params.start_at_millis_utc {
            session.pin_origin(origin)?;
        }

        if let Some(chain_id) = params.chain.clone() {
            let session = session.clone();
            wasm_bindgen_futures::spawn_local(async move {
                if let Err(err) = session.play(&chain_id).await {
                    log::warn!("autoplay of chain {} failed: {}", chain_id, err);
                }
            });
        }
        Ok(ChainPlayer { session, params })
    }

    /// Binds the player to a chain, the embed's `chain` parameter by default.
    /// Resolves with the chain name once it waits for `unlock`, or keeps
    /// playing straight away when audio was already unlocked.
    pub fn play(&self, chain_id: Option<String>) -> Promise {
        let chain_id = chain_id.or_else(|| self.params.chain.clone());
        let session = self.session.clone();
        future_to_promise(async move {
            let chain_id = chain_id
                .ok_or_else(|| PlayerError::new("no chain to play".to_string()))?;
            let chain = session.play(&chain_id).await?;
            if session.is_unlocked() {
                session.resume()?;
            }
            Ok::<JsValue, JsValue>(JsValue::from_str(&chain.name))
        })
    }

    /// Call from a click or touch handler.
    pub fn unlock(&self) -> Result<(), JsValue> {
        let session = self.session.clone();
        self.session.unlock(move || {
            if let Err(err) = session.resume() {
                log::warn!("cannot resume after unlock: {}", err);
            }
        })?;
        Ok(())
    }

    /// Resolves once the stop has settled.
    pub fn stop(&self) -> Promise {
        let settle = self.session.stop();
        future_to_promise(async move {
            settle.await;
            Ok::<JsValue, JsValue>(JsValue::UNDEFINED)
        })
    }

    pub fn dispose(&self) {
        self.session.dispose();
    }

    #[wasm_bindgen(getter)]
    pub fn state(&self) -> String {
        self.session.state().name().to_string()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let progress = self.session.load_progress();
        SessionSnapshot {
            state: self.session.state().name().to_string(),
            chain_id: self.session.chain().map(|chain| chain.id),
            loaded: progress.loaded,
            total: progress.total,
            unlocked: self.session.is_unlocked(),
        }
    }

    #[wasm_bindgen(js_name = debugLog)]
    pub fn debug_log(&self, lines: usize) -> String {
        self.session.debug_log().read_tail(lines)
    }
}

#[wasm_bindgen(start)]
pub fn main() {
    set_panic_hook();
}
