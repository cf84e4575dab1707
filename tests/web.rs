#![cfg(target_arch = "wasm32")]

use chain_player::{
    player::audio_backend::{AudioBackend, ScheduledSource, WebAudioBackend},
    ChainPlayer,
};
use wasm_bindgen::JsValue;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

fn params(debug: bool) -> js_sys::Object {
    let params = js_sys::Object::new();
    js_sys::Reflect::set(
        &params,
        &JsValue::from_str("apiBaseUrl"),
        &JsValue::from_str("https://radio.example.com/"),
    )
    .unwrap();
    js_sys::Reflect::set(&params, &JsValue::from_str("debug"), &JsValue::from_bool(debug)).unwrap();
    params
}

#[wasm_bindgen_test]
fn test_player_starts_in_standby() {
    let player = ChainPlayer::new(Some(params(false)), None).unwrap();
    assert_eq!(player.state(), "standby");
    let body = web_sys::window().unwrap().document().unwrap().body().unwrap();
    assert!(body.class_list().contains("state-standby"));
    player.dispose();
}

#[wasm_bindgen_test]
fn test_invalid_engine_config_is_rejected() {
    assert!(ChainPlayer::new(Some(params(true)), Some("lead_seconds = -2.0".to_string())).is_err());
}

#[wasm_bindgen_test]
fn test_web_audio_source_starts_and_stops() {
    let audio = WebAudioBackend::new().unwrap();
    let source = audio.dry_fire().unwrap();
    assert!(source.stop().is_ok());
    drop(source);
    audio.close();
}
