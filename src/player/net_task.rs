use js_sys::Uint8Array;
use log::debug;
use url::Url;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Request, RequestInit, Response};

use super::{PlayerError, PlayerErrorCode};

pub type NetResult = Result<Vec<u8>, PlayerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Json,
    Binary,
}

impl ResponseKind {
    fn accept(&self) -> &'static str {
        match self {
            ResponseKind::Json => "application/vnd.api+json, application/json",
            ResponseKind::Binary => "*/*",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NetTask {
    pub url: Url,
    pub kind: ResponseKind,
}

impl NetTask {
    pub fn json(url: Url) -> NetTask {
        NetTask {
            url,
            kind: ResponseKind::Json,
        }
    }

    pub fn binary(url: Url) -> NetTask {
        NetTask {
            url,
            kind: ResponseKind::Binary,
        }
    }
}

fn network_error(task: &NetTask, detail: String) -> PlayerError {
    PlayerError::new_code(
        PlayerErrorCode::Network,
        format!("GET {} failed: {}", task.url, detail),
    )
}

/// Issues one GET and resolves with the whole response body.
pub async fn fetch_net_task(task: &NetTask) -> NetResult {
    debug!("fetch {:?} {}", task.kind, task.url);

    let window = web_sys::window().ok_or_else(|| network_error(task, "no window".to_string()))?;

    let init = RequestInit::new();
    init.set_method("GET");
    let request = Request::new_with_str_and_init(task.url.as_str(), &init)
        .map_err(|err| network_error(task, format!("{:?}", err)))?;
    request
        .headers()
        .set("Accept", task.kind.accept())
        .map_err(|err| network_error(task, format!("{:?}", err)))?;

    let resp_value = JsFuture::from(window.fetch_with_request(&request))
        .await
        .map_err(|err| network_error(task, format!("{:?}", err)))?;
    let resp: Response = resp_value
        .dyn_into()
        .map_err(|_| network_error(task, "not a Response".to_string()))?;

    if !resp.ok() {
        return Err(PlayerError::new_code(
            PlayerErrorCode::Http(resp.status()),
            format!("GET {} returned {}", task.url, resp.status()),
        ));
    }

    let body = resp
        .array_buffer()
        .map_err(|err| network_error(task, format!("{:?}", err)))?;
    let body = JsFuture::from(body)
        .await
        .map_err(|err| network_error(task, format!("{:?}", err)))?;
    Ok(Uint8Array::new(&body).to_vec())
}
