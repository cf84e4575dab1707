use js_sys::{Array, Object};
use wasm_bindgen::prelude::*;
use web_sys::{Document, Element};

use crate::player::{
    debug_log::LogEntry,
    status::{LoadProgress, PlayerState, StatusSink},
    PlayerError,
};

pub fn safe_string(s: &str) -> String {
    String::from_utf8_lossy(s.as_bytes()).into_owned()
}

#[wasm_bindgen]
extern "C" {
    fn alert(s: &str);
}

impl From<PlayerError> for JsValue {
    fn from(err: PlayerError) -> JsValue {
        js_sys::Error::new(&format!("{:?}: {}", err.code, err.message)).into()
    }
}

/// Reads a plain `{key: value}` object into string pairs. Numbers and
/// booleans are stringified; other values are ignored.
pub fn object_to_pairs(params: &Object) -> Vec<(String, String)> {
    let mut pairs = vec![];
    for entry in Object::entries(params).iter() {
        let entry = Array::from(&entry);
        let Some(key) = entry.get(0).as_string() else {
            continue;
        };
        let value = entry.get(1);
        let value = if let Some(value) = value.as_string() {
            value
        } else if let Some(value) = value.as_f64() {
            value.to_string()
        } else if let Some(value) = value.as_bool() {
            value.to_string()
        } else {
            continue;
        };
        pairs.push((key, value));
    }
    pairs
}

#[wasm_bindgen(getter_with_clone)]
pub struct SessionSnapshot {
    pub state: String,
    pub chain_id: Option<String>,
    pub loaded: usize,
    pub total: usize,
    pub unlocked: bool,
}

/// Renders session status into the host page: a `state-<name>` class on
/// `<body>`, the status element's text and, in debug mode, a scrolling log.
pub struct DomStatusSink {
    document: Option<Document>,
    status_id: String,
    debug_log_id: String,
    debug: bool,
    log_capacity: usize,
}

impl DomStatusSink {
    pub fn new(debug: bool, log_capacity: usize) -> DomStatusSink {
        DomStatusSink {
            document: web_sys::window().and_then(|window| window.document()),
            status_id: "status".to_string(),
            debug_log_id: "debug-log".to_string(),
            debug,
            log_capacity: log_capacity.max(1),
        }
    }

    fn element(&self, id: &str) -> Option<Element> {
        self.document.as_ref()?.get_element_by_id(id)
    }

    fn status_text(state: PlayerState, progress: LoadProgress) -> String {
        if state == PlayerState::Syncing && progress.total > 0 {
            return format!("{} {}/{}", state.status_text(), progress.loaded, progress.total);
        }
        state.status_text().to_string()
    }
}

impl StatusSink for DomStatusSink {
    fn state_changed(&self, state: PlayerState, progress: LoadProgress) {
        if let Some(body) = self.document.as_ref().and_then(|document| document.body()) {
            let classes = body.class_list();
            for other in PlayerState::all() {
                let _ = classes.remove_1(&other.css_class());
            }
            let _ = classes.add_1(&state.css_class());
        }
        if let Some(status) = self.element(&self.status_id) {
            status.set_text_content(Some(&DomStatusSink::status_text(state, progress)));
        }
    }

    fn log_entry(&self, entry: &LogEntry) {
        if !self.debug || entry.level > log::Level::Info {
            return;
        }
        let (Some(document), Some(list)) = (self.document.as_ref(), self.element(&self.debug_log_id))
        else {
            return;
        };
        let Ok(item) = document.create_element("li") else {
            return;
        };
        item.set_class_name(&format!("log-{}", entry.level.as_str().to_ascii_lowercase()));
        item.set_text_content(Some(&safe_string(&entry.message)));
        if list.append_child(&item).is_err() {
            return;
        }
        while list.child_element_count() as usize > self.log_capacity {
            match list.first_element_child() {
                Some(oldest) => oldest.remove(),
                None => break,
            }
        }
    }

    fn alert(&self, message: &str) {
        alert(message);
    }
}
