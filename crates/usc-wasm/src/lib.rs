//! WebAssembly bindings for the userscript collection

use std::sync::OnceLock;

use usc_core::{
    manifest::render_status, match_patterns, CompiledMatcher, Manifest, MatchOptions, Selection,
};
use wasm_bindgen::prelude::*;

/// Userscript-manager features available on this page, detected once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RuntimeEnv {
    monkey: bool,
    gm_xhr: bool,
}

static RUNTIME_ENV: OnceLock<RuntimeEnv> = OnceLock::new();

fn has_global(name: &str) -> bool {
    js_sys::Reflect::has(&js_sys::global(), &JsValue::from_str(name)).unwrap_or(false)
}

fn runtime_env() -> RuntimeEnv {
    *RUNTIME_ENV.get_or_init(|| RuntimeEnv {
        monkey: has_global("GM_info"),
        gm_xhr: has_global("GM_xmlhttpRequest"),
    })
}

#[wasm_bindgen]
pub fn detect_environment() -> JsValue {
    let env = runtime_env();
    let result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&result, &"monkey".into(), &JsValue::from(env.monkey));
    let _ = js_sys::Reflect::set(&result, &"gmXhr".into(), &JsValue::from(env.gm_xhr));
    result.into()
}

fn parse_options(options_json: Option<String>) -> Result<MatchOptions, JsValue> {
    match options_json {
        Some(json) if !json.trim().is_empty() => serde_json::from_str(&json)
            .map_err(|e| JsValue::from_str(&format!("Invalid match options: {}", e))),
        _ => Ok(MatchOptions::default()),
    }
}

fn compile(patterns: &JsValue, options_json: Option<String>) -> Result<CompiledMatcher, JsValue> {
    let options = parse_options(options_json)?;
    let list = js_sys::Array::from(patterns);
    let mut sources = Vec::with_capacity(list.length() as usize);
    for value in list.iter() {
        let pattern = value
            .as_string()
            .ok_or_else(|| JsValue::from_str("Pattern must be a string"))?;
        sources.push(pattern);
    }
    Ok(match_patterns(sources, options))
}

fn selection_to_js(selection: &Selection) -> JsValue {
    let item = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&item, &"index".into(), &JsValue::from(selection.index as u32));
    let _ = js_sys::Reflect::set(&item, &"name".into(), &JsValue::from_str(&selection.display_name));
    let _ = js_sys::Reflect::set(&item, &"matched".into(), &JsValue::from(selection.matched));
    item.into()
}

/// Evaluate every script of the manifest against `href`.
///
/// Logs the status table to the console and returns `[{index, name, matched}]`
/// in manifest order.
#[wasm_bindgen]
pub fn run_selection(manifest_json: &str, href: &str) -> Result<JsValue, JsValue> {
    let manifest = Manifest::from_json(manifest_json)
        .map_err(|e| JsValue::from_str(&format!("Failed to load manifest: {}", e)))?;
    let selections = manifest
        .select(href, &MatchOptions::default())
        .map_err(|e| JsValue::from_str(&e.to_string()))?;

    web_sys::console::debug_1(&JsValue::from_str(&format!("\n{}", render_status(&selections))));

    let result = js_sys::Array::new();
    for selection in &selections {
        result.push(&selection_to_js(selection));
    }
    Ok(result.into())
}

/// [`run_selection`] against the current `location.href`.
#[wasm_bindgen]
pub fn run_selection_for_page(manifest_json: &str) -> Result<JsValue, JsValue> {
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("No window available"))?;
    let href = window.location().href()?;
    run_selection(manifest_json, &href)
}

/// `null` for a valid pattern set, otherwise the validation message.
#[wasm_bindgen]
pub fn validate_pattern(patterns: JsValue, options_json: Option<String>) -> Result<Option<String>, JsValue> {
    let matcher = compile(&patterns, options_json)?;
    Ok(matcher.error().map(|e| e.to_string()))
}

#[wasm_bindgen]
pub fn pattern_matches(patterns: JsValue, url: &str, options_json: Option<String>) -> Result<bool, JsValue> {
    let matcher = compile(&patterns, options_json)?;
    Ok(matcher.matches(url))
}

#[wasm_bindgen]
pub fn pattern_examples(patterns: JsValue, options_json: Option<String>) -> Result<JsValue, JsValue> {
    let matcher = compile(&patterns, options_json)?;
    let examples = js_sys::Array::new();
    for example in matcher.examples() {
        examples.push(&JsValue::from_str(example));
    }
    Ok(examples.into())
}
