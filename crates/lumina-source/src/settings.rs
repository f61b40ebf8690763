//! Source settings and pipeline description generation.
//!
//! [`Settings`] mirrors the host's key/value settings object: user values sit
//! on top of registered defaults. [`SourceConfig`] is the typed view the
//! lifecycle manager works from. [`SharedSettings`] is the host-owned
//! object both sides hold: the properties view writes into it and the source
//! reads it back on update, hide and apply.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

/// Whether hiding the source stops the pipeline.
pub const KEY_STOP_ON_HIDE: &str = "stop_on_hide";
/// URI streamed by the source element.
pub const KEY_LOCATION: &str = "location";
/// Source element factory name.
pub const KEY_SOURCE_ELEMENT: &str = "source_element";
/// Wait for the GPU copy to finish before handling the next frame.
pub const KEY_SYNC_COPY: &str = "sync_copy";

/// Default page rendered by the source element.
pub const DEFAULT_LOCATION: &str =
    "https://webkit.org/blog-files/3d-transforms/poster-circle.html";
/// Default source element (WPE WebKit offscreen renderer).
pub const DEFAULT_SOURCE_ELEMENT: &str = "wpevideosrc";
/// Name of the appsink the frame handoff attaches to.
pub const VIDEO_SINK_NAME: &str = "video-sink";

/// A single settings value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Bool(bool),
    String(String),
}

/// Key/value settings with a separate layer of defaults.
///
/// Lookups fall back to the default layer, then to the type's zero value,
/// which is how the host's settings objects behave.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: HashMap<String, SettingValue>,
    defaults: HashMap<String, SettingValue>,
}

impl Settings {
    /// Creates an empty settings object.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.values.insert(key.to_owned(), SettingValue::Bool(value));
    }

    pub fn set_default_bool(&mut self, key: &str, value: bool) {
        self.defaults.insert(key.to_owned(), SettingValue::Bool(value));
    }

    pub fn set_string(&mut self, key: &str, value: impl Into<String>) {
        self.values
            .insert(key.to_owned(), SettingValue::String(value.into()));
    }

    pub fn set_default_string(&mut self, key: &str, value: impl Into<String>) {
        self.defaults
            .insert(key.to_owned(), SettingValue::String(value.into()));
    }

    /// Returns the bool stored under `key`, its default, or `false`.
    pub fn get_bool(&self, key: &str) -> bool {
        match self.lookup(key) {
            Some(SettingValue::Bool(value)) => *value,
            _ => false,
        }
    }

    /// Returns the string stored under `key`, its default, or `""`.
    pub fn get_string(&self, key: &str) -> &str {
        match self.lookup(key) {
            Some(SettingValue::String(value)) => value,
            _ => "",
        }
    }

    /// Returns true if a user value (not just a default) is set.
    pub fn has_user_value(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Removes the user value for `key`, exposing the default again.
    pub fn erase(&mut self, key: &str) {
        self.values.remove(key);
    }

    fn lookup(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key).or_else(|| self.defaults.get(key))
    }
}

/// Settings object owned by the host and shared with the source.
///
/// Clones refer to the same object, so edits made through one handle (for
/// example by a properties view that defers updates) are visible to the
/// source when it next reads.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings(Arc<Mutex<Settings>>);

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self(Arc::new(Mutex::new(settings)))
    }

    /// Locks the object for reading or editing.
    pub fn lock(&self) -> MutexGuard<'_, Settings> {
        self.0.lock()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.0.lock().get_bool(key)
    }

    /// Reads the current typed config.
    pub fn config(&self) -> SourceConfig {
        SourceConfig::from_settings(&self.0.lock())
    }

    /// Returns true if both handles refer to the same object.
    pub fn ptr_eq(&self, other: &SharedSettings) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Settings> for SharedSettings {
    fn from(settings: Settings) -> Self {
        Self::new(settings)
    }
}

/// How the GPU copy is marshalled onto the pipeline's GL thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyMode {
    /// Submit the copy and return immediately. The host may sample the
    /// texture before the copy lands.
    #[default]
    Detached,
    /// Block the streaming thread until the copy has run.
    Blocking,
}

/// Typed view over the settings the source reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub stop_on_hide: bool,
    pub location: String,
    pub source_element: String,
    pub copy_mode: CopyMode,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            stop_on_hide: true,
            location: DEFAULT_LOCATION.to_owned(),
            source_element: DEFAULT_SOURCE_ELEMENT.to_owned(),
            copy_mode: CopyMode::Detached,
        }
    }
}

impl SourceConfig {
    /// Writes the default value of every key this source reads.
    pub fn write_defaults(settings: &mut Settings) {
        settings.set_default_bool(KEY_STOP_ON_HIDE, true);
        settings.set_default_string(KEY_LOCATION, DEFAULT_LOCATION);
        settings.set_default_string(KEY_SOURCE_ELEMENT, DEFAULT_SOURCE_ELEMENT);
        settings.set_default_bool(KEY_SYNC_COPY, false);
    }

    /// Reads the config from host settings.
    ///
    /// Empty strings fall back to the built-in defaults so a settings object
    /// that never saw [`SourceConfig::write_defaults`] still yields a
    /// runnable pipeline.
    pub fn from_settings(settings: &Settings) -> Self {
        let location = match settings.get_string(KEY_LOCATION).trim() {
            "" => DEFAULT_LOCATION.to_owned(),
            location => location.to_owned(),
        };
        let source_element = match settings.get_string(KEY_SOURCE_ELEMENT).trim() {
            "" => DEFAULT_SOURCE_ELEMENT.to_owned(),
            element => element.to_owned(),
        };
        let copy_mode = if settings.get_bool(KEY_SYNC_COPY) {
            CopyMode::Blocking
        } else {
            CopyMode::Detached
        };

        Self {
            stop_on_hide: settings.get_bool(KEY_STOP_ON_HIDE),
            location,
            source_element,
            copy_mode,
        }
    }

    /// Builds the launch description for this config.
    ///
    /// The video branch goes through a `tee` so further branches (audio,
    /// recording) can be attached without touching the sink.
    pub fn pipeline_description(&self) -> String {
        format!(
            "{} location={} ! tee name=t t. ! queue ! appsink name={}",
            self.source_element,
            quote_launch_value(&self.location),
            VIDEO_SINK_NAME
        )
    }
}

/// Quotes a property value for a launch description when it contains
/// characters the launch parser would split on.
fn quote_launch_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '!' | '"' | '\'' | '\\' | ','));
    if !needs_quotes {
        return value.to_owned();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
