use quickjs_rusty::OwnedJsValue;

/// A JavaScript value that was raised by the host instead of being returned.
///
/// The value is kept exactly as it was thrown so callers can inspect it
/// later, e.g. read back the `message` of an `Error` object.
#[derive(thiserror::Error, Debug, Clone)]
#[error("JavaScript error: {}", .value.js_to_string().unwrap_or_default())]
pub struct JsError {
    value: OwnedJsValue,
}

impl JsError {
    pub fn new(value: OwnedJsValue) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &OwnedJsValue {
        &self.value
    }

    pub fn into_value(self) -> OwnedJsValue {
        self.value
    }

    /// `toString()` of the thrown value, without the `JavaScript error:` prefix.
    pub fn message(&self) -> String {
        self.value.js_to_string().unwrap_or_default()
    }
}

impl From<OwnedJsValue> for JsError {
    fn from(value: OwnedJsValue) -> Self {
        Self::new(value)
    }
}
