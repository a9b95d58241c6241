//! JSON Patch accumulation for decision callbacks.

use json_patch::jsonptr::PointerBuf;
use json_patch::{AddOperation, Patch, PatchOperation, ReplaceOperation};
use serde_json::Value;

/// Build a JSON pointer from unescaped path segments.
///
/// `/` and `~` inside a segment are escaped as `~1` and `~0`, so annotation
/// keys such as `service.kubernetes.io/foo` can be passed as-is.
pub fn pointer<'a, I>(segments: I) -> PointerBuf
where
    I: IntoIterator<Item = &'a str>,
{
    PointerBuf::from_tokens(segments)
}

/// Ordered patch operations collected while deciding on one request.
///
/// Order is preserved: later operations may rely on structure created by
/// earlier ones, e.g. an annotations map added before a key is written into it.
#[derive(Debug, Default, Clone)]
pub struct Patches(Vec<PatchOperation>);

impl Patches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an `add` operation (inserts, or replaces an existing member)
    pub fn add(&mut self, path: PointerBuf, value: Value) -> &mut Self {
        self.push(PatchOperation::Add(AddOperation { path, value }))
    }

    /// Append a `replace` operation
    pub fn replace(&mut self, path: PointerBuf, value: Value) -> &mut Self {
        self.push(PatchOperation::Replace(ReplaceOperation { path, value }))
    }

    /// Append an arbitrary operation
    pub fn push(&mut self, op: PatchOperation) -> &mut Self {
        self.0.push(op);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Serialize the operations as a JSON array
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.0)
    }

    pub fn into_patch(self) -> Patch {
        Patch(self.0)
    }
}
