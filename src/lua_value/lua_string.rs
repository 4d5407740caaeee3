/// An interned, immutable byte sequence with a cached FNV-1a-32 hash
/// (spec §3 "String"). Lua source text is valid UTF-8 in this
/// implementation (no arbitrary binary string support), so the payload is
/// a plain `String`.
#[derive(Debug, Clone)]
pub struct LuaString {
    data: String,
    hash: u32,
}

impl LuaString {
    pub fn new(data: String, hash: u32) -> Self {
        Self { data, hash }
    }

    pub fn as_str(&self) -> &str {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }
}
