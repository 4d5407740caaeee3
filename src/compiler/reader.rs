/// Host-provided source reader (spec §6 "Reader callback for load").
///
/// Each call returns the next chunk of source text, or `None` once
/// exhausted. The lexer drains a `Reader` fully into its own owned buffer
/// before scanning (spec §4.4: "the lexer owns a single shared buffer...
/// reset between tokens" refers to the *lexeme* accumulator, not to
/// retaining the reader's returned slices across calls — this
/// implementation never holds onto a chunk past the call that produced it).
pub trait Reader {
    fn read_chunk(&mut self) -> Option<String>;
}

/// The common case: the whole source is already in memory. Yields it once.
pub struct StringReader<'a> {
    source: &'a str,
    done: bool,
}

impl<'a> StringReader<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { source, done: false }
    }
}

impl<'a> Reader for StringReader<'a> {
    fn read_chunk(&mut self) -> Option<String> {
        if self.done {
            None
        } else {
            self.done = true;
            Some(self.source.to_string())
        }
    }
}

/// Drain `reader` to end of input, concatenating every chunk it yields.
pub fn drain(reader: &mut dyn Reader) -> String {
    let mut buf = String::new();
    while let Some(chunk) = reader.read_chunk() {
        if chunk.is_empty() {
            break;
        }
        buf.push_str(&chunk);
    }
    buf
}
