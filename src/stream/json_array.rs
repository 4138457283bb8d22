/// Incremental splitter for a streamed top-level JSON array.
///
/// Vertex AI's `streamGenerateContent` (without `alt=sse`) answers with a
/// single JSON array whose elements arrive one by one:
/// `[{...}\n,\r\n{...}\n]`. The splitter yields each complete element as
/// soon as its closing brace arrives, regardless of how the bytes were
/// chunked.
#[derive(Debug, Default)]
pub struct JsonArraySplitter {
    current: Vec<u8>,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl JsonArraySplitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw text and append every completed element to `out`.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<String>) {
        for &byte in chunk.as_bytes() {
            if self.depth == 0 {
                // Between elements: only separators and the outer brackets.
                if byte == b'{' {
                    self.depth = 1;
                    self.current.push(byte);
                }
                continue;
            }

            self.current.push(byte);
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        let element = std::mem::take(&mut self.current);
                        out.push(String::from_utf8(element).unwrap_or_else(|err| {
                            String::from_utf8_lossy(err.as_bytes()).into_owned()
                        }));
                    }
                }
                _ => {}
            }
        }
    }

    /// Whether a partially received element is still buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.depth > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_elements_in_one_chunk() {
        let mut splitter = JsonArraySplitter::new();
        let mut out = Vec::new();
        splitter.feed_into("[{\"a\":1}\n,\r\n{\"b\":[1,{\"c\":2}]}\n]", &mut out);
        assert_eq!(out, vec!["{\"a\":1}", "{\"b\":[1,{\"c\":2}]}"]);
        assert!(!splitter.has_partial());
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let mut splitter = JsonArraySplitter::new();
        let mut out = Vec::new();
        splitter.feed_into(r#"[{"text":"a } { \" ] b"}]"#, &mut out);
        assert_eq!(out, vec![r#"{"text":"a } { \" ] b"}"#]);
    }

    #[test]
    fn test_split_across_every_boundary() {
        let input = r#"[{"text":"héllo \"x\" {"},{"n":[1,2]}]"#;
        let mut expected = Vec::new();
        JsonArraySplitter::new().feed_into(input, &mut expected);
        assert_eq!(expected.len(), 2);

        for split in (0..=input.len()).filter(|i| input.is_char_boundary(*i)) {
            let mut splitter = JsonArraySplitter::new();
            let mut out = Vec::new();
            splitter.feed_into(&input[..split], &mut out);
            splitter.feed_into(&input[split..], &mut out);
            assert_eq!(out, expected, "split at {split}");
        }
    }
}
