/// Incremental UTF-8 decoder.
///
/// Holds back an incomplete multi-byte sequence at the end of a window until
/// the next window supplies the rest. Invalid sequences decode to U+FFFD, so
/// decoding never fails and the output does not depend on window boundaries.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next window. With `last` set, a dangling partial sequence
    /// is flushed as a replacement character.
    pub fn decode(&mut self, window: &[u8], last: bool) -> String {
        let joined;
        let mut rest: &[u8] = if self.pending.is_empty() {
            window
        } else {
            let mut buf = std::mem::take(&mut self.pending);
            buf.extend_from_slice(window);
            joined = buf;
            &joined
        };

        let mut out = String::with_capacity(rest.len());
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None if last => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            break;
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}
