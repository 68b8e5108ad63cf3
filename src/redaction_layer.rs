use lazy_static::lazy_static;
use regex::Regex;
use std::io::Write;
use tracing_subscriber::fmt::MakeWriter;

lazy_static! {
    static ref REDACTION_REGEX: Regex = Regex::new(
        r#"(?i)(Bearer\s+[^\s",]+|api-key[":=\s]+[A-Za-z0-9]{16,}|AccountKey=[^;\s"]+|\b[0-9a-f]{32}\b)"#
    )
    .expect("Invalid redaction regex");
}

pub fn redact_line(input: &str) -> std::borrow::Cow<'_, str> {
    REDACTION_REGEX.replace_all(input, "[REDACTED]")
}

pub struct RedactingWriter<W: Write> {
    inner: W,
}

impl<W: Write> RedactingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let input = String::from_utf8_lossy(buf);
        let redacted = redact_line(&input);
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Wraps a `MakeWriter` so every writer it hands out redacts.
#[derive(Clone)]
pub struct RedactingMakeWriter<M> {
    inner: M,
}

impl<M> RedactingMakeWriter<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<'a, M> MakeWriter<'a> for RedactingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = RedactingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new(self.inner.make_writer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_are_masked() {
        let line = r#"auth="Bearer eyJ0eXAi.abc" api-key: 0123456789abcdefABCDEF AccountKey=xyz==;"#;
        let out = redact_line(line);
        assert!(!out.contains("eyJ0eXAi"));
        assert!(!out.contains("0123456789abcdefABCDEF"));
        assert!(!out.contains("xyz=="));
    }

    #[test]
    fn writer_passes_plain_text() {
        let mut buf = Vec::new();
        {
            let mut w = RedactingWriter::new(&mut buf);
            w.write_all(b"hello world\n").unwrap();
        }
        assert_eq!(buf, b"hello world\n");
    }
}
