use core::fmt;
use std::{
    any::Any,
    io::Write,
    sync::{Arc, Mutex},
};

// Sinks a port can write into
pub trait Writeable: Write + Any {}
impl<T: Write + Any> Writeable for T {}

/// Textual output port
///
/// Writes block on the inner mutex. Clones share the same sink.
#[derive(Clone)]
pub struct OutputPort {
    sink: Arc<Mutex<dyn Writeable>>,
}

impl OutputPort {
    pub fn stdout() -> Self {
        Self::from_writer(std::io::stdout())
    }

    /// A port collecting everything written to it, along with a handle to read it back.
    pub fn buffer() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                sink: buffer.clone(),
            },
            buffer,
        )
    }

    pub fn from_writer(writer: impl Writeable) -> Self {
        Self {
            sink: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.sink, &other.sink)
    }

    /// Writes text, surfacing sink failures as io errors.
    pub fn write_text(&mut self, text: &str) -> std::io::Result<()> {
        self.write_all(text.as_bytes())
    }
}

impl fmt::Debug for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<output port {:p}>", Arc::as_ptr(&self.sink))
    }
}

impl Write for OutputPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.sink.lock() {
            Ok(mut writer) => writer.write(buf),
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "output port was poisoned",
            )),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.sink.lock() {
            Ok(mut writer) => writer.flush(),
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "output port was poisoned",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::OutputPort;

    #[test]
    fn buffered_port_collects_text() {
        let (mut port, buffer) = OutputPort::buffer();
        let mut alias = port.clone();
        let_assert!(Ok(()) = port.write_text("hello "));
        let_assert!(Ok(()) = alias.write_text("world"));
        check!(port.ptr_eq(&alias));
        let_assert!(Ok(bytes) = buffer.lock());
        check!(String::from_utf8_lossy(&bytes) == "hello world");
    }
}
