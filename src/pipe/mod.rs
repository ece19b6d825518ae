//! Byte-pipe abstraction: a uniform `open`/`close`/`write`/`read` surface
//! over whatever physical transport carries the 1284.4 session.
//!
//! `read` returns exactly what arrived in one underlying transfer (one USB
//! bulk-IN, or one OS `read(2)` on a character device); it must never
//! concatenate several transfers together, since the 1284.4 reassembly
//! logic in [`crate::d4`] depends on seeing transfers as the link saw them.

mod file;
#[cfg(feature = "usb")]
mod usb;

pub use file::FilePipe;
#[cfg(feature = "usb")]
pub use usb::{UsbDeviceInfo, UsbPipe};

use std::marker::PhantomData;

/// Errors a byte pipe can surface. Transport errors are fatal to the
/// current [`crate::d4::Link`] scope; there is no silent retry here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "usb")]
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("no USB printer interface found matching {0}")]
    NoMatchingInterface(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A physical transport: USB bulk endpoints, or a raw character device.
///
/// Implementors do their own open/close bookkeeping; [`Handle`] adds the
/// re-entrant scope counting on top so that nested callers don't reopen an
/// already-open pipe.
pub trait Pipe {
    fn open(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    /// Writes `data`, returning the number of bytes actually written.
    fn write(&mut self, data: &[u8]) -> Result<usize>;
    /// Reads up to `max` bytes (or an implementation-defined default) in a
    /// single underlying transfer. May return fewer bytes than requested.
    fn read(&mut self, max: Option<usize>) -> Result<Vec<u8>>;
}

impl Pipe for Box<dyn Pipe> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        (**self).write(data)
    }
    fn read(&mut self, max: Option<usize>) -> Result<Vec<u8>> {
        (**self).read(max)
    }
}

/// Reference-counted scope around a [`Pipe`]: the underlying transport is
/// opened on the first [`Handle::enter`] and closed on the last matching
/// [`Handle::exit`]. Not `Send`/`Sync` — scope counters are not safe to
/// acquire from more than one thread, matching the synchronous, single-link
/// concurrency model described for the session layer above this.
pub struct Handle<P> {
    pipe: P,
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl<P: Pipe> Handle<P> {
    pub fn new(pipe: P) -> Self {
        Self {
            pipe,
            depth: 0,
            _not_send: PhantomData,
        }
    }

    /// Enters the scope, opening the pipe if this is the outermost entry.
    pub fn enter(&mut self) -> Result<()> {
        if self.depth == 0 {
            self.pipe.open()?;
        }
        self.depth += 1;
        Ok(())
    }

    /// Exits the scope, closing the pipe once the outermost entry unwinds.
    pub fn exit(&mut self) -> Result<()> {
        debug_assert!(self.depth > 0, "Handle::exit without matching enter");
        self.depth -= 1;
        if self.depth == 0 {
            self.pipe.close()?;
        }
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.pipe.write(data)
    }

    pub fn read(&mut self, max: Option<usize>) -> Result<Vec<u8>> {
        self.pipe.read(max)
    }
}

impl<P: std::fmt::Debug> std::fmt::Debug for Handle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("pipe", &self.pipe)
            .field("depth", &self.depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct CountingPipe {
        opens: usize,
        closes: usize,
    }

    impl Pipe for CountingPipe {
        fn open(&mut self) -> Result<()> {
            self.opens += 1;
            Ok(())
        }
        fn close(&mut self) -> Result<()> {
            self.closes += 1;
            Ok(())
        }
        fn write(&mut self, data: &[u8]) -> Result<usize> {
            Ok(data.len())
        }
        fn read(&mut self, _max: Option<usize>) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn nested_enter_exit_opens_and_closes_once() {
        let mut h = Handle::new(CountingPipe::default());
        h.enter().unwrap();
        h.enter().unwrap();
        h.enter().unwrap();
        assert_eq!(h.pipe.opens, 1);
        h.exit().unwrap();
        assert_eq!(h.pipe.closes, 0);
        h.exit().unwrap();
        assert_eq!(h.pipe.closes, 0);
        h.exit().unwrap();
        assert_eq!(h.pipe.closes, 1);
    }
}
