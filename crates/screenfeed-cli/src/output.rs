//! Queues between capture callbacks and the stdout/stderr writers.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Result};
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{error, info, trace};

use screenfeed_core::{MediaSink, MediaUnit};

/// Counters reported when a writer finishes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriterStats {
    pub units: u64,
    pub bytes: u64,
    pub dropped: u64,
}

/// A bounded queue drained into `W` by a dedicated thread.
///
/// Sinks copy each unit and never block; a full queue drops the unit.
pub struct OutputChannel {
    name: &'static str,
    sender: Sender<Bytes>,
    dropped: Arc<AtomicU64>,
    worker: JoinHandle<WriterStats>,
}

impl OutputChannel {
    /// Start a writer thread. A write failure clears `running`.
    pub fn spawn<W>(
        name: &'static str,
        out: W,
        capacity: usize,
        running: Arc<AtomicBool>,
    ) -> Result<Self>
    where
        W: Write + Send + 'static,
    {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        let worker = thread::Builder::new()
            .name(format!("screenfeed-{name}-writer"))
            .spawn(move || drain(name, out, receiver, running))?;

        Ok(Self {
            name,
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
            worker,
        })
    }

    /// A capture sink feeding this queue.
    pub fn sink(&self) -> MediaSink {
        let sender = self.sender.clone();
        let dropped = Arc::clone(&self.dropped);
        let name = self.name;

        Box::new(move |unit: MediaUnit<'_>| {
            match sender.try_send(Bytes::copy_from_slice(unit.data)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    trace!(output = name, total, "Output queue full, dropping unit");
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        })
    }

    /// Wait for the writer to flush everything queued.
    ///
    /// Every sink handed out must have been dropped first, or this blocks.
    pub fn finish(self) -> Result<WriterStats> {
        let Self {
            name,
            sender,
            dropped,
            worker,
        } = self;
        drop(sender);

        let mut stats = worker
            .join()
            .map_err(|_| anyhow!("{name} writer thread panicked"))?;
        stats.dropped = dropped.load(Ordering::Relaxed);
        Ok(stats)
    }
}

fn drain<W: Write>(
    name: &'static str,
    mut out: W,
    receiver: Receiver<Bytes>,
    running: Arc<AtomicBool>,
) -> WriterStats {
    let mut stats = WriterStats::default();

    for unit in receiver.iter() {
        if let Err(e) = out.write_all(&unit).and_then(|()| out.flush()) {
            error!(output = name, "Write failed, stopping capture: {}", e);
            running.store(false, Ordering::SeqCst);
            break;
        }

        stats.units += 1;
        stats.bytes += unit.len() as u64;
        if stats.units <= 5 || stats.units % 100 == 0 {
            info!(output = name, count = stats.units, size = unit.len(), "Unit written");
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_units_are_written_in_order() {
        let buffer = SharedBuffer::default();
        let running = Arc::new(AtomicBool::new(true));
        let channel = OutputChannel::spawn("video", buffer.clone(), 16, running.clone()).unwrap();

        let mut sink = channel.sink();
        sink(MediaUnit {
            data: &[1, 2, 3],
            timestamp_ms: 0,
        });
        sink(MediaUnit {
            data: &[4, 5],
            timestamp_ms: 33,
        });
        drop(sink);

        let stats = channel.finish().unwrap();
        assert_eq!(
            stats,
            WriterStats {
                units: 2,
                bytes: 5,
                dropped: 0
            }
        );
        assert_eq!(*buffer.0.lock().unwrap(), vec![1, 2, 3, 4, 5]);
        assert!(running.load(Ordering::SeqCst));
    }

    #[test]
    fn test_write_failure_clears_running() {
        let running = Arc::new(AtomicBool::new(true));
        let channel = OutputChannel::spawn("audio", BrokenPipe, 4, running.clone()).unwrap();

        let mut sink = channel.sink();
        sink(MediaUnit {
            data: &[0; 8],
            timestamp_ms: 0,
        });
        drop(sink);

        let stats = channel.finish().unwrap();
        assert_eq!(stats.units, 0);
        assert!(!running.load(Ordering::SeqCst));
    }
}
