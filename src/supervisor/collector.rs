use std::{
    io::{self, BufRead, BufReader, Read},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, warn};

/// Pause between reads of a non-blocking stream with nothing to read.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Background thread appending every line of a stream to a shared buffer.
///
/// The thread is the only writer. Anything read before [`OutputCollector::join`] returned may
/// be incomplete. Streams opened non-blocking can be stopped before EOF: the thread then drops
/// its end of the stream, so writers still holding the other end get `EPIPE` instead of
/// filling the pipe.
#[derive(Debug)]
pub(super) struct OutputCollector {
    buffer: Arc<Mutex<Vec<String>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl OutputCollector {
    /// Time a stopped collector gets to notice the stop request.
    pub(super) const STOP_GRACE: Duration = Duration::from_millis(200);

    pub(super) fn spawn<R: Read + Send + 'static>(stream: R) -> io::Result<OutputCollector> {
        let buffer = Arc::new(Mutex::new(vec![]));
        let stop = Arc::new(AtomicBool::new(false));
        let sink = buffer.clone();
        let stop_requested = stop.clone();
        let handle = thread::Builder::new()
            .name("output-collector".into())
            .spawn(move || collect_lines(stream, &sink, &stop_requested))?;
        Ok(OutputCollector {
            buffer,
            stop,
            handle: Some(handle),
        })
    }

    /// Everything collected so far.
    pub(super) fn snapshot(&self) -> String {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .concat()
    }

    /// Waits up to `timeout` for the stream to close; returns whether it did.
    ///
    /// On timeout the collector is asked to stop and gets [`Self::STOP_GRACE`] to do so. A
    /// collector blocked in a read cannot notice the request: it is detached and keeps its end
    /// of the stream until EOF.
    pub(super) fn join(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let reached_eof = wait_finished(&handle, timeout);
        if !reached_eof {
            self.stop.store(true, Ordering::Relaxed);
            if !wait_finished(&handle, Self::STOP_GRACE) {
                warn!("output collector blocked after {timeout:?}, detaching it");
                return false;
            }
            warn!("output stream still open after {timeout:?}, stopped reading it");
        }
        if handle.join().is_err() {
            warn!("output collector panicked");
        }
        reached_eof
    }
}

fn wait_finished(handle: &JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(IDLE_POLL.min(timeout / 10));
    }
    true
}

fn collect_lines<R: Read>(stream: R, sink: &Mutex<Vec<String>>, stop: &AtomicBool) {
    let push = |bytes: &[u8]| {
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(String::from_utf8_lossy(bytes).into_owned());
    };
    let mut reader = BufReader::new(stream);
    // survives `WouldBlock`, which can interrupt a line halfway
    let mut line = Vec::new();
    loop {
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                push(&line);
                line.clear();
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if stop.load(Ordering::Relaxed) {
                    debug!("stop requested before end of stream");
                    break;
                }
                thread::sleep(IDLE_POLL);
            }
            Err(e) => {
                if !line.is_empty() {
                    push(&line);
                    line.clear();
                }
                // best effort: the output is informative only
                push(format!("[stream read error] {e}\n").as_bytes());
                break;
            }
        }
    }
    if !line.is_empty() {
        push(&line);
    }
    debug!("output collection finished");
}
