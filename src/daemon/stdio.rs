//! JSON-RPC over stdin/stdout.
//!
//! Lines are read on the calling thread and handed to a fixed pool of
//! workers over a bounded channel. Each worker writes its response as soon
//! as it is done, so responses may arrive out of request order; callers
//! match them by `id`.

use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, bounded};

use super::handler::{Context, handle_line, write_reply};
use crate::protocol::read_line;

/// Pending lines allowed per worker before the reader blocks.
const QUEUE_PER_WORKER: usize = 16;

fn spawn_worker<W: Write + Send + 'static>(
    index: usize,
    ctx: Arc<Context>,
    lines: Receiver<String>,
    writer: Arc<Mutex<W>>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("gitpilot-worker-{}", index))
        .spawn(move || {
            for line in lines {
                let reply = handle_line(&ctx, &line);
                let mut out = writer.lock().unwrap_or_else(|e| e.into_inner());
                if let Err(e) = write_reply(&mut *out, &reply) {
                    log::warn!("Failed to write response: {}", e);
                }
            }
        })
}

/// Serve requests from `reader` until EOF or a `stop` request, writing
/// responses to `writer`.
///
/// `stopped` is checked between lines, so a line read while `stop` is still
/// being handled is served too. Every request already read is answered
/// before this returns.
pub fn serve<R, W>(
    ctx: Arc<Context>,
    stopped: &Receiver<()>,
    mut reader: R,
    writer: W,
    workers: usize,
) -> std::io::Result<()>
where
    R: BufRead,
    W: Write + Send + 'static,
{
    let workers = workers.max(1);
    let (sender, receiver) = bounded::<String>(workers * QUEUE_PER_WORKER);
    let writer = Arc::new(Mutex::new(writer));

    let handles = (0..workers)
        .map(|i| spawn_worker(i, Arc::clone(&ctx), receiver.clone(), Arc::clone(&writer)))
        .collect::<std::io::Result<Vec<_>>>()?;
    drop(receiver);
    log::info!("Serving JSON-RPC on stdio with {} workers", workers);

    let result = loop {
        if stopped.try_recv().is_ok() {
            break Ok(());
        }
        match read_line(&mut reader) {
            Ok(Some(line)) => {
                if sender.send(line).is_err() {
                    break Ok(());
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    drop(sender);
    for handle in handles {
        let _ = handle.join();
    }
    log::info!("Stdio server stopped");
    result
}
