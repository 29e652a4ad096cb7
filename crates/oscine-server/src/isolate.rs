//! Process isolation for the isolated policy
//!
//! On Unix every packet is processed in a forked child. The child gets a
//! copy of the server's memory, runs the pipeline, writes its encoded
//! replies to a socket pair and leaves through `_exit`. The parent reads
//! the replies and reaps the child, so a handler that aborts, overflows its
//! stack or corrupts memory only takes its own process down.
//!
//! Elsewhere the packet runs on the calling thread with panics contained.

use bytes::Bytes;
use std::io;

use crate::pipeline::{Job, Pipeline};

/// Process `job` in isolation and return the replies it produced
#[cfg(unix)]
pub(crate) fn run(pipeline: &Pipeline, job: &Job) -> io::Result<Vec<Bytes>> {
    use nix::errno::Errno;
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::libc::_exit;
    use nix::unistd::{fork, ForkResult};
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    let (mut parent_end, mut child_end) = UnixStream::pair()?;

    // SAFETY: the child only touches memory copied at fork time, never
    // returns into the caller's stack frames, and exits with `_exit`.
    match unsafe { fork() }.map_err(io::Error::from)? {
        ForkResult::Child => {
            drop(parent_end);
            let code = match catch_unwind(AssertUnwindSafe(|| pipeline.process_blocking(job))) {
                Ok(replies) => match child_end.write_all(&encode_replies(&replies)) {
                    Ok(()) => 0,
                    Err(_) => 2,
                },
                Err(_) => 1,
            };
            unsafe { _exit(code) }
        }
        ForkResult::Parent { child } => {
            drop(child_end);
            let mut buf = Vec::new();
            let read = parent_end.read_to_end(&mut buf);

            let status = loop {
                match waitpid(child, None) {
                    Err(Errno::EINTR) => continue,
                    other => break other.map_err(io::Error::from)?,
                }
            };
            read?;

            match status {
                WaitStatus::Exited(_, 0) => Ok(decode_replies(&buf)),
                WaitStatus::Exited(pid, code) => Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("isolated process {} exited with status {}", pid, code),
                )),
                WaitStatus::Signaled(pid, signal, _) => Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("isolated process {} killed by {:?}", pid, signal),
                )),
                other => Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("isolated process ended unexpectedly: {:?}", other),
                )),
            }
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn run(pipeline: &Pipeline, job: &Job) -> io::Result<Vec<Bytes>> {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    catch_unwind(AssertUnwindSafe(|| pipeline.process_blocking(job)))
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "isolated run panicked"))
}

/// Length-prefixed reply stream written by the child
#[cfg_attr(not(unix), allow(dead_code))]
fn encode_replies(replies: &[Bytes]) -> Vec<u8> {
    let total = replies.iter().map(|r| r.len() + 4).sum();
    let mut out = Vec::with_capacity(total);
    for reply in replies {
        out.extend_from_slice(&(reply.len() as u32).to_be_bytes());
        out.extend_from_slice(reply);
    }
    out
}

/// Inverse of [`encode_replies`]; a truncated tail is dropped
#[cfg_attr(not(unix), allow(dead_code))]
fn decode_replies(mut buf: &[u8]) -> Vec<Bytes> {
    let mut replies = Vec::new();
    while buf.len() >= 4 {
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let Some(body) = buf.get(4..4 + len) else {
            break;
        };
        replies.push(Bytes::copy_from_slice(body));
        buf = &buf[4 + len..];
    }
    replies
}
