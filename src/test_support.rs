//! A scripted in-memory transport for exercising the protocol layers
//! without a server.
//!
//! A script is an ordered list of exchanges: each expects one written
//! command line (and, for frames, the body) and queues the bytes the
//! server would answer with. A shared handle lets tests inspect what hit
//! the wire and how much of the script was consumed.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::transport::Transport;

pub(crate) struct Exchange {
    expect: String,
    expect_body: Option<Vec<u8>>,
    outcome: Outcome,
}

enum Outcome {
    Reply(Vec<Vec<u8>>),
    Disconnect,
}

/// One line written, one line answered.
pub(crate) fn ok(expect: &str, reply: &str) -> Exchange {
    Exchange {
        expect: expect.to_string(),
        expect_body: None,
        outcome: Outcome::Reply(vec![reply.as_bytes().to_vec()]),
    }
}

/// One line written, answered by a head line plus a CRLF-terminated data
/// frame (as `RESERVED`/`FOUND`/`OK` responses are).
pub(crate) fn ok_data(expect: &str, head: &str, data: &[u8]) -> Exchange {
    let mut frame = data.to_vec();
    frame.extend_from_slice(b"\r\n");

    Exchange {
        expect: expect.to_string(),
        expect_body: None,
        outcome: Outcome::Reply(vec![head.as_bytes().to_vec(), frame]),
    }
}

/// A command line plus job body written, one line answered.
pub(crate) fn ok_frame(expect: &str, expect_body: &[u8], reply: &str) -> Exchange {
    Exchange {
        expect: expect.to_string(),
        expect_body: Some(expect_body.to_vec()),
        outcome: Outcome::Reply(vec![reply.as_bytes().to_vec()]),
    }
}

/// The write for this command fails as a dropped connection would.
pub(crate) fn fail(expect: &str) -> Exchange {
    Exchange {
        expect: expect.to_string(),
        expect_body: None,
        outcome: Outcome::Disconnect,
    }
}

#[derive(Default)]
struct ScriptState {
    script: VecDeque<Exchange>,
    pending_reads: VecDeque<Vec<u8>>,
    sent: Vec<String>,
}

/// Test-side view of a [`ScriptedTransport`]'s progress.
#[derive(Clone)]
pub(crate) struct ScriptHandle(Arc<Mutex<ScriptState>>);

impl ScriptHandle {
    /// Every command line written so far, in order.
    pub(crate) fn sent(&self) -> Vec<String> {
        self.0.lock().unwrap().sent.clone()
    }

    /// Exchanges not yet consumed.
    pub(crate) fn remaining(&self) -> usize {
        self.0.lock().unwrap().script.len()
    }
}

pub(crate) struct ScriptedTransport(Arc<Mutex<ScriptState>>);

pub(crate) fn scripted(
    script: Vec<Exchange>,
) -> (ScriptedTransport, ScriptHandle) {
    let state = Arc::new(Mutex::new(ScriptState {
        script: script.into(),
        ..ScriptState::default()
    }));

    (ScriptedTransport(state.clone()), ScriptHandle(state))
}

impl ScriptedTransport {
    fn write(&self, line: &[u8], body: Option<&[u8]>) -> io::Result<()> {
        let mut state = self.0.lock().unwrap();

        let line = String::from_utf8(line.to_vec()).expect("non-UTF8 line");
        state.sent.push(line.clone());

        let exchange = state
            .script
            .pop_front()
            .unwrap_or_else(|| panic!("unscripted command: {line:?}"));

        assert_eq!(exchange.expect, line, "unexpected command line");

        match exchange.outcome {
            Outcome::Reply(replies) => {
                assert_eq!(
                    exchange.expect_body.as_deref(),
                    body,
                    "unexpected job body for {line:?}"
                );
                state.pending_reads.extend(replies);
                Ok(())
            },
            Outcome::Disconnect => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "scripted disconnect",
            )),
        }
    }

    fn read(&self) -> Vec<u8> {
        self.0
            .lock()
            .unwrap()
            .pending_reads
            .pop_front()
            .expect("read with no scripted reply pending")
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        self.write(line, None)
    }

    async fn write_frame(
        &mut self,
        line: &[u8],
        body: &[u8],
    ) -> io::Result<()> {
        self.write(line, Some(body))
    }

    async fn read_line(&mut self) -> io::Result<Bytes> {
        Ok(Bytes::from(self.read()))
    }

    async fn read_data(&mut self, len: usize) -> io::Result<Bytes> {
        let chunk = self.read();
        assert_eq!(chunk.len(), len, "data frame length mismatch");
        Ok(Bytes::from(chunk))
    }
}
