//! A single protocol connection: one transport, one tube state, command
//! dispatch through the codecs.

use std::collections::BTreeSet;

use bytes::Bytes;

use crate::codec::{BodyCodec, JsonCodec};
use crate::error::{CommandError, Error, Result};
use crate::stats::{parse_name_list, Stats};
use crate::transport::Transport;
use crate::types::command::{Command, TubeName};
use crate::types::job::Job;
use crate::types::response::ResponseHead;
use crate::types::serialisable::BeanstalkSerialisable;
use crate::util::bytes_to_human_str;

/// Job priority used when the caller does not specify one.
pub const DEFAULT_PRIORITY: u32 = 1024;
/// Seconds a job may run once reserved, unless the caller says otherwise.
pub const DEFAULT_TTR: u32 = 60;

/// Parameters for placing a job.
///
/// Priorities run 0 (most urgent) to `u32::MAX`; `delay` postpones
/// readiness; `ttr` bounds how long a reservation lasts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PutOptions {
    pub pri: u32,
    pub delay: u32,
    pub ttr: u32,
}

impl Default for PutOptions {
    fn default() -> Self {
        PutOptions {
            pri: DEFAULT_PRIORITY,
            delay: 0,
            ttr: DEFAULT_TTR,
        }
    }
}

/// The tube selection a connection believes is active on the server.
///
/// Mutated only by `use`/`watch`/`ignore`; a fresh connection uses and
/// watches `default`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TubeState {
    pub using: TubeName,
    pub watching: BTreeSet<TubeName>,
}

impl Default for TubeState {
    fn default() -> Self {
        TubeState {
            using: TubeName::default(),
            watching: BTreeSet::from([TubeName::default()]),
        }
    }
}

/// The outcome of an `ignore`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IgnoreOutcome {
    /// The number of tubes still watched.
    Watching(u32),
    /// The tube was the only one watched; nothing was sent.
    OnlyTube,
}

/// One transport plus the tube state layered on it.
///
/// Commands delegate to the matching codec against the transport, then
/// apply their local tube-state side effects. Watching an already-watched
/// tube or ignoring an unwatched one skips the I/O entirely.
pub struct Connection<C: BodyCodec = JsonCodec> {
    transport: Box<dyn Transport>,
    codec: C,
    tubes: TubeState,
}

impl<C: BodyCodec> Connection<C> {
    pub fn new(transport: Box<dyn Transport>, codec: C) -> Self {
        Connection {
            transport,
            codec,
            tubes: TubeState::default(),
        }
    }

    pub fn tubes(&self) -> &TubeState {
        &self.tubes
    }

    /// Forgets all tube selection, as a freshly-dialled socket would. The
    /// managed layer calls this when the transport has dropped its socket.
    pub(crate) fn reset_tubes(&mut self) {
        self.tubes = TubeState::default();
    }

    /// Inserts a job into the currently used tube, returning its id. A job
    /// the server buried under memory pressure still yields its id.
    pub async fn put(
        &mut self,
        body: &C::Value,
        opts: &PutOptions,
    ) -> Result<u64> {
        let encoded = self.codec.encode(body)?;
        let n_bytes = u32::try_from(encoded.len())
            .map_err(|_| Error::invalid("job body too large to frame"))?;

        let cmd = Command::Put {
            pri: opts.pri,
            delay: opts.delay,
            ttr: opts.ttr,
            n_bytes,
        };

        self.transport
            .write_frame(&cmd.serialise_beanstalk(), &encoded)
            .await?;
        let (head, raw) = self.read_head().await?;

        match head {
            ResponseHead::Inserted { id } => Ok(id),
            ResponseHead::Buried { id: Some(id) } => Ok(id),
            ResponseHead::ExpectedCrlf => {
                Err(CommandError::ExpectedCrlf.into())
            },
            ResponseHead::JobTooBig => Err(CommandError::JobTooBig.into()),
            other => Err(Self::fail(&cmd, other, &raw)),
        }
    }

    /// Awaits a job from the watched tubes. `Some(seconds)` bounds the wait
    /// (0 polls without blocking); `None` blocks until a job appears. A
    /// timeout or an imminent deadline is an absence, not an error.
    pub async fn reserve(
        &mut self,
        timeout: Option<u32>,
    ) -> Result<Option<Job<C::Value>>> {
        let cmd = match timeout {
            Some(timeout) => Command::ReserveWithTimeout { timeout },
            None => Command::Reserve,
        };

        let (head, raw) = self.request(&cmd).await?;

        match head {
            ResponseHead::Reserved { id, n_bytes } => {
                let body = self.read_body(n_bytes).await?;
                Ok(Some(Job {
                    id,
                    body: self.codec.decode(&body)?,
                }))
            },
            ResponseHead::TimedOut | ResponseHead::DeadlineSoon => Ok(None),
            other => Err(Self::fail(&cmd, other, &raw)),
        }
    }

    pub async fn delete(&mut self, id: u64) -> Result<()> {
        let cmd = Command::Delete { id };
        let (head, raw) = self.request(&cmd).await?;

        match head {
            ResponseHead::Deleted => Ok(()),
            ResponseHead::NotFound => Err(Error::NotFound),
            other => Err(Self::fail(&cmd, other, &raw)),
        }
    }

    /// Returns a reserved job to the ready queue. A `BURIED` reply means
    /// the server could not, and parked the job instead; both count as the
    /// release completing.
    pub async fn release(
        &mut self,
        id: u64,
        pri: u32,
        delay: u32,
    ) -> Result<()> {
        let cmd = Command::Release { id, pri, delay };
        let (head, raw) = self.request(&cmd).await?;

        match head {
            ResponseHead::Released | ResponseHead::Buried { id: None } => {
                Ok(())
            },
            ResponseHead::NotFound => Err(Error::NotFound),
            other => Err(Self::fail(&cmd, other, &raw)),
        }
    }

    pub async fn bury(&mut self, id: u64, pri: u32) -> Result<()> {
        let cmd = Command::Bury { id, pri };
        let (head, raw) = self.request(&cmd).await?;

        match head {
            ResponseHead::Buried { id: None } => Ok(()),
            ResponseHead::NotFound => Err(Error::NotFound),
            other => Err(Self::fail(&cmd, other, &raw)),
        }
    }

    pub async fn touch(&mut self, id: u64) -> Result<()> {
        let cmd = Command::Touch { id };
        let (head, raw) = self.request(&cmd).await?;

        match head {
            ResponseHead::Touched => Ok(()),
            ResponseHead::NotFound | ResponseHead::NotTouched => {
                Err(Error::NotFound)
            },
            other => Err(Self::fail(&cmd, other, &raw)),
        }
    }

    /// Selects the tube subsequent puts go to. Sent unconditionally: the
    /// server is the source of truth for what is in use.
    pub async fn use_tube(&mut self, tube: &TubeName) -> Result<TubeName> {
        let cmd = Command::Use { tube: tube.clone() };
        let (head, raw) = self.request(&cmd).await?;

        match head {
            ResponseHead::Using { tube } => {
                let tube = TubeName::new(tube)?;
                self.tubes.using = tube.clone();
                Ok(tube)
            },
            other => Err(Self::fail(&cmd, other, &raw)),
        }
    }

    /// Adds a tube to the watch list, returning the watched count. Watching
    /// an already-watched tube sends nothing.
    pub async fn watch(&mut self, tube: &TubeName) -> Result<u32> {
        if self.tubes.watching.contains(tube) {
            return Ok(self.tubes.watching.len() as u32);
        }

        let cmd = Command::Watch { tube: tube.clone() };
        let (head, raw) = self.request(&cmd).await?;

        match head {
            ResponseHead::Watching { count } => {
                self.tubes.watching.insert(tube.clone());
                Ok(count)
            },
            other => Err(Self::fail(&cmd, other, &raw)),
        }
    }

    /// Removes a tube from the watch list. Ignoring an unwatched tube sends
    /// nothing; removing the last watched tube is refused locally, before
    /// any I/O.
    pub async fn ignore(&mut self, tube: &TubeName) -> Result<IgnoreOutcome> {
        if !self.tubes.watching.contains(tube) {
            return Ok(IgnoreOutcome::Watching(
                self.tubes.watching.len() as u32
            ));
        }

        if self.tubes.watching.len() == 1 {
            return Ok(IgnoreOutcome::OnlyTube);
        }

        let cmd = Command::Ignore { tube: tube.clone() };
        let (head, raw) = self.request(&cmd).await?;

        match head {
            ResponseHead::Watching { count } => {
                self.tubes.watching.remove(tube);
                Ok(IgnoreOutcome::Watching(count))
            },
            ResponseHead::NotIgnored => {
                Err(CommandError::NotIgnored.into())
            },
            other => Err(Self::fail(&cmd, other, &raw)),
        }
    }

    /// Looks at the job with this id, whatever its state. A miss here is an
    /// error, unlike the peek-variants below.
    pub async fn peek(&mut self, id: u64) -> Result<Job<C::Value>> {
        let cmd = Command::Peek { id };

        match self.peek_with(cmd).await? {
            Some(job) => Ok(job),
            None => Err(Error::NotFound),
        }
    }

    pub async fn peek_ready(&mut self) -> Result<Option<Job<C::Value>>> {
        self.peek_with(Command::PeekReady).await
    }

    pub async fn peek_delayed(&mut self) -> Result<Option<Job<C::Value>>> {
        self.peek_with(Command::PeekDelayed).await
    }

    pub async fn peek_buried(&mut self) -> Result<Option<Job<C::Value>>> {
        self.peek_with(Command::PeekBuried).await
    }

    async fn peek_with(
        &mut self,
        cmd: Command,
    ) -> Result<Option<Job<C::Value>>> {
        let (head, raw) = self.request(&cmd).await?;

        match head {
            ResponseHead::Found { id, n_bytes } => {
                let body = self.read_body(n_bytes).await?;
                Ok(Some(Job {
                    id,
                    body: self.codec.decode(&body)?,
                }))
            },
            ResponseHead::NotFound => Ok(None),
            other => Err(Self::fail(&cmd, other, &raw)),
        }
    }

    /// Promotes up to `bound` buried (or, failing that, delayed) jobs on
    /// the used tube, returning how many moved.
    pub async fn kick(&mut self, bound: u64) -> Result<u64> {
        let cmd = Command::Kick { bound };
        let (head, raw) = self.request(&cmd).await?;

        match head {
            ResponseHead::Kicked { count } => Ok(count),
            other => Err(Self::fail(&cmd, other, &raw)),
        }
    }

    /// Pauses reservations from a tube for `delay` seconds.
    pub async fn pause_tube(
        &mut self,
        tube: &TubeName,
        delay: u32,
    ) -> Result<()> {
        let cmd = Command::PauseTube {
            tube: tube.clone(),
            delay,
        };
        let (head, raw) = self.request(&cmd).await?;

        match head {
            ResponseHead::Paused => Ok(()),
            ResponseHead::NotFound => Err(Error::NotFound),
            other => Err(Self::fail(&cmd, other, &raw)),
        }
    }

    pub async fn stats(&mut self) -> Result<Stats> {
        self.stats_with(Command::StatsServer).await
    }

    pub async fn stats_job(&mut self, id: u64) -> Result<Stats> {
        self.stats_with(Command::StatsJob { id }).await
    }

    pub async fn stats_tube(&mut self, tube: &TubeName) -> Result<Stats> {
        self.stats_with(Command::StatsTube { tube: tube.clone() }).await
    }

    async fn stats_with(&mut self, cmd: Command) -> Result<Stats> {
        let (head, raw) = self.request(&cmd).await?;

        match head {
            ResponseHead::Ok { n_bytes } => {
                let blob = self.read_body(n_bytes).await?;
                Stats::parse(&blob)
            },
            ResponseHead::NotFound => Err(Error::NotFound),
            other => Err(Self::fail(&cmd, other, &raw)),
        }
    }

    pub async fn list_tubes(&mut self) -> Result<Vec<String>> {
        self.list_with(Command::ListTubes).await
    }

    pub async fn list_tubes_watched(&mut self) -> Result<Vec<String>> {
        self.list_with(Command::ListTubesWatched).await
    }

    async fn list_with(&mut self, cmd: Command) -> Result<Vec<String>> {
        let (head, raw) = self.request(&cmd).await?;

        match head {
            ResponseHead::Ok { n_bytes } => {
                let blob = self.read_body(n_bytes).await?;
                parse_name_list(&blob)
            },
            other => Err(Self::fail(&cmd, other, &raw)),
        }
    }

    pub async fn list_tube_used(&mut self) -> Result<String> {
        let cmd = Command::ListTubeUsed;
        let (head, raw) = self.request(&cmd).await?;

        match head {
            ResponseHead::Using { tube } => Ok(tube),
            other => Err(Self::fail(&cmd, other, &raw)),
        }
    }

    async fn request(
        &mut self,
        cmd: &Command,
    ) -> Result<(ResponseHead, Bytes)> {
        self.transport
            .write_line(&cmd.serialise_beanstalk())
            .await?;
        self.read_head().await
    }

    async fn read_head(&mut self) -> Result<(ResponseHead, Bytes)> {
        let raw = self.transport.read_line().await?;
        let head = ResponseHead::try_from(&raw[..])?;
        Ok((head, raw))
    }

    /// Reads a declared-length body plus its CRLF terminator, discarding
    /// the trailing pair.
    async fn read_body(&mut self, n_bytes: u32) -> Result<Bytes> {
        let n_bytes = n_bytes as usize;
        let framed = self.transport.read_data(n_bytes + 2).await?;
        Ok(framed.slice(0..n_bytes))
    }

    /// Maps a status no command expects to its typed failure.
    fn fail(cmd: &Command, head: ResponseHead, raw: &Bytes) -> Error {
        let err = match head {
            ResponseHead::OutOfMemory => CommandError::OutOfMemory,
            ResponseHead::InternalError => CommandError::InternalError,
            ResponseHead::BadFormat => CommandError::BadFormat,
            ResponseHead::UnknownCommand => CommandError::UnknownCommand,
            ResponseHead::Draining => CommandError::Draining,
            ResponseHead::Buried { id: Some(id) } => {
                CommandError::Buried { id }
            },
            _ => CommandError::Unexpected {
                line: format!(
                    "{} -> {}",
                    cmd.name(),
                    bytes_to_human_str(raw)
                ),
            },
        };

        err.into()
    }
}
