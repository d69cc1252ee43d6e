//! Failure tracking and tube-state replay on top of a [`Connection`].
//!
//! A connectivity failure marks the wrapper unavailable for a retry delay.
//! The transport below dials afresh on the next attempt, which resets the
//! server-side tube selection to its defaults, so once the delay expires
//! the wrapper first walks the new socket back to the caller's intended
//! state (`use`, then each `watch`, then each `ignore`) before running the
//! caller's command.
//!
//! The wrapper never gates its own calls on the retry window: that check
//! belongs to the pool's dispatch. [`ManagedConnection::is_available`] is a
//! read-only query for callers and metrics.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::Instant;

use crate::codec::{BodyCodec, JsonCodec};
use crate::connection::{Connection, IgnoreOutcome, PutOptions, TubeState};
use crate::error::{Error, Result};
use crate::stats::Stats;
use crate::types::command::TubeName;
use crate::types::job::Job;

/// How long a failed connection is considered unavailable.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(600);

/// Runs `$call` with replay-on-recovery before and failure bookkeeping
/// after.
macro_rules! dispatch {
    ($self:ident, $call:expr) => {{
        if let Err(e) = $self.prepare().await {
            return Err($self.record(e));
        }

        match $call.await {
            Ok(value) => {
                $self.mark_ok();
                Ok(value)
            },
            Err(e) => Err($self.record(e)),
        }
    }};
}

pub struct ManagedConnection<C: BodyCodec = JsonCodec> {
    inner: Connection<C>,
    retry_delay: Duration,
    unavailable_until: Option<Instant>,
    /// The tube state the caller believes is active, updated before any
    /// network attempt so a later replay reflects the latest intent.
    intent: TubeState,
    /// Tubes explicitly ignored by the caller. A fresh socket watches
    /// `default`, so these must be re-ignored on every replay.
    ignored: BTreeSet<TubeName>,
}

impl<C: BodyCodec> ManagedConnection<C> {
    pub fn new(inner: Connection<C>) -> Self {
        let intent = inner.tubes().clone();

        ManagedConnection {
            inner,
            retry_delay: DEFAULT_RETRY_DELAY,
            unavailable_until: None,
            intent,
            ignored: BTreeSet::new(),
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// True if this connection never failed, or its retry delay has passed.
    pub fn is_available(&self) -> bool {
        match self.unavailable_until {
            None => true,
            Some(at) => Instant::now() >= at,
        }
    }

    /// The tube puts are meant to land on.
    pub fn using(&self) -> &TubeName {
        &self.intent.using
    }

    /// The tubes reserves are meant to draw from.
    pub fn watching(&self) -> &BTreeSet<TubeName> {
        &self.intent.watching
    }

    pub async fn put(
        &mut self,
        body: &C::Value,
        opts: &PutOptions,
    ) -> Result<u64> {
        dispatch!(self, self.inner.put(body, opts))
    }

    pub async fn reserve(
        &mut self,
        timeout: Option<u32>,
    ) -> Result<Option<Job<C::Value>>> {
        dispatch!(self, self.inner.reserve(timeout))
    }

    pub async fn delete(&mut self, id: u64) -> Result<()> {
        dispatch!(self, self.inner.delete(id))
    }

    pub async fn release(
        &mut self,
        id: u64,
        pri: u32,
        delay: u32,
    ) -> Result<()> {
        dispatch!(self, self.inner.release(id, pri, delay))
    }

    pub async fn bury(&mut self, id: u64, pri: u32) -> Result<()> {
        dispatch!(self, self.inner.bury(id, pri))
    }

    pub async fn touch(&mut self, id: u64) -> Result<()> {
        dispatch!(self, self.inner.touch(id))
    }

    pub async fn use_tube(&mut self, tube: &TubeName) -> Result<TubeName> {
        self.intent.using = tube.clone();
        dispatch!(self, self.inner.use_tube(tube))
    }

    pub async fn watch(&mut self, tube: &TubeName) -> Result<u32> {
        self.intent.watching.insert(tube.clone());
        self.ignored.remove(tube);
        dispatch!(self, self.inner.watch(tube))
    }

    pub async fn ignore(&mut self, tube: &TubeName) -> Result<IgnoreOutcome> {
        // Keep the intent non-empty: the protocol refuses to ignore the
        // last watched tube, and so does a replay.
        if self.intent.watching.len() > 1 {
            self.intent.watching.remove(tube);
            self.ignored.insert(tube.clone());
        }
        dispatch!(self, self.inner.ignore(tube))
    }

    pub async fn peek(&mut self, id: u64) -> Result<Job<C::Value>> {
        dispatch!(self, self.inner.peek(id))
    }

    pub async fn peek_ready(&mut self) -> Result<Option<Job<C::Value>>> {
        dispatch!(self, self.inner.peek_ready())
    }

    pub async fn peek_delayed(&mut self) -> Result<Option<Job<C::Value>>> {
        dispatch!(self, self.inner.peek_delayed())
    }

    pub async fn peek_buried(&mut self) -> Result<Option<Job<C::Value>>> {
        dispatch!(self, self.inner.peek_buried())
    }

    pub async fn kick(&mut self, bound: u64) -> Result<u64> {
        dispatch!(self, self.inner.kick(bound))
    }

    pub async fn pause_tube(
        &mut self,
        tube: &TubeName,
        delay: u32,
    ) -> Result<()> {
        dispatch!(self, self.inner.pause_tube(tube, delay))
    }

    pub async fn stats(&mut self) -> Result<Stats> {
        dispatch!(self, self.inner.stats())
    }

    pub async fn stats_job(&mut self, id: u64) -> Result<Stats> {
        dispatch!(self, self.inner.stats_job(id))
    }

    pub async fn stats_tube(&mut self, tube: &TubeName) -> Result<Stats> {
        dispatch!(self, self.inner.stats_tube(tube))
    }

    pub async fn list_tubes(&mut self) -> Result<Vec<String>> {
        dispatch!(self, self.inner.list_tubes())
    }

    pub async fn list_tubes_watched(&mut self) -> Result<Vec<String>> {
        dispatch!(self, self.inner.list_tubes_watched())
    }

    pub async fn list_tube_used(&mut self) -> Result<String> {
        dispatch!(self, self.inner.list_tube_used())
    }

    /// Replays the intended tube state if the retry delay has passed since
    /// a failure. A fresh socket starts from protocol defaults and must be
    /// walked back to what the caller believes is active.
    async fn prepare(&mut self) -> Result<()> {
        let Some(at) = self.unavailable_until else {
            return Ok(());
        };

        if Instant::now() < at {
            // Still inside the retry window. The pool fails fast before it
            // gets here; a direct caller is allowed straight through.
            return Ok(());
        }

        self.inner.use_tube(&self.intent.using.clone()).await?;
        for tube in self.intent.watching.clone() {
            self.inner.watch(&tube).await?;
        }
        for tube in self.ignored.clone() {
            self.inner.ignore(&tube).await?;
        }

        self.unavailable_until = None;

        Ok(())
    }

    fn mark_ok(&mut self) {
        self.unavailable_until = None;
    }

    fn record(&mut self, err: Error) -> Error {
        if err.is_connectivity() {
            if self.unavailable_until.is_none() {
                self.unavailable_until =
                    Some(Instant::now() + self.retry_delay);
            }
            // The transport redials on the next attempt; its tube state is
            // back to defaults until replayed.
            self.inner.reset_tubes();
        }

        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;

    use crate::codec::RawCodec;
    use crate::test_support::{fail, ok, scripted, Exchange, ScriptHandle};

    fn tube(name: &str) -> TubeName {
        TubeName::new(name).unwrap()
    }

    fn managed(
        script: Vec<Exchange>,
    ) -> (ManagedConnection<RawCodec>, ScriptHandle) {
        let (transport, handle) = scripted(script);
        let conn = Connection::new(Box::new(transport), RawCodec);
        (ManagedConnection::new(conn), handle)
    }

    #[tokio::test]
    async fn test_connectivity_failure_marks_unavailable() {
        let (mut mc, _) = managed(vec![fail("watch imports")]);

        let err = mc.watch(&tube("imports")).await.unwrap_err();
        assert!(err.is_connectivity());
        // Default retry delay: unavailable for the next ten minutes.
        assert!(!mc.is_available());
    }

    #[tokio::test]
    async fn test_protocol_errors_do_not_trip_the_breaker() {
        let (mut mc, _) = managed(vec![ok("delete 1", "NOT_FOUND")]);

        assert!(matches!(mc.delete(1).await, Err(Error::NotFound)));
        assert!(mc.is_available());
    }

    #[tokio::test]
    async fn test_success_clears_failure_state() {
        let (mc, _) = managed(vec![
            fail("delete 1"),
            ok("use default", "USING default"),
            ok("delete 2", "DELETED"),
        ]);
        let mut mc = mc.with_retry_delay(Duration::ZERO);

        mc.delete(1).await.unwrap_err();
        mc.delete(2).await.unwrap();
        assert!(mc.is_available());
    }

    #[tokio::test]
    async fn test_replay_after_recovery() {
        let (mc, handle) = managed(vec![
            fail("watch imports"),
            // Replay: use, then the watches (default needs no send on a
            // fresh socket), then the command itself.
            ok("use default", "USING default"),
            ok("watch imports", "WATCHING 2"),
            ok("delete 1", "DELETED"),
        ]);
        let mut mc = mc.with_retry_delay(Duration::ZERO);

        mc.watch(&tube("imports")).await.unwrap_err();
        mc.delete(1).await.unwrap();

        assert_eq!(
            handle.sent(),
            vec![
                "watch imports".to_string(),
                "use default".to_string(),
                "watch imports".to_string(),
                "delete 1".to_string(),
            ]
        );
        assert!(mc.is_available());
    }

    #[tokio::test]
    async fn test_replay_reissues_ignores() {
        let (mc, handle) = managed(vec![
            ok("use jobs", "USING jobs"),
            ok("watch imports", "WATCHING 2"),
            ok("ignore default", "WATCHING 1"),
            fail("touch 9"),
            // Replay walks the fresh socket back: use, watch, re-ignore.
            ok("use jobs", "USING jobs"),
            ok("watch imports", "WATCHING 2"),
            ok("ignore default", "WATCHING 1"),
            ok("touch 9", "TOUCHED"),
        ]);
        let mut mc = mc.with_retry_delay(Duration::ZERO);

        mc.use_tube(&tube("jobs")).await.unwrap();
        mc.watch(&tube("imports")).await.unwrap();
        mc.ignore(&tube("default")).await.unwrap();

        mc.touch(9).await.unwrap_err();
        mc.touch(9).await.unwrap();

        assert_eq!(handle.remaining(), 0);
    }

    #[tokio::test]
    async fn test_no_replay_inside_the_retry_window() {
        // Default (long) retry delay: the wrapper attempts the next call
        // directly, without replaying tube state first.
        let (mut mc, handle) = managed(vec![
            fail("delete 1"),
            ok("delete 2", "DELETED"),
        ]);

        mc.delete(1).await.unwrap_err();
        mc.delete(2).await.unwrap();

        assert_eq!(
            handle.sent(),
            vec!["delete 1".to_string(), "delete 2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_intent_recorded_before_a_failing_watch() {
        let (mut mc, _) = managed(vec![fail("watch imports")]);

        mc.watch(&tube("imports")).await.unwrap_err();

        // The failed watch still counts as intent for the next replay.
        assert!(mc.watching().contains(&tube("imports")));
    }

    #[tokio::test]
    async fn test_put_round_trip() {
        let (mut mc, _) = managed(vec![crate::test_support::ok_frame(
            "put 1024 0 60 5",
            b"hello",
            "INSERTED 3",
        )]);

        let id = mc
            .put(&Bytes::from_static(b"hello"), &PutOptions::default())
            .await
            .unwrap();
        assert_eq!(id, 3);
    }
}
