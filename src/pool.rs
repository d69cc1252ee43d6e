//! Many keyed connections behaving as one logical queue client.
//!
//! Members are addressed by a stable key (host:port or equivalent). Three
//! dispatch shapes cover every operation: exact (one named member, failing
//! fast while its retry window is open), all (every member, skipping
//! failures), and one (strategy-picked members until a response arrives).
//! Job ids crossing the pool boundary are namespaced as `"<key>.<id>"` so
//! later commands can find their way back to the issuing member.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::warn;

use crate::codec::{BodyCodec, JsonCodec};
use crate::connection::PutOptions;
use crate::error::{Error, Result};
use crate::managed::{ManagedConnection, DEFAULT_RETRY_DELAY};
use crate::stats::Stats;
use crate::strategy::SelectionStrategy;
use crate::types::command::TubeName;
use crate::types::job::{PooledId, PooledJob};

/// Pause between full member sweeps while polling for a reservation.
const RESERVE_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Dispatches one call to one named member: fails fast inside the member's
/// retry window, books success/failure on its retry timestamp otherwise.
macro_rules! to_exact {
    ($self:ident, $key:expr, $conn:ident => $call:expr) => {{
        let key = $key;
        match $self.admit(key) {
            Err(e) => Err(e),
            Ok($conn) => {
                let result = $call.await;
                $self.settle(key, result)
            },
        }
    }};
}

/// Dispatches to every member in key order, collecting per-key responses.
/// A failing member is logged and skipped, never fatal to the batch.
macro_rules! to_all {
    ($self:ident, $conn:ident => $call:expr) => {{
        let mut collected = Vec::new();
        for key in $self.keys() {
            match to_exact!($self, key.as_str(), $conn => $call) {
                Ok(response) => collected.push((key, response)),
                Err(error) => {
                    warn!(member = %key, %error, "skipping pool member")
                },
            }
        }
        collected
    }};
}

/// Dispatches to strategy-picked members until one yields a response.
/// `$call` resolves to `Result<Option<R>>`: `None` is a benign miss and the
/// next member is tried; a connectivity failure excludes the member and is
/// kept as the last error. All members missing benignly yields `Ok(None)`;
/// all members failing yields the last error.
macro_rules! to_one {
    ($self:ident, $conn:ident => $call:expr) => {{
        let mut remaining = $self.keys();
        let mut last_err = None;
        let mut saw_benign = false;

        loop {
            if remaining.is_empty() {
                break match last_err {
                    Some(err) if !saw_benign => Err(err),
                    _ => Ok(None),
                };
            }

            let key = match $self.strategy.pick_one(&remaining) {
                Ok(key) => key,
                Err(err) => break Err(err),
            };

            match to_exact!($self, key.as_str(), $conn => $call) {
                Ok(Some(response)) => break Ok(Some((key, response))),
                Ok(None) => saw_benign = true,
                Err(err) if err.is_connectivity() => last_err = Some(err),
                Err(err) => break Err(err),
            }

            remaining.retain(|k| k != &key);
        }
    }};
}

struct Member<C: BodyCodec> {
    conn: ManagedConnection<C>,
    /// While set and in the future, dispatch fails fast without I/O.
    retry_at: Option<Instant>,
}

pub struct Pool<C: BodyCodec = JsonCodec> {
    members: BTreeMap<String, Member<C>>,
    strategy: Box<dyn SelectionStrategy>,
    retry_delay: Duration,
}

impl<C: BodyCodec> Pool<C> {
    pub fn new(strategy: Box<dyn SelectionStrategy>) -> Self {
        Pool {
            members: BTreeMap::new(),
            strategy,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn add_member(
        &mut self,
        key: impl Into<String>,
        conn: ManagedConnection<C>,
    ) {
        self.members.insert(
            key.into(),
            Member {
                conn,
                retry_at: None,
            },
        );
    }

    /// Member keys in stable order.
    pub fn keys(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    /// False while the member's retry window is open.
    pub fn is_member_available(&self, key: &str) -> bool {
        match self.members.get(key).and_then(|m| m.retry_at) {
            None => true,
            Some(at) => Instant::now() >= at,
        }
    }

    /// Selects `tube` for puts on every member. Unavailable members are
    /// skipped, not fatal.
    pub async fn use_tube(&mut self, tube: &TubeName) -> Result<()> {
        to_all!(self, conn => conn.use_tube(tube));
        Ok(())
    }

    /// Adds `tube` to every member's watch list.
    pub async fn watch(&mut self, tube: &TubeName) -> Result<()> {
        to_all!(self, conn => conn.watch(tube));
        Ok(())
    }

    /// Removes `tube` from every member's watch list.
    pub async fn ignore(&mut self, tube: &TubeName) -> Result<()> {
        to_all!(self, conn => conn.ignore(tube));
        Ok(())
    }

    /// Places a job on one strategy-picked member, returning its pooled id.
    pub async fn put(
        &mut self,
        body: &C::Value,
        opts: &PutOptions,
    ) -> Result<PooledId> {
        let placed = to_one!(self, conn => async {
            conn.put(body, opts).await.map(Some)
        })?;

        match placed {
            Some((key, id)) => Ok(PooledId::new(key, id.to_string())),
            None => Err(Error::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "no pool member accepted the job",
            ))),
        }
    }

    /// Polls the members for a job: each sweep asks every member for a
    /// non-blocking reservation in strategy order, pausing briefly between
    /// sweeps. Returns the first job found, or `None` once `timeout` whole
    /// seconds have elapsed. Without a timeout, polls indefinitely.
    pub async fn reserve(
        &mut self,
        timeout: Option<u64>,
    ) -> Result<Option<PooledJob<C::Value>>> {
        let started = Instant::now();

        loop {
            let swept = to_one!(self, conn => conn.reserve(Some(0)))?;

            if let Some((key, job)) = swept {
                return Ok(Some(PooledJob {
                    id: PooledId::new(key, job.id.to_string()),
                    body: job.body,
                }));
            }

            if let Some(secs) = timeout {
                if started.elapsed() >= Duration::from_secs(secs) {
                    return Ok(None);
                }
            }

            sleep(RESERVE_SWEEP_INTERVAL).await;
        }
    }

    /// Deletes the job on the member its id names.
    pub async fn delete(&mut self, id: &PooledId) -> Result<()> {
        let native = id.native_id()?;
        to_exact!(self, id.key.as_str(), conn => conn.delete(native))
    }

    pub async fn release(
        &mut self,
        id: &PooledId,
        pri: u32,
        delay: u32,
    ) -> Result<()> {
        let native = id.native_id()?;
        to_exact!(self, id.key.as_str(), conn => conn.release(native, pri, delay))
    }

    pub async fn bury(&mut self, id: &PooledId, pri: u32) -> Result<()> {
        let native = id.native_id()?;
        to_exact!(self, id.key.as_str(), conn => conn.bury(native, pri))
    }

    pub async fn touch(&mut self, id: &PooledId) -> Result<()> {
        let native = id.native_id()?;
        to_exact!(self, id.key.as_str(), conn => conn.touch(native))
    }

    /// Looks at the job on the member its id names, re-namespacing the id
    /// in the result.
    pub async fn peek(
        &mut self,
        id: &PooledId,
    ) -> Result<PooledJob<C::Value>> {
        let native = id.native_id()?;
        let job =
            to_exact!(self, id.key.as_str(), conn => conn.peek(native))?;

        Ok(PooledJob {
            id: PooledId::new(id.key.clone(), job.id.to_string()),
            body: job.body,
        })
    }

    pub async fn stats_job(&mut self, id: &PooledId) -> Result<Stats> {
        let native = id.native_id()?;
        to_exact!(self, id.key.as_str(), conn => conn.stats_job(native))
    }

    /// Server stats from every reachable member, merged under the per-key
    /// aggregation rules. `None` when no member produced a usable map.
    pub async fn stats(&mut self) -> Result<Option<Stats>> {
        let responses = to_all!(self, conn => conn.stats());
        Ok(fold_stats(responses))
    }

    /// As [`Pool::stats`], for one tube.
    pub async fn stats_tube(
        &mut self,
        tube: &TubeName,
    ) -> Result<Option<Stats>> {
        let responses = to_all!(self, conn => conn.stats_tube(tube));
        Ok(fold_stats(responses))
    }

    /// Kicks up to `bound` buried jobs across the pool: members are visited
    /// in strategy order, each kicked by at most its own buried count, until
    /// the bound is reached. Member failures are skipped.
    pub async fn kick(&mut self, bound: u64) -> Result<u64> {
        let mut kicked = 0;
        let mut remaining = self.keys();

        while kicked < bound && !remaining.is_empty() {
            let key = self.strategy.pick_one(&remaining)?;
            remaining.retain(|k| k != &key);

            let tube = match self.members.get(&key) {
                Some(member) => member.conn.using().clone(),
                None => continue,
            };

            let buried = match to_exact!(self, key.as_str(), conn => conn.stats_tube(&tube))
            {
                Ok(stats) => {
                    stats.get_i64("current-jobs-buried").unwrap_or(0).max(0)
                        as u64
                },
                Err(error) => {
                    warn!(member = %key, %error, "skipping pool member");
                    continue;
                },
            };

            if buried == 0 {
                continue;
            }

            let ask = buried.min(bound - kicked);
            match to_exact!(self, key.as_str(), conn => conn.kick(ask)) {
                Ok(count) => kicked += count,
                Err(error) => {
                    warn!(member = %key, %error, "kick failed on pool member")
                },
            }
        }

        Ok(kicked)
    }

    /// The union of tube names across all reachable members.
    pub async fn list_tubes(&mut self) -> Result<Vec<String>> {
        let responses = to_all!(self, conn => conn.list_tubes());

        let mut names = BTreeSet::new();
        for (_, tubes) in responses {
            names.extend(tubes);
        }

        Ok(names.into_iter().collect())
    }

    fn admit(&mut self, key: &str) -> Result<&mut ManagedConnection<C>> {
        let member = self.members.get_mut(key).ok_or_else(|| {
            Error::invalid(format!("unknown pool member {key:?}"))
        })?;

        if let Some(at) = member.retry_at {
            if Instant::now() < at {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("pool member {key} is in its retry window"),
                )));
            }
        }

        Ok(&mut member.conn)
    }

    fn settle<R>(&mut self, key: &str, result: Result<R>) -> Result<R> {
        if let Some(member) = self.members.get_mut(key) {
            match &result {
                Ok(_) => member.retry_at = None,
                Err(err) if err.is_connectivity() => {
                    member.retry_at =
                        Some(Instant::now() + self.retry_delay);
                },
                Err(_) => {},
            }
        }

        result
    }
}

/// Left-folds member maps through the aggregation rules, skipping empty
/// ones. `None` when nothing usable came back.
fn fold_stats(responses: Vec<(String, Stats)>) -> Option<Stats> {
    responses
        .into_iter()
        .map(|(_, stats)| stats)
        .filter(|stats| !stats.is_empty())
        .fold(None, |acc, next| match acc {
            None => Some(next),
            Some(acc) => Some(acc.aggregate(&next)),
        })
}
