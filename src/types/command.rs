//! Client-side command encoding.
//!
//! Each command is a small value type validated at construction; encoding
//! produces the exact space-separated wire line. Body bytes for `put` travel
//! separately so the transport can frame them after the command line.

use std::fmt;

use super::serialisable::BeanstalkSerialisable;
use crate::error::{Error, Result};

/// A validated tube name: 1-200 bytes drawn from the server's accepted
/// character set, with `-` allowed anywhere but the first position.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TubeName(String);

/// The tube every fresh connection uses and watches.
pub const DEFAULT_TUBE: &str = "default";

impl TubeName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();

        fn char_is_name_safe(c: u8, is_first: bool) -> bool {
            match c {
                b'a'..=b'z' => true,
                b'A'..=b'Z' => true,
                b'0'..=b'9' => true,
                b'+' | b'/' | b';' | b'.' | b'$' | b'_' | b'(' | b')' => true,
                b'-' => !is_first, // - is only name safe outside first position
                _ => false,
            }
        }

        if name.is_empty() || name.len() > 200 {
            return Err(Error::invalid(format!(
                "tube name must be 1-200 bytes, got {}",
                name.len()
            )));
        }

        if !name
            .bytes()
            .enumerate()
            .all(|(i, c)| char_is_name_safe(c, i == 0))
        {
            return Err(Error::invalid(format!("tube name {name:?} contains unsafe bytes")));
        }

        Ok(TubeName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TubeName {
    fn default() -> Self {
        TubeName(DEFAULT_TUBE.to_string())
    }
}

impl fmt::Display for TubeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for TubeName {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        TubeName::new(value)
    }
}

/// A command sent by the client to the server.
///
/// Body-bearing commands (`put`) carry only the declared byte count here;
/// the encoded body follows the command line on the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// On the wire: `put <pri> <delay> <ttr> <n_bytes>`
    Put {
        pri: u32,
        delay: u32,
        ttr: u32,
        n_bytes: u32,
    },
    /// On the wire: `reserve`
    Reserve,
    /// On the wire: `reserve-with-timeout <seconds>`
    ReserveWithTimeout { timeout: u32 },
    /// On the wire: `delete <id>`
    Delete { id: u64 },
    /// On the wire: `release <id> <pri> <delay>`
    Release { id: u64, pri: u32, delay: u32 },
    /// On the wire: `bury <id> <pri>`
    Bury { id: u64, pri: u32 },
    /// On the wire: `touch <id>`
    Touch { id: u64 },
    /// On the wire: `use <tube>`
    Use { tube: TubeName },
    /// On the wire: `watch <tube>`
    Watch { tube: TubeName },
    /// On the wire: `ignore <tube>`
    Ignore { tube: TubeName },
    /// On the wire: `peek <id>`
    Peek { id: u64 },
    /// On the wire: `peek-ready`
    PeekReady,
    /// On the wire: `peek-delayed`
    PeekDelayed,
    /// On the wire: `peek-buried`
    PeekBuried,
    /// On the wire: `kick <bound>`
    Kick { bound: u64 },
    /// On the wire: `stats-job <id>`
    StatsJob { id: u64 },
    /// On the wire: `stats-tube <tube>`
    StatsTube { tube: TubeName },
    /// On the wire: `stats`
    StatsServer,
    /// On the wire: `list-tubes`
    ListTubes,
    /// On the wire: `list-tube-used`
    ListTubeUsed,
    /// On the wire: `list-tubes-watched`
    ListTubesWatched,
    /// On the wire: `pause-tube <tube> <delay>`
    PauseTube { tube: TubeName, delay: u32 },
}

impl Command {
    /// The wire keyword, for diagnostics.
    pub fn name(&self) -> &'static str {
        use Command::*;

        match self {
            Put { .. } => "put",
            Reserve => "reserve",
            ReserveWithTimeout { .. } => "reserve-with-timeout",
            Delete { .. } => "delete",
            Release { .. } => "release",
            Bury { .. } => "bury",
            Touch { .. } => "touch",
            Use { .. } => "use",
            Watch { .. } => "watch",
            Ignore { .. } => "ignore",
            Peek { .. } => "peek",
            PeekReady => "peek-ready",
            PeekDelayed => "peek-delayed",
            PeekBuried => "peek-buried",
            Kick { .. } => "kick",
            StatsJob { .. } => "stats-job",
            StatsTube { .. } => "stats-tube",
            StatsServer => "stats",
            ListTubes => "list-tubes",
            ListTubeUsed => "list-tube-used",
            ListTubesWatched => "list-tubes-watched",
            PauseTube { .. } => "pause-tube",
        }
    }
}

impl BeanstalkSerialisable for Command {
    fn serialise_beanstalk(&self) -> Vec<u8> {
        use Command::*;

        match self {
            Put {
                pri,
                delay,
                ttr,
                n_bytes,
            } => format!("put {pri} {delay} {ttr} {n_bytes}").into(),
            Reserve => b"reserve".to_vec(),
            ReserveWithTimeout { timeout } => {
                format!("reserve-with-timeout {timeout}").into()
            },
            Delete { id } => format!("delete {id}").into(),
            Release { id, pri, delay } => {
                format!("release {id} {pri} {delay}").into()
            },
            Bury { id, pri } => format!("bury {id} {pri}").into(),
            Touch { id } => format!("touch {id}").into(),
            Use { tube } => format!("use {tube}").into(),
            Watch { tube } => format!("watch {tube}").into(),
            Ignore { tube } => format!("ignore {tube}").into(),
            Peek { id } => format!("peek {id}").into(),
            PeekReady => b"peek-ready".to_vec(),
            PeekDelayed => b"peek-delayed".to_vec(),
            PeekBuried => b"peek-buried".to_vec(),
            Kick { bound } => format!("kick {bound}").into(),
            StatsJob { id } => format!("stats-job {id}").into(),
            StatsTube { tube } => format!("stats-tube {tube}").into(),
            StatsServer => b"stats".to_vec(),
            ListTubes => b"list-tubes".to_vec(),
            ListTubeUsed => b"list-tube-used".to_vec(),
            ListTubesWatched => b"list-tubes-watched".to_vec(),
            PauseTube { tube, delay } => {
                format!("pause-tube {tube} {delay}").into()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tube_name_validation() {
        // Asserts the name is accepted.
        #[track_caller]
        fn ok(name: &str) {
            assert_eq!(TubeName::new(name).unwrap().as_str(), name);
        }

        // Asserts the name is rejected before any I/O could happen.
        #[track_caller]
        fn bad(name: &str) {
            assert!(matches!(
                TubeName::new(name),
                Err(Error::InvalidArgument(_))
            ));
        }

        let name_200_bytes: String = (0..200).map(|_| 'a').collect();
        let name_201_bytes: String = (0..201).map(|_| 'a').collect();

        ok("default");
        ok("tube_name_here-098+/;.()-");
        ok(&name_200_bytes);

        bad("");
        bad("-leading-dash");
        bad("-");
        bad("foo#bar");
        bad("foo bar");
        bad(&name_201_bytes);
    }

    #[test]
    fn test_encode() {
        use Command::*;

        // Asserts the command encodes to the given line (no trailing CRLF).
        #[track_caller]
        fn enc(cmd: Command, line: &str) {
            assert_eq!(cmd.serialise_beanstalk(), line.as_bytes());
        }

        let tube = TubeName::new("jobs").unwrap();

        enc(
            Put {
                pri: 1024,
                delay: 0,
                ttr: 60,
                n_bytes: 11,
            },
            "put 1024 0 60 11",
        );
        enc(
            Put {
                pri: u32::MAX,
                delay: 0,
                ttr: 1,
                n_bytes: 0,
            },
            "put 4294967295 0 1 0",
        );
        enc(Reserve, "reserve");
        enc(ReserveWithTimeout { timeout: 0 }, "reserve-with-timeout 0");
        enc(Delete { id: 321 }, "delete 321");
        enc(
            Release {
                id: 987,
                pri: 654,
                delay: 321,
            },
            "release 987 654 321",
        );
        enc(Bury { id: 543, pri: 987 }, "bury 543 987");
        enc(Touch { id: 123 }, "touch 123");
        enc(Use { tube: tube.clone() }, "use jobs");
        enc(Watch { tube: tube.clone() }, "watch jobs");
        enc(Ignore { tube: tube.clone() }, "ignore jobs");
        enc(Peek { id: 7 }, "peek 7");
        enc(PeekReady, "peek-ready");
        enc(PeekDelayed, "peek-delayed");
        enc(PeekBuried, "peek-buried");
        enc(Kick { bound: 100 }, "kick 100");
        enc(StatsJob { id: 42 }, "stats-job 42");
        enc(StatsTube { tube: tube.clone() }, "stats-tube jobs");
        enc(StatsServer, "stats");
        enc(ListTubes, "list-tubes");
        enc(ListTubeUsed, "list-tube-used");
        enc(ListTubesWatched, "list-tubes-watched");
        enc(PauseTube { tube, delay: 62 }, "pause-tube jobs 62");
    }
}
