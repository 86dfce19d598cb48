use std::fmt;

use crate::message::Cmd;

/// Snapshot of manager activity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Runs currently alive
    pub runs: usize,

    /// Packets waiting for their seqn to enter the window
    pub wait_packets: usize,

    /// Retries waiting to fire
    pub wait_ticks: usize,

    pub total_runs: u64,
    pub total_fills: u64,
    pub total_ticks: u64,

    /// Valid packets received, indexed by `Cmd::index`
    pub total_recv: [u64; Cmd::COUNT],
}

impl Stats {
    pub fn received(&self, cmd: Cmd) -> u64 {
        self.total_recv[cmd.index()]
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "runs:          {}", self.runs)?;
        writeln!(f, "wait packets:  {}", self.wait_packets)?;
        writeln!(f, "wait ticks:    {}", self.wait_ticks)?;
        writeln!(f, "total runs:    {}", self.total_runs)?;
        writeln!(f, "total fills:   {}", self.total_fills)?;
        write!(f, "total ticks:   {}", self.total_ticks)?;
        for cmd in Cmd::ALL.iter() {
            write!(f, "\nrecv {:<9}{}", cmd.name(), self.received(*cmd))?;
        }
        Ok(())
    }
}
