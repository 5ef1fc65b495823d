//! Quiescence bookkeeping and profiling for one simulation round.
//!
//! Each cooperating worker (network, collector, one loop per process)
//! reports idle/busy transitions here. The round orchestrator blocks on
//! [`Session::wait_busy`] then [`Session::wait_idle`] to detect global
//! quiescence: the two-phase wait prevents the race where the orchestrator
//! samples the flags before any worker has observed its first event.

use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use simnet_core::{Pid, SimError};

/// Interval between polls in `wait_idle` / `wait_busy`.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Accumulates where one worker spends its time: running, blocked in its
/// select, or idle-sleeping.
#[derive(Debug, Default)]
struct PhaseTimer {
    started: Option<Instant>,
    select_since: Option<Instant>,
    sleep_since: Option<Instant>,
    in_select: Duration,
    in_sleep: Duration,
}

impl PhaseTimer {
    fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    fn select_start(&mut self) {
        self.select_since = Some(Instant::now());
    }

    fn select_end(&mut self) {
        if let Some(since) = self.select_since.take() {
            self.in_select += since.elapsed();
        }
    }

    fn sleep_start(&mut self) {
        self.sleep_since = Some(Instant::now());
    }

    fn sleep_end(&mut self) {
        if let Some(since) = self.sleep_since.take() {
            self.in_sleep += since.elapsed();
        }
    }

    fn totals(&self) -> (Duration, Duration, Duration) {
        match self.started {
            Some(started) => (started.elapsed(), self.in_select, self.in_sleep),
            None => (Duration::ZERO, Duration::ZERO, Duration::ZERO),
        }
    }
}

/// Percentage triple `(run, select, sleep)` summing to 100 when active.
fn percentages(total: Duration, select: Duration, sleep: Duration) -> (u64, u64, u64) {
    let total = total.as_micros() as u64;
    if total == 0 {
        return (0, 0, 0);
    }
    let select = 100 * select.as_micros() as u64 / total;
    let sleep = 100 * sleep.as_micros() as u64 / total;
    (100u64.saturating_sub(select).saturating_sub(sleep), select, sleep)
}

#[derive(Debug)]
struct Inner {
    network_idle: bool,
    collect_idle: bool,
    process_idle: Vec<bool>,
    network: PhaseTimer,
    collect: PhaseTimer,
    processes: Vec<PhaseTimer>,
}

/// Idle/busy flags and profiling accumulators for one round.
///
/// All accessors are mutually excluded behind a single mutex. Transitions
/// are idempotent: reporting idle twice in a row is permitted.
#[derive(Debug)]
pub struct Session {
    scale: usize,
    inner: Mutex<Inner>,
}

impl Session {
    /// A session tracking the network, the collector, and `scale` processes.
    /// Every participant starts out busy.
    pub fn new(scale: usize) -> Self {
        Self {
            scale,
            inner: Mutex::new(Inner {
                network_idle: false,
                collect_idle: false,
                process_idle: vec![false; scale],
                network: PhaseTimer::default(),
                collect: PhaseTimer::default(),
                processes: (0..scale).map(|_| PhaseTimer::default()).collect(),
            }),
        }
    }

    // ─── Idle/busy transitions ──────────────────────────────────────────

    pub fn report_network_idle(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.network.sleep_start();
        inner.network_idle = true;
    }

    pub fn report_network_busy(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.network.sleep_end();
        inner.network_idle = false;
    }

    pub fn report_collect_idle(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.collect.sleep_start();
        inner.collect_idle = true;
    }

    pub fn report_collect_busy(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.collect.sleep_end();
        inner.collect_idle = false;
    }

    pub fn report_process_idle(&self, pid: Pid) -> Result<(), SimError> {
        if pid >= self.scale {
            return Err(SimError::IncorrectPid);
        }
        let mut inner = self.inner.lock().unwrap();
        inner.processes[pid].sleep_start();
        inner.process_idle[pid] = true;
        Ok(())
    }

    pub fn report_process_busy(&self, pid: Pid) -> Result<(), SimError> {
        if pid >= self.scale {
            return Err(SimError::IncorrectPid);
        }
        let mut inner = self.inner.lock().unwrap();
        inner.processes[pid].sleep_end();
        inner.process_idle[pid] = false;
        Ok(())
    }

    // ─── Profiling ──────────────────────────────────────────────────────

    pub fn prof_network_start(&self) {
        self.inner.lock().unwrap().network.start();
    }

    pub fn prof_network_select_start(&self) {
        self.inner.lock().unwrap().network.select_start();
    }

    pub fn prof_network_select_end(&self) {
        self.inner.lock().unwrap().network.select_end();
    }

    pub fn prof_collect_start(&self) {
        self.inner.lock().unwrap().collect.start();
    }

    pub fn prof_collect_select_start(&self) {
        self.inner.lock().unwrap().collect.select_start();
    }

    pub fn prof_collect_select_end(&self) {
        self.inner.lock().unwrap().collect.select_end();
    }

    pub fn prof_process_start(&self, pid: Pid) -> Result<(), SimError> {
        if pid >= self.scale {
            return Err(SimError::IncorrectPid);
        }
        self.inner.lock().unwrap().processes[pid].start();
        Ok(())
    }

    pub fn prof_process_select_start(&self, pid: Pid) -> Result<(), SimError> {
        if pid >= self.scale {
            return Err(SimError::IncorrectPid);
        }
        self.inner.lock().unwrap().processes[pid].select_start();
        Ok(())
    }

    pub fn prof_process_select_end(&self, pid: Pid) {
        if pid >= self.scale {
            return;
        }
        self.inner.lock().unwrap().processes[pid].select_end();
    }

    // ─── Quiescence ─────────────────────────────────────────────────────

    /// True iff the network, the collector, and every process are idle.
    pub fn is_idle(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.network_idle && inner.collect_idle && inner.process_idle.iter().all(|&idle| idle)
    }

    /// Block until at least one participant is busy.
    pub fn wait_busy(&self) {
        while self.is_idle() {
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Block until every participant is idle.
    pub fn wait_idle(&self) {
        while !self.is_idle() {
            thread::sleep(POLL_INTERVAL);
        }
    }

    // ─── Telemetry strings ──────────────────────────────────────────────

    /// Idle mask, one letter per participant: `'A'` active, `' '` idle.
    pub fn status(&self) -> String {
        let inner = self.inner.lock().unwrap();
        let mark = |idle: bool| if idle { ' ' } else { 'A' };
        let mut s = String::new();
        s.push_str("n[");
        s.push(mark(inner.network_idle));
        s.push_str("] c[");
        s.push(mark(inner.collect_idle));
        s.push_str("] pp[");
        for &idle in &inner.process_idle {
            s.push(mark(idle));
        }
        s.push(']');
        s
    }

    /// Percent triples `run/select/sleep` for the network, the collector,
    /// and the aggregate of all processes.
    pub fn profs(&self) -> String {
        let inner = self.inner.lock().unwrap();

        let (nt, ns, nl) = inner.network.totals();
        let (nr, nsel, nslp) = percentages(nt, ns, nl);

        let (ct, cs, cl) = inner.collect.totals();
        let (cr, csel, cslp) = percentages(ct, cs, cl);

        let mut pt = Duration::ZERO;
        let mut ps = Duration::ZERO;
        let mut pl = Duration::ZERO;
        for timer in &inner.processes {
            let (t, s, l) = timer.totals();
            pt += t;
            ps += s;
            pl += l;
        }
        let (pr, psel, pslp) = percentages(pt, ps, pl);

        format!(
            "n[{:2}/{:2}/{:2}] c[{:2}/{:2}/{:2}] p[{:2}/{:2}/{:2}]",
            nr, nsel, nslp, cr, csel, cslp, pr, psel, pslp,
        )
    }
}
