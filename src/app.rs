//! Application state: one tick pipeline (sample, filter, sort, format) plus
//! the command interpreter and privileged-action plumbing.

use std::time::Instant;

use crossterm::event::KeyEvent;
use log::warn;

use crate::action::{self, ActionDispatcher, ActionKind, ActionLog, ActionOutcome};
use crate::command::{ActionRequest, CommandInterpreter, Effect, ViewRequest};
use crate::db::SessionSource;
use crate::filter::{self, ViewOptions};
use crate::format::{self, UserResolver};
use crate::os::{MemoryFacts, ProcessEnumerator};
use crate::rate::CPU_CATEGORY_COUNT;
use crate::record::{ProcessRecord, STATE_SLOTS};
use crate::sampler::SamplerState;
use crate::sort;

/// What the main area is currently showing. Any keystroke leaves a text view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveView {
    Processes,
    Text { title: String, body: String },
}

/// Summary figures for the header block, refreshed every tick.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub total: usize,
    pub active: usize,
    pub state_counts: [usize; STATE_SLOTS],
    pub cpu_pct: Vec<i64>,
    pub memory: MemoryFacts,
    pub load: [f64; 3],
}

pub struct App {
    pub opts: ViewOptions,
    pub interp: CommandInterpreter,
    pub log: ActionLog,
    pub summary: Summary,
    /// Records surviving the selection filter this tick, in sorted order.
    pub active: Vec<ProcessRecord>,
    /// Formatted display lines, one per active record shown.
    pub rows: Vec<String>,
    pub message: Option<String>,
    pub view: ActiveView,
    pub force_update: bool,
    pub needs_clear: bool,
    actor_uid: u32,
    admin_uids: Vec<u32>,
    sampler: SamplerState,
    os: Box<dyn ProcessEnumerator>,
    db: Box<dyn SessionSource>,
    dispatcher: Box<dyn ActionDispatcher>,
    users: Box<dyn UserResolver>,
}

impl App {
    pub fn new(
        os: Box<dyn ProcessEnumerator>,
        db: Box<dyn SessionSource>,
        dispatcher: Box<dyn ActionDispatcher>,
        users: Box<dyn UserResolver>,
        opts: ViewOptions,
        actor_uid: u32,
        admin_uids: Vec<u32>,
    ) -> Self {
        Self {
            opts,
            interp: CommandInterpreter::default(),
            log: ActionLog::default(),
            summary: Summary {
                cpu_pct: vec![0; CPU_CATEGORY_COUNT],
                ..Summary::default()
            },
            active: Vec::new(),
            rows: Vec::new(),
            message: None,
            view: ActiveView::Processes,
            force_update: false,
            needs_clear: false,
            actor_uid,
            admin_uids,
            sampler: SamplerState::new(),
            os,
            db,
            dispatcher,
            users,
        }
    }

    /// Run one full sample-filter-sort-format cycle. View option changes made
    /// after this returns only affect the next call.
    pub fn tick(&mut self, now: Instant) {
        self.force_update = false;
        let sample = match self.sampler.sample(self.os.as_mut(), self.db.as_mut(), now) {
            Ok(sample) => sample,
            Err(e) => {
                // Keep showing the previous tick's data.
                warn!("sampling failed: {e}");
                self.message = Some(format!("sampling failed: {e}"));
                return;
            }
        };
        if let Some(notice) = &sample.db_notice {
            self.message = Some(notice.clone());
        }

        let mut active: Vec<ProcessRecord> = sample
            .records
            .iter()
            .filter(|r| filter::selects(r, &self.opts))
            .cloned()
            .collect();
        sort::sort(&mut active, self.opts.sort_key);

        // The row limit is display-only; the full filtered set stays in
        // `active` so the privilege gate sees every selectable process.
        let shown = self
            .opts
            .display_count
            .map_or(active.len(), |count| count.min(active.len()));
        self.rows = active
            .iter()
            .take(shown)
            .map(|r| format::format_row(r, &self.opts, self.users.as_mut()))
            .collect();
        self.summary = Summary {
            total: sample.total,
            active: shown,
            state_counts: sample.state_counts,
            cpu_pct: sample.cpu_pct,
            memory: sample.memory,
            load: sample.load,
        };
        self.active = active;
    }

    /// Returns true when the application should quit.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        if self.view != ActiveView::Processes {
            // Any key leaves a secondary view.
            self.view = ActiveView::Processes;
            return false;
        }
        match self.interp.handle_key(key, &mut self.opts) {
            Effect::None => false,
            Effect::Quit => true,
            Effect::Redraw => {
                self.needs_clear = true;
                false
            }
            Effect::UpdateNow => {
                self.force_update = true;
                false
            }
            Effect::Message(m) => {
                self.message = Some(m);
                false
            }
            Effect::Dispatch(req) => {
                self.execute(req);
                false
            }
            Effect::Show(req) => {
                self.show(req);
                false
            }
        }
    }

    /// Gate and dispatch a privileged action, recording the outcome.
    fn execute(&mut self, req: ActionRequest) {
        let (pid, kind) = match req {
            ActionRequest::Kill { pid, .. } => (pid, ActionKind::Kill),
            ActionRequest::Renice { pid, .. } => (pid, ActionKind::Renice),
        };
        // Authorization runs against this tick's active set, never stale data.
        let outcome = match action::authorize(self.actor_uid, &self.admin_uids, pid, &self.active)
        {
            Err(denied) => denied,
            Ok(()) => match req {
                ActionRequest::Kill { pid, signal } => self.dispatcher.kill(pid, signal),
                ActionRequest::Renice { pid, value } => self.dispatcher.renice(pid, value),
            },
        };
        self.message = Some(format!("{kind} {pid}: {outcome}"));
        self.log.push(pid, kind, outcome);
    }

    fn show(&mut self, req: ViewRequest) {
        let (title, body) = match req {
            ViewRequest::Query(pid) => (
                format!("query of pid {pid}"),
                match self.db.current_query(pid) {
                    Ok(Some(query)) => query,
                    Ok(None) => "<no active query>".to_string(),
                    Err(e) => e.to_string(),
                },
            ),
            ViewRequest::Locks(pid) => (
                format!("locks held by pid {pid}"),
                match self.db.locks(pid) {
                    Ok(rows) if rows.is_empty() => "<no locks>".to_string(),
                    Ok(rows) => rows
                        .iter()
                        .map(|l| {
                            format!(
                                "{:<16} {:<24} {:<20} {}",
                                l.database.as_deref().unwrap_or("-"),
                                l.relation.as_deref().unwrap_or("-"),
                                l.mode,
                                if l.granted { "granted" } else { "waiting" },
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n"),
                    Err(e) => e.to_string(),
                },
            ),
            ViewRequest::Statements(order) => (
                "pg_stat_statements".to_string(),
                match self.db.top_statements(order, 50) {
                    Ok(None) => "pg_stat_statements is not installed".to_string(),
                    Ok(Some(rows)) if rows.is_empty() => "<no statements>".to_string(),
                    Ok(Some(rows)) => rows
                        .iter()
                        .map(|s| {
                            format!(
                                "{:>7} {:>6.1} {:>12} {:>12} {}",
                                s.calls,
                                s.calls_pct * 100.0,
                                s.total_time,
                                s.avg_time,
                                s.query,
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n"),
                    Err(e) => e.to_string(),
                },
            ),
            ViewRequest::ErrorLog => (
                "kill/renice errors".to_string(),
                if self.log.is_empty() {
                    "<no actions attempted>".to_string()
                } else {
                    self.log
                        .iter()
                        .map(|entry| {
                            let ago = entry
                                .at
                                .elapsed()
                                .map(|d| d.as_secs())
                                .unwrap_or_default();
                            format!(
                                "{:>5}s ago  {:<6} {:>7}  {}",
                                ago, entry.kind, entry.pid, entry.outcome
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                },
            ),
            ViewRequest::Help => ("help".to_string(), HELP_TEXT.to_string()),
        };
        self.view = ActiveView::Text { title, body };
    }
}

pub const HELP_TEXT: &str = "\
A top-style display for PostgreSQL backends.

These single-character commands are available:

^L      - redraw screen
<sp>    - update screen now
C       - toggle the use of color
H       - toggle the display of threads
L       - show locks held by a process
O       - sort by priority
P       - sort by CPU usage
M       - sort by memory size
Q       - show current query of a process
R       - sort by resident memory
T       - sort by time
X       - show pg_stat_statements statistics
e       - list errors from the last kill or renice
h or ?  - show this text
i       - toggle the display of idle processes
k       - kill: send a signal to a process
n or #  - change the number of rows to display
o       - specify sort order (cpu, size, res, time, prio)
q       - quit
r       - renice a process
s       - change the number of seconds between updates
u       - display one user only (+ selects all users)
x       - toggle the display of system processes
/       - filter commands by substring
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::DEFAULT_SIGNAL;
    use crate::db::{DbError, LockRow, SessionRow, StatementOrder, StatementRow};
    use crate::os::{OsError, RawProcess};
    use crate::record::ProcState;
    use crossterm::event::{KeyCode, KeyModifiers};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct FakeOs(Vec<RawProcess>);

    impl ProcessEnumerator for FakeOs {
        fn pids(&mut self) -> Result<Vec<i32>, OsError> {
            Ok(self.0.iter().map(|p| p.pid).collect())
        }

        fn facts(&mut self, pid: i32) -> Result<RawProcess, OsError> {
            self.0
                .iter()
                .find(|p| p.pid == pid)
                .cloned()
                .ok_or(OsError::Vanished)
        }

        fn cpu_counters(&mut self) -> Result<Vec<[u64; CPU_CATEGORY_COUNT]>, OsError> {
            Ok(vec![[0; CPU_CATEGORY_COUNT]])
        }

        fn memory(&mut self) -> Result<MemoryFacts, OsError> {
            Ok(MemoryFacts::default())
        }

        fn load_average(&mut self) -> Result<[f64; 3], OsError> {
            Ok([0.0; 3])
        }

        fn clock_ticks(&self) -> u64 {
            100
        }
    }

    struct NoDb;

    impl SessionSource for NoDb {
        fn sessions(&mut self) -> Result<Vec<SessionRow>, DbError> {
            Ok(Vec::new())
        }

        fn current_query(&mut self, _pid: i32) -> Result<Option<String>, DbError> {
            Ok(None)
        }

        fn locks(&mut self, _pid: i32) -> Result<Vec<LockRow>, DbError> {
            Ok(Vec::new())
        }

        fn top_statements(
            &mut self,
            _order: StatementOrder,
            _limit: i64,
        ) -> Result<Option<Vec<StatementRow>>, DbError> {
            Ok(None)
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Rc<RefCell<Vec<(ActionKind, i32, i32)>>>,
    }

    impl ActionDispatcher for Recorder {
        fn kill(&mut self, pid: i32, signal: i32) -> ActionOutcome {
            self.calls.borrow_mut().push((ActionKind::Kill, pid, signal));
            ActionOutcome::Success
        }

        fn renice(&mut self, pid: i32, value: i32) -> ActionOutcome {
            self.calls
                .borrow_mut()
                .push((ActionKind::Renice, pid, value));
            ActionOutcome::Success
        }
    }

    struct NumericUsers;

    impl UserResolver for NumericUsers {
        fn name(&mut self, uid: u32) -> String {
            uid.to_string()
        }
    }

    fn raw(pid: i32, uid: u32) -> RawProcess {
        RawProcess {
            pid,
            uid,
            priority: 10,
            nice: 0,
            vsize_kb: 100,
            rss_kb: 50,
            state: ProcState::Run,
            wait_channel: String::new(),
            cpu_ticks: 0,
            command: "postgres".into(),
            cmdline: None,
            is_system: false,
            is_thread: false,
        }
    }

    fn app_with(procs: Vec<RawProcess>, actor_uid: u32) -> (App, Recorder) {
        let recorder = Recorder::default();
        let app = App::new(
            Box::new(FakeOs(procs)),
            Box::new(NoDb),
            Box::new(recorder.clone()),
            Box::new(NumericUsers),
            ViewOptions::default(),
            actor_uid,
            vec![0],
        );
        (app, recorder)
    }

    fn type_line(app: &mut App, line: &str) {
        for c in line.chars() {
            app.handle_key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE));
        }
        app.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE));
    }

    #[test]
    fn renice_owned_process_dispatches_and_logs_success() {
        let (mut app, recorder) = app_with(vec![raw(10, 5)], 5);
        app.tick(Instant::now());
        assert_eq!(app.active.len(), 1);

        app.handle_key(KeyEvent::new(KeyCode::Char('r'), KeyModifiers::NONE));
        type_line(&mut app, "10");
        type_line(&mut app, "5");

        assert_eq!(
            recorder.calls.borrow().as_slice(),
            &[(ActionKind::Renice, 10, 5)]
        );
        assert_eq!(app.log.len(), 1);
        let entry = app.log.iter().next().unwrap();
        assert_eq!(entry.outcome, ActionOutcome::Success);
        assert_eq!(entry.kind, ActionKind::Renice);
    }

    #[test]
    fn kill_unknown_pid_denied_without_dispatch() {
        let (mut app, recorder) = app_with(vec![raw(10, 5)], 5);
        app.tick(Instant::now());

        app.handle_key(KeyEvent::new(KeyCode::Char('k'), KeyModifiers::NONE));
        type_line(&mut app, "999");
        type_line(&mut app, "");

        assert!(recorder.calls.borrow().is_empty());
        assert_eq!(app.log.len(), 1);
        let entry = app.log.iter().next().unwrap();
        assert_eq!(entry.outcome, ActionOutcome::NoSuchProcess);
        assert!(app.message.as_deref().unwrap().contains("no such process"));
    }

    #[test]
    fn kill_other_users_process_denied() {
        let (mut app, recorder) = app_with(vec![raw(10, 5), raw(11, 7)], 5);
        app.tick(Instant::now());

        app.handle_key(KeyEvent::new(KeyCode::Char('k'), KeyModifiers::NONE));
        type_line(&mut app, "11");
        type_line(&mut app, "");

        assert!(recorder.calls.borrow().is_empty());
        assert_eq!(
            app.log.iter().next().unwrap().outcome,
            ActionOutcome::PermissionDenied
        );
    }

    #[test]
    fn administrative_actor_may_signal_any_active_process() {
        let (mut app, recorder) = app_with(vec![raw(10, 5)], 0);
        app.tick(Instant::now());

        app.handle_key(KeyEvent::new(KeyCode::Char('k'), KeyModifiers::NONE));
        type_line(&mut app, "10");
        type_line(&mut app, "");

        assert_eq!(
            recorder.calls.borrow().as_slice(),
            &[(ActionKind::Kill, 10, DEFAULT_SIGNAL)]
        );
    }

    #[test]
    fn row_limit_does_not_shrink_the_authorized_set() {
        let (mut app, recorder) = app_with(vec![raw(10, 5), raw(11, 5)], 5);
        app.opts.display_count = Some(1);
        app.tick(Instant::now());
        assert_eq!(app.rows.len(), 1);
        assert_eq!(app.summary.active, 1);
        assert_eq!(app.active.len(), 2);

        // Pid 11 passes the filter but falls below the row limit; it must
        // still be killable.
        app.handle_key(KeyEvent::new(KeyCode::Char('k'), KeyModifiers::NONE));
        type_line(&mut app, "11");
        type_line(&mut app, "");

        assert_eq!(
            recorder.calls.borrow().as_slice(),
            &[(ActionKind::Kill, 11, DEFAULT_SIGNAL)]
        );
        assert_eq!(app.log.iter().next().unwrap().outcome, ActionOutcome::Success);
    }

    #[test]
    fn option_change_applies_on_next_tick() {
        let (mut app, _) = app_with(vec![raw(10, 5), raw(11, 7)], 5);
        app.tick(Instant::now());
        assert_eq!(app.active.len(), 2);

        app.handle_key(KeyEvent::new(KeyCode::Char('u'), KeyModifiers::NONE));
        type_line(&mut app, "5");
        // Unchanged until the next tick runs.
        assert_eq!(app.active.len(), 2);
        app.tick(Instant::now());
        assert_eq!(app.active.len(), 1);
        assert_eq!(app.active[0].pid, 10);
    }

    #[test]
    fn any_key_leaves_text_view() {
        let (mut app, _) = app_with(vec![raw(10, 5)], 5);
        app.handle_key(KeyEvent::new(KeyCode::Char('h'), KeyModifiers::NONE));
        assert!(matches!(app.view, ActiveView::Text { .. }));
        let quit = app.handle_key(KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE));
        assert!(!quit);
        assert_eq!(app.view, ActiveView::Processes);
    }

    #[test]
    fn rows_and_summary_follow_active_set() {
        let (mut app, _) = app_with(vec![raw(10, 5), raw(11, 7)], 5);
        app.tick(Instant::now());
        assert_eq!(app.summary.total, 2);
        assert_eq!(app.summary.active, 2);
        assert_eq!(app.rows.len(), 2);
        assert!(app.rows[0].contains("postgres"));
    }
}
