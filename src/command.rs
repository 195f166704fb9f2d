//! Single-keystroke command interpreter.
//!
//! Keys either take effect immediately (toggles, quick sort keys) or start a
//! prompted argument sequence. A cancelled or invalid sequence returns to
//! idle without applying anything.

use std::time::Duration;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::db::StatementOrder;
use crate::filter::ViewOptions;
use crate::sort::SortKey;

pub const DEFAULT_SIGNAL: i32 = 15; // SIGTERM

/// Which argument the interpreter is currently collecting. Multi-token
/// commands carry the tokens collected so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgKind {
    PidForSignal,
    SignalNumber { pid: i32 },
    PidForRenice,
    ReniceValue { pid: i32 },
    UidFilter,
    CommandFilter,
    RowCount,
    RefreshSeconds,
    SortOrder,
    StatementSort,
    PidForLocks,
    PidForQuery,
}

impl ArgKind {
    fn prompt(&self) -> String {
        match self {
            Self::PidForSignal => "pid to signal: ".into(),
            Self::SignalNumber { pid } => format!("signal for {pid} (default {DEFAULT_SIGNAL}): "),
            Self::PidForRenice => "pid to renice: ".into(),
            Self::ReniceValue { pid } => format!("new priority for {pid}: "),
            Self::UidFilter => "username or uid (+ for all): ".into(),
            Self::CommandFilter => "command filter (empty clears): ".into(),
            Self::RowCount => "rows to display (0 for all): ".into(),
            Self::RefreshSeconds => "seconds to delay: ".into(),
            Self::SortOrder => {
                format!("sort order ({}): ", SortKey::ALL.map(SortKey::name).join(", "))
            }
            Self::StatementSort => {
                format!("statement order ({}): ", StatementOrder::NAMES.join(", "))
            }
            Self::PidForLocks => "show locks of pid: ".into(),
            Self::PidForQuery => "show query of pid: ".into(),
        }
    }
}

/// Mid-sequence state; cleared on completion, cancellation or bad input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub kind: ArgKind,
    pub buffer: String,
}

/// A privileged action ready for the privilege gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionRequest {
    Kill { pid: i32, signal: i32 },
    Renice { pid: i32, value: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewRequest {
    Query(i32),
    Locks(i32),
    Statements(StatementOrder),
    ErrorLog,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    None,
    Quit,
    Redraw,
    UpdateNow,
    Message(String),
    Dispatch(ActionRequest),
    Show(ViewRequest),
}

#[derive(Debug, Default)]
pub struct CommandInterpreter {
    pending: Option<PendingAction>,
}

impl CommandInterpreter {
    pub fn is_idle(&self) -> bool {
        self.pending.is_none()
    }

    /// Prompt text plus input collected so far, for the status line.
    pub fn prompt(&self) -> Option<(String, &str)> {
        self.pending
            .as_ref()
            .map(|p| (p.kind.prompt(), p.buffer.as_str()))
    }

    pub fn handle_key(&mut self, key: KeyEvent, opts: &mut ViewOptions) -> Effect {
        if self.pending.is_some() {
            return self.collect(key, opts);
        }

        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return match key.code {
                KeyCode::Char('l') => Effect::Redraw,
                KeyCode::Char('c') => Effect::Quit,
                _ => Effect::None,
            };
        }

        match key.code {
            KeyCode::Char('q') => Effect::Quit,
            KeyCode::Char(' ') => Effect::UpdateNow,
            KeyCode::Char('i') => {
                opts.show_idle = !opts.show_idle;
                toggled("idle processes", opts.show_idle)
            }
            KeyCode::Char('x') => {
                opts.show_system = !opts.show_system;
                toggled("system processes", opts.show_system)
            }
            KeyCode::Char('H') => {
                opts.show_threads = !opts.show_threads;
                toggled("threads", opts.show_threads)
            }
            KeyCode::Char('C') => {
                opts.color = !opts.color;
                toggled("color", opts.color)
            }
            KeyCode::Char('P') => self.quick_sort(opts, SortKey::Cpu),
            KeyCode::Char('M') => self.quick_sort(opts, SortKey::Size),
            KeyCode::Char('R') => self.quick_sort(opts, SortKey::Res),
            KeyCode::Char('T') => self.quick_sort(opts, SortKey::Time),
            KeyCode::Char('O') => self.quick_sort(opts, SortKey::Prio),
            KeyCode::Char('u') => self.await_arg(ArgKind::UidFilter),
            KeyCode::Char('/') => self.await_arg(ArgKind::CommandFilter),
            KeyCode::Char('n') | KeyCode::Char('#') => self.await_arg(ArgKind::RowCount),
            KeyCode::Char('s') => self.await_arg(ArgKind::RefreshSeconds),
            KeyCode::Char('o') => self.await_arg(ArgKind::SortOrder),
            KeyCode::Char('k') => self.await_arg(ArgKind::PidForSignal),
            KeyCode::Char('r') => self.await_arg(ArgKind::PidForRenice),
            KeyCode::Char('Q') => self.await_arg(ArgKind::PidForQuery),
            KeyCode::Char('L') => self.await_arg(ArgKind::PidForLocks),
            KeyCode::Char('X') => self.await_arg(ArgKind::StatementSort),
            KeyCode::Char('e') => Effect::Show(ViewRequest::ErrorLog),
            KeyCode::Char('h') | KeyCode::Char('?') => Effect::Show(ViewRequest::Help),
            _ => Effect::None,
        }
    }

    fn quick_sort(&mut self, opts: &mut ViewOptions, key: SortKey) -> Effect {
        opts.sort_key = key;
        Effect::Message(format!("sorting by {}", key.name()))
    }

    fn await_arg(&mut self, kind: ArgKind) -> Effect {
        self.pending = Some(PendingAction {
            kind,
            buffer: String::new(),
        });
        Effect::None
    }

    fn collect(&mut self, key: KeyEvent, opts: &mut ViewOptions) -> Effect {
        let pending = self.pending.as_mut().expect("collect without pending");
        match key.code {
            KeyCode::Esc => {
                self.pending = None;
                Effect::Message("aborted".into())
            }
            KeyCode::Backspace => {
                pending.buffer.pop();
                Effect::None
            }
            KeyCode::Char(c) if !c.is_control() => {
                pending.buffer.push(c);
                Effect::None
            }
            KeyCode::Enter => {
                let done = self.pending.take().expect("pending disappeared");
                self.submit(done, opts)
            }
            _ => Effect::None,
        }
    }

    fn submit(&mut self, pending: PendingAction, opts: &mut ViewOptions) -> Effect {
        let input = pending.buffer.trim();
        match pending.kind {
            ArgKind::PidForSignal => self.next_pid_arg(input, ArgKind::SignalNumber { pid: 0 }),
            ArgKind::SignalNumber { pid } => {
                if input.is_empty() {
                    return Effect::Dispatch(ActionRequest::Kill {
                        pid,
                        signal: DEFAULT_SIGNAL,
                    });
                }
                match input.parse::<i32>() {
                    Ok(signal) => Effect::Dispatch(ActionRequest::Kill { pid, signal }),
                    Err(_) => Effect::Message("invalid signal number".into()),
                }
            }
            ArgKind::PidForRenice => self.next_pid_arg(input, ArgKind::ReniceValue { pid: 0 }),
            ArgKind::ReniceValue { pid } => match input.parse::<i32>() {
                Ok(value) => Effect::Dispatch(ActionRequest::Renice { pid, value }),
                Err(_) => Effect::Message("invalid priority value".into()),
            },
            ArgKind::UidFilter => {
                if input.is_empty() || input == "+" {
                    opts.uid_filter = None;
                    Effect::Message("displaying all users".into())
                } else {
                    // A numeric uid or a username from the password database.
                    let uid = input
                        .parse::<u32>()
                        .ok()
                        .or_else(|| crate::format::uid_for_name(input));
                    match uid {
                        Some(uid) => {
                            opts.uid_filter = Some(uid);
                            Effect::Message(format!("displaying uid {uid} only"))
                        }
                        None => Effect::Message(format!("unknown user {input}")),
                    }
                }
            }
            ArgKind::CommandFilter => {
                if input.is_empty() {
                    opts.command_filter = None;
                    Effect::Message("command filter cleared".into())
                } else {
                    opts.command_filter = Some(input.to_string());
                    Effect::Message(format!("showing commands containing \"{input}\""))
                }
            }
            ArgKind::RowCount => match input.parse::<usize>() {
                Ok(0) => {
                    opts.display_count = None;
                    Effect::Message("displaying all rows".into())
                }
                Ok(n) => {
                    opts.display_count = Some(n);
                    Effect::Message(format!("displaying {n} rows"))
                }
                Err(_) => Effect::Message("invalid row count".into()),
            },
            ArgKind::RefreshSeconds => match input.parse::<u64>() {
                Ok(secs) if secs >= 1 => {
                    opts.delay = Duration::from_secs(secs);
                    Effect::Message(format!("updating every {secs}s"))
                }
                _ => Effect::Message("delay must be a positive number of seconds".into()),
            },
            ArgKind::SortOrder => match SortKey::from_name(input) {
                Some(key) => {
                    opts.sort_key = key;
                    Effect::Message(format!("sorting by {}", key.name()))
                }
                None => Effect::Message("sort order not recognized".into()),
            },
            ArgKind::StatementSort => {
                let order = if input.is_empty() {
                    Some(StatementOrder::Calls)
                } else {
                    StatementOrder::from_name(input)
                };
                match order {
                    Some(order) => Effect::Show(ViewRequest::Statements(order)),
                    None => Effect::Message("statement order not recognized".into()),
                }
            }
            ArgKind::PidForLocks => match input.parse::<i32>() {
                Ok(pid) => Effect::Show(ViewRequest::Locks(pid)),
                Err(_) => Effect::Message("invalid process id".into()),
            },
            ArgKind::PidForQuery => match input.parse::<i32>() {
                Ok(pid) => Effect::Show(ViewRequest::Query(pid)),
                Err(_) => Effect::Message("invalid process id".into()),
            },
        }
    }

    /// Parse the first pid token of a two-token command and move on to the
    /// second prompt. Empty input aborts.
    fn next_pid_arg(&mut self, input: &str, next: ArgKind) -> Effect {
        if input.is_empty() {
            return Effect::Message("aborted".into());
        }
        match input.parse::<i32>() {
            Ok(pid) => {
                let kind = match next {
                    ArgKind::SignalNumber { .. } => ArgKind::SignalNumber { pid },
                    _ => ArgKind::ReniceValue { pid },
                };
                self.await_arg(kind)
            }
            Err(_) => Effect::Message("invalid process id".into()),
        }
    }
}

fn toggled(what: &str, on: bool) -> Effect {
    if on {
        Effect::Message(format!("displaying {what}"))
    } else {
        Effect::Message(format!("not displaying {what}"))
    }
}
